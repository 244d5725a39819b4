//! Scope frames and local declaration discovery for embedded behavior bodies.
//!
//! A frame pushed for a nested block shares its parent's name set until the
//! block declares something of its own, at which point only that frame forks.

use crate::search::CodeText;
use regex::Regex;
use std::collections::HashSet;
use std::ops::Range;
use std::rc::Rc;

lazy_static::lazy_static! {
    static ref DECLARATION: Regex = Regex::new(r"\b(let|const|var)\s+").unwrap();
    static ref FOR_HEADER: Regex = Regex::new(r"\bfor\s*(?:await\s*)?\(\s*$").unwrap();
    static ref FUNCTION: Regex = Regex::new(
        r"\bfunction\b\s*\*?\s*([A-Za-z_$][A-Za-z0-9_$]*)?\s*\(([^()]*)\)"
    ).unwrap();
    static ref CATCH: Regex = Regex::new(r"\bcatch\s*\(([^()]*)\)").unwrap();
    static ref CLASS: Regex = Regex::new(r"\bclass\s+([A-Za-z_$][A-Za-z0-9_$]*)").unwrap();
    static ref ARROW: Regex = Regex::new(
        r"(\([^()]*\)|[A-Za-z_$][A-Za-z0-9_$]*)\s*=>"
    ).unwrap();
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap();
}

/// Where a declared name becomes visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingScope {
    /// The block enclosing the declaration.
    Block,
    /// The innermost enclosing function body.
    Function,
    /// The next block opened; `function` marks it as a function body.
    Parameters { function: bool },
    /// From the declaration up to `until`, without a block of its own.
    Expression { until: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDeclaration {
    pub offset: usize,
    pub names: Vec<String>,
    pub scope: BindingScope,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCOPE STACK
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct Frame {
    names: Rc<HashSet<String>>,
    function: bool,
}

#[derive(Debug, Clone)]
pub struct ScopeStack {
    frames: Vec<Frame>,
    pending: HashSet<String>,
    pending_function: bool,
    transient: Vec<(String, usize)>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame {
                names: Rc::new(HashSet::new()),
                function: true,
            }],
            pending: HashSet::new(),
            pending_function: false,
            transient: Vec::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Enters a block. Pending parameters land in the new frame.
    pub fn push(&mut self) {
        let parent = Rc::clone(&self.frames[self.frames.len() - 1].names);
        if self.pending.is_empty() {
            self.frames.push(Frame {
                names: parent,
                function: false,
            });
            return;
        }
        let mut names = (*parent).clone();
        names.extend(self.pending.drain());
        self.frames.push(Frame {
            names: Rc::new(names),
            function: std::mem::take(&mut self.pending_function),
        });
    }

    /// Leaves a block. The root frame is never popped.
    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn declare(&mut self, name: &str) {
        if let Some(frame) = self.frames.last_mut() {
            Rc::make_mut(&mut frame.names).insert(name.to_string());
        }
    }

    pub fn declare_function_scoped(&mut self, name: &str) {
        if let Some(frame) = self.frames.iter_mut().rev().find(|f| f.function) {
            Rc::make_mut(&mut frame.names).insert(name.to_string());
        }
    }

    pub fn declare_pending(&mut self, name: &str, function: bool) {
        self.pending.insert(name.to_string());
        self.pending_function |= function;
    }

    pub fn declare_until(&mut self, name: &str, until: usize) {
        self.transient.push((name.to_string(), until));
    }

    pub fn apply(&mut self, declaration: &LocalDeclaration) {
        for name in &declaration.names {
            match declaration.scope {
                BindingScope::Block => self.declare(name),
                BindingScope::Function => self.declare_function_scoped(name),
                BindingScope::Parameters { function } => self.declare_pending(name, function),
                BindingScope::Expression { until } => self.declare_until(name, until),
            }
        }
    }

    /// Whether `name` is shadowed by a local visible at `offset`.
    pub fn is_declared(&self, name: &str, offset: usize) -> bool {
        self.pending.contains(name)
            || self.transient.iter().any(|(n, until)| n == name && offset < *until)
            || self.frames.iter().any(|f| f.names.contains(name))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DECLARATION DISCOVERY
// ═══════════════════════════════════════════════════════════════════════════════

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

fn is_ident_char(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

/// Bound names of a parameter list or destructuring pattern body.
pub fn pattern_names(pattern: &str) -> Vec<String> {
    let mut names = Vec::new();
    for piece in split_top_level(pattern, b',') {
        let piece = piece.trim().trim_start_matches("...");
        let target = match split_top_level(piece, b':').as_slice() {
            [_, value] => value.trim(),
            _ => piece,
        };
        let target = split_top_level(target, b'=')
            .first()
            .map(|s| s.trim())
            .unwrap_or("");
        if (target.starts_with('{') && target.ends_with('}'))
            || (target.starts_with('[') && target.ends_with(']'))
        {
            names.extend(pattern_names(&target[1..target.len() - 1]));
        } else if IDENTIFIER.is_match(target) {
            names.push(target.to_string());
        }
    }
    names
}

pub(crate) fn split_top_level(text: &str, separator: u8) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    let bytes = text.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            // `=>` and `==` are not pattern defaults
            b'=' if separator == b'=' && matches!(bytes.get(i + 1), Some(b'>' | b'=')) => {}
            _ if b == separator && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Names bound by the declarator list starting at `from`, stopping at `end`.
fn declarator_names(code: &CodeText, from: usize, end: usize) -> Vec<String> {
    let text = code.text();
    let bytes = text.as_bytes();
    let mut names = Vec::new();
    let mut i = from;

    loop {
        while i < end && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= end {
            break;
        }
        match bytes[i] {
            b'{' | b'[' => {
                let Some(close) = closing_bracket(code, i, end) else {
                    break;
                };
                names.extend(pattern_names(&text[i + 1..close]));
                i = close + 1;
            }
            b if is_ident_start(b) => {
                let start = i;
                while i < end && is_ident_char(bytes[i]) {
                    i += 1;
                }
                names.push(text[start..i].to_string());
            }
            _ => break,
        }

        // skip the initializer
        let mut depth = 0usize;
        while i < end {
            if code.is_code(i) {
                match bytes[i] {
                    b'(' | b'[' | b'{' => depth += 1,
                    b')' | b']' | b'}' if depth == 0 => return names,
                    b')' | b']' | b'}' => depth -= 1,
                    b',' if depth == 0 => break,
                    b';' if depth == 0 => return names,
                    _ => {}
                }
            }
            i += 1;
        }
        if i >= end {
            break;
        }
        i += 1;
    }
    names
}

fn closing_bracket(code: &CodeText, open: usize, end: usize) -> Option<usize> {
    let bytes = code.text().as_bytes();
    let mut depth = 0usize;
    for i in open..end {
        if !code.is_code(i) {
            continue;
        }
        match bytes[i] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Scope of a `let`/`const` in the `for (` header opening at `paren`: the next
/// block when the loop has one, otherwise up to the end of the loop statement.
fn loop_body_scope(code: &CodeText, paren: usize) -> BindingScope {
    let text = code.text();
    let bytes = text.as_bytes();
    let Some(close) = closing_bracket(code, paren, text.len()) else {
        return BindingScope::Parameters { function: false };
    };
    let body = code.skip_trivia(close + 1);
    if bytes.get(body) == Some(&b'{') {
        return BindingScope::Parameters { function: false };
    }
    let mut depth = 0usize;
    for i in body..bytes.len() {
        if !code.is_code(i) {
            continue;
        }
        match bytes[i] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' if depth == 0 => return BindingScope::Expression { until: i },
            b')' | b']' | b'}' => depth -= 1,
            b';' if depth == 0 => return BindingScope::Expression { until: i + 1 },
            _ => {}
        }
    }
    BindingScope::Expression { until: bytes.len() }
}

/// Every local declaration whose keyword lies in `range` and is live code.
pub fn find_local_declarations(code: &CodeText, range: Range<usize>) -> Vec<LocalDeclaration> {
    let text = code.text();
    let segment = &text[range.clone()];
    let base = range.start;
    let mut found = Vec::new();

    for m in DECLARATION.captures_iter(segment) {
        let whole = m.get(0).map(|g| g.range()).unwrap_or(0..0);
        if !code.is_code(base + whole.start) {
            continue;
        }
        let names = declarator_names(code, base + whole.end, range.end);
        let for_header = FOR_HEADER.find(&segment[..whole.start]);
        let scope = match (&m[1], for_header) {
            ("var", _) => BindingScope::Function,
            (_, Some(header)) => {
                let paren = header.as_str().find('(').map(|p| base + header.start() + p);
                paren.map_or(BindingScope::Parameters { function: false }, |p| loop_body_scope(code, p))
            }
            _ => BindingScope::Block,
        };
        found.push(LocalDeclaration {
            offset: base + whole.start,
            names,
            scope,
        });
    }

    for m in FUNCTION.captures_iter(segment) {
        let start = m.get(0).map(|g| g.start()).unwrap_or(0);
        if !code.is_code(base + start) {
            continue;
        }
        if let Some(name) = m.get(1) {
            found.push(LocalDeclaration {
                offset: base + start,
                names: vec![name.as_str().to_string()],
                scope: BindingScope::Block,
            });
        }
        found.push(LocalDeclaration {
            offset: base + start,
            names: pattern_names(&m[2]),
            scope: BindingScope::Parameters { function: true },
        });
    }

    for m in CATCH.captures_iter(segment) {
        let start = m.get(0).map(|g| g.start()).unwrap_or(0);
        if code.is_code(base + start) {
            found.push(LocalDeclaration {
                offset: base + start,
                names: pattern_names(&m[1]),
                scope: BindingScope::Parameters { function: false },
            });
        }
    }

    for m in CLASS.captures_iter(segment) {
        let start = m.get(0).map(|g| g.start()).unwrap_or(0);
        if code.is_code(base + start) {
            found.push(LocalDeclaration {
                offset: base + start,
                names: vec![m[1].to_string()],
                scope: BindingScope::Block,
            });
        }
    }

    for m in ARROW.captures_iter(segment) {
        let whole = m.get(0).map(|g| g.range()).unwrap_or(0..0);
        let arrow_at = base + whole.end - 2;
        if !code.is_code(arrow_at) || !code.is_code(base + whole.start) {
            continue;
        }
        let params = &m[1];
        let names = match params.strip_prefix('(').and_then(|p| p.strip_suffix(')')) {
            Some(inner) => pattern_names(inner),
            None => vec![params.to_string()],
        };
        let body = code.skip_trivia(base + whole.end);
        let scope = if text.as_bytes().get(body) == Some(&b'{') {
            BindingScope::Parameters { function: true }
        } else {
            BindingScope::Expression { until: range.end }
        };
        found.push(LocalDeclaration {
            offset: base + whole.start,
            names,
            scope,
        });
    }

    found.retain(|d| !d.names.is_empty());
    found.sort_by_key(|d| d.offset);
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MaskCache;
    use crate::mask::MaskMode;

    fn declarations(text: &str) -> Vec<LocalDeclaration> {
        let cache = MaskCache::new();
        let code = CodeText::new(text, MaskMode::Code, &cache);
        code.statement_ranges()
            .into_iter()
            .flat_map(|r| find_local_declarations(&code, r))
            .collect()
    }

    #[test]
    fn test_nested_frame_does_not_leak() {
        let mut stack = ScopeStack::new();
        stack.declare("outer");
        stack.push();
        assert!(stack.is_declared("outer", 0));
        stack.declare("inner");
        assert!(stack.is_declared("inner", 0));
        stack.pop();
        assert!(!stack.is_declared("inner", 0));
        assert!(stack.is_declared("outer", 0));
    }

    #[test]
    fn test_push_aliases_parent_until_declaration() {
        let mut stack = ScopeStack::new();
        stack.push();
        assert!(Rc::ptr_eq(&stack.frames[0].names, &stack.frames[1].names));
        stack.declare("x");
        assert!(!Rc::ptr_eq(&stack.frames[0].names, &stack.frames[1].names));
    }

    #[test]
    fn test_var_goes_to_function_frame() {
        let mut stack = ScopeStack::new();
        stack.push();
        stack.push();
        stack.declare_function_scoped("v");
        stack.pop();
        stack.pop();
        assert!(stack.is_declared("v", 0));
    }

    #[test]
    fn test_parameters_bind_in_next_block() {
        let mut stack = ScopeStack::new();
        stack.declare_pending("p", true);
        stack.push();
        assert!(stack.is_declared("p", 0));
        stack.pop();
        assert!(!stack.is_declared("p", 0));
    }

    #[test]
    fn test_let_const_var() {
        let found = declarations("let a = 1, b = f(1, 2);\nconst { c, d: e, ...rest } = o;\nvar [g, , h = 2] = xs;");
        assert_eq!(found[0].names, vec!["a", "b"]);
        assert_eq!(found[0].scope, BindingScope::Block);
        assert_eq!(found[1].names, vec!["c", "e", "rest"]);
        assert_eq!(found[2].names, vec!["g", "h"]);
        assert_eq!(found[2].scope, BindingScope::Function);
    }

    #[test]
    fn test_keywords_in_strings_are_ignored() {
        assert!(declarations("log('let x = 1');").is_empty());
    }

    #[test]
    fn test_function_and_catch() {
        let found = declarations("function helper(a, b = 2) {\n} try { } catch (err) { }");
        assert_eq!(found[0].names, vec!["helper"]);
        assert_eq!(found[1].names, vec!["a", "b"]);
        assert_eq!(found[1].scope, BindingScope::Parameters { function: true });
        assert_eq!(found[2].names, vec!["err"]);
        assert_eq!(found[2].scope, BindingScope::Parameters { function: false });
    }

    #[test]
    fn test_braceless_for_header_ends_with_the_loop() {
        let text = "for (let i = 0; i < 3; i++) sum(i);\nreturn i;";
        let found = declarations(text);
        assert_eq!(found[0].names, vec!["i"]);
        let end = text.find("sum(i);").unwrap() + "sum(i);".len();
        assert_eq!(found[0].scope, BindingScope::Expression { until: end });
    }

    #[test]
    fn test_arrow_forms() {
        let found = declarations("xs.map(x => x + 1);");
        assert_eq!(found[0].names, vec!["x"]);
        assert!(matches!(found[0].scope, BindingScope::Expression { .. }));

        let found = declarations("xs.forEach((item, i) => { use(item); });");
        assert_eq!(found[0].names, vec!["item", "i"]);
        assert_eq!(found[0].scope, BindingScope::Parameters { function: true });
    }

    #[test]
    fn test_for_header_binds_loop_block() {
        let found = declarations("for (const item of list) { }");
        assert_eq!(found[0].names, vec!["item"]);
        assert_eq!(found[0].scope, BindingScope::Parameters { function: false });
    }
}
