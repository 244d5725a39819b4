//! Identifier Scope Rewriter
//!
//! Qualifies free references to class members inside one behavior body so they
//! bind to the instance receiver. Everything that is not rewritten is copied
//! byte for byte.

use crate::cache::MaskCache;
use crate::mask::MaskMode;
use crate::scope::{find_local_declarations, pattern_names, LocalDeclaration, ScopeStack};
use crate::search::CodeText;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const RECEIVER: &str = "__nazcaThis";
pub const PROTECTED_NAMESPACE: &str = "__nazcaProtected";
pub const GLOBAL_NAMESPACE: &str = "window";

/// How the body runs once emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BodyContext {
    /// Inside an instance; protected names live on the receiver.
    Instance,
    /// Top-level behavior outside any instance; protected names are global.
    FreeStanding,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvableNames {
    pub public: HashSet<String>,
    pub protected: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Form {
    Bare,
    Subscript,
}

#[derive(Debug)]
enum Event<'n> {
    Open,
    Close,
    Declare(LocalDeclaration),
    Reference { len: usize, name: &'n str, form: Form },
}

fn is_identifier(name: &str) -> bool {
    let mut bytes = name.bytes();
    matches!(bytes.next(), Some(b) if b.is_ascii_alphabetic() || b == b'_' || b == b'$')
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'$')
}

fn is_word(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'$')
}

/// Part of a longer word, or a property read (`a.x`, but not the spread `...x`).
fn joins_before(bytes: &[u8], at: usize) -> bool {
    match at.checked_sub(1).map(|i| bytes[i]) {
        Some(b'.') => !(at >= 3 && &bytes[at - 3..at] == b"..."),
        Some(b) => is_word(b),
        None => false,
    }
}

/// Part of a longer word, or an object key (`{ x: 1 }`, `, x: 1`).
fn joins_after(bytes: &[u8], at: usize, end: usize) -> bool {
    match bytes.get(end).copied() {
        Some(b) if is_word(b) => return true,
        None => return false,
        _ => {}
    }
    let next = bytes[end..].iter().position(|b| !b.is_ascii_whitespace()).map(|p| end + p);
    if next.map(|i| bytes[i]) != Some(b':') {
        return false;
    }
    let prev = bytes[..at].iter().rposition(|b| !b.is_ascii_whitespace());
    matches!(prev.map(|i| bytes[i]), Some(b'{' | b','))
}

fn qualified(name: &str, form: Form, occurrence: &str, protected: bool, context: BodyContext) -> String {
    let base = match (protected, context) {
        (false, _) => RECEIVER.to_string(),
        (true, BodyContext::Instance) => format!("{}.{}", RECEIVER, PROTECTED_NAMESPACE),
        (true, BodyContext::FreeStanding) => GLOBAL_NAMESPACE.to_string(),
    };
    match form {
        Form::Subscript => format!("{}{}", base, occurrence),
        Form::Bare if is_identifier(name) => format!("{}.{}", base, name),
        Form::Bare => format!("{}['{}']", base, name),
    }
}

/// Live occurrences of `name` in its bare and quoted-subscript forms.
fn references<'n>(code: &CodeText, name: &'n str, out: &mut Vec<(usize, Event<'n>)>) {
    let bytes = code.text().as_bytes();
    let forms = [
        (name.to_string(), Form::Bare),
        (format!("['{}']", name), Form::Subscript),
        (format!("[\"{}\"]", name), Form::Subscript),
        (format!("[`{}`]", name), Form::Subscript),
    ];
    for (pattern, form) in forms {
        let mut from = 0;
        while let Some(at) = code.index_of(&pattern, from) {
            from = at + pattern.len();
            if joins_before(bytes, at) || joins_after(bytes, at, at + pattern.len()) {
                continue;
            }
            out.push((
                at,
                Event::Reference {
                    len: pattern.len(),
                    name,
                    form,
                },
            ));
        }
    }
}

/// Rewrites every free resolvable name in `body`. `excluded` are the body's
/// parameters as written (defaults, rest and patterns allowed); every name they
/// bind shadows members for the whole body.
///
/// Run once per body: qualified forms are themselves identifiers and a second
/// pass with a different table could match them again.
pub fn rewrite(
    body: &str,
    names: &ResolvableNames,
    excluded: &[String],
    context: BodyContext,
    cache: &MaskCache,
) -> String {
    let code = CodeText::new(body, MaskMode::Code, cache);
    let bytes = body.as_bytes();

    let mut events: Vec<(usize, Event)> = Vec::new();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'{' if code.is_code(i) => events.push((i, Event::Open)),
            b'}' if code.is_code(i) => events.push((i, Event::Close)),
            _ => {}
        }
    }
    for range in code.statement_ranges() {
        for declaration in find_local_declarations(&code, range) {
            events.push((declaration.offset, Event::Declare(declaration)));
        }
    }
    let bound: HashSet<String> = excluded.iter().flat_map(|p| pattern_names(p)).collect();
    let mut candidates: Vec<&str> = names
        .public
        .iter()
        .chain(names.protected.iter())
        .map(String::as_str)
        .filter(|n| !bound.contains(*n))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    candidates.sort_unstable();
    for &name in &candidates {
        if body.contains(name) {
            references(&code, name, &mut events);
        }
    }
    events.sort_by_key(|(offset, _)| *offset);

    let mut scopes = ScopeStack::new();
    let mut replacements: Vec<(usize, usize, String)> = Vec::new();
    let mut covered_until = 0;
    for (offset, event) in events {
        match event {
            Event::Open => scopes.push(),
            Event::Close => scopes.pop(),
            Event::Declare(declaration) => scopes.apply(&declaration),
            Event::Reference { len, name, form } => {
                // `x` and `['x']` can overlap only if one contains the other; keep the first.
                if offset < covered_until || scopes.is_declared(name, offset) {
                    continue;
                }
                let protected = names.protected.contains(name);
                let occurrence = &body[offset..offset + len];
                replacements.push((offset, len, qualified(name, form, occurrence, protected, context)));
                covered_until = offset + len;
            }
        }
    }

    tracing::trace!(replacements = replacements.len(), "rewrote body");
    let mut out = body.to_string();
    for (offset, len, text) in replacements.into_iter().rev() {
        out.replace_range(offset..offset + len, &text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(public: &[&str], protected: &[&str]) -> ResolvableNames {
        ResolvableNames {
            public: public.iter().map(|s| s.to_string()).collect(),
            protected: protected.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn run(body: &str, n: &ResolvableNames, context: BodyContext) -> String {
        rewrite(body, n, &[], context, &MaskCache::new())
    }

    #[test]
    fn test_protected_instance_form() {
        let out = run("{ return x; }", &names(&[], &["x"]), BodyContext::Instance);
        assert_eq!(out, "{ return __nazcaThis.__nazcaProtected.x; }");
    }

    #[test]
    fn test_protected_free_standing_form() {
        let out = run("{ x = 2; }", &names(&[], &["x"]), BodyContext::FreeStanding);
        assert_eq!(out, "{ window.x = 2; }");
    }

    #[test]
    fn test_public_and_subscript_forms() {
        let n = names(&["color"], &[]);
        let out = run("{ color = 'red'; this['color']; ['color']; }", &n, BodyContext::Instance);
        assert_eq!(out, "{ __nazcaThis.color = 'red'; this['color']; __nazcaThis['color']; }");
    }

    #[test]
    fn test_word_boundaries() {
        let n = names(&["text"], &[]);
        let out = run("{ a.text; texts; my_text; { text: 1 }; text; }", &n, BodyContext::Instance);
        assert_eq!(out, "{ a.text; texts; my_text; { text: 1 }; __nazcaThis.text; }");
    }

    #[test]
    fn test_literals_untouched() {
        let n = names(&["x"], &[]);
        let out = run("{ s = 'x' + `x ${x}` + \"x\"; // x\n /* x */ }", &n, BodyContext::Instance);
        assert_eq!(out, "{ s = 'x' + `x ${__nazcaThis.x}` + \"x\"; // x\n /* x */ }");
    }

    #[test]
    fn test_let_shadows_in_block_only() {
        let n = names(&["x"], &[]);
        let out = run("{ if (a) { let x = 1; use(x); } use(x); }", &n, BodyContext::Instance);
        assert_eq!(out, "{ if (a) { let x = 1; use(x); } use(__nazcaThis.x); }");
    }

    #[test]
    fn test_outer_local_visible_in_nested_block() {
        let n = names(&["x"], &[]);
        let out = run("{ const x = 1; if (a) { use(x); } }", &n, BodyContext::Instance);
        assert_eq!(out, "{ const x = 1; if (a) { use(x); } }");
    }

    #[test]
    fn test_var_is_function_scoped() {
        let n = names(&["v"], &[]);
        let out = run("{ if (a) { var v = 1; } use(v); }", &n, BodyContext::Instance);
        assert_eq!(out, "{ if (a) { var v = 1; } use(v); }");
    }

    #[test]
    fn test_parameters_are_excluded() {
        let n = names(&["value", "text"], &[]);
        let out = rewrite("{ text = value; }", &n, &["value".to_string()], BodyContext::Instance, &MaskCache::new());
        assert_eq!(out, "{ __nazcaThis.text = value; }");
    }

    #[test]
    fn test_defaulted_rest_and_pattern_parameters_are_excluded() {
        let n = names(&["a", "b", "c", "d"], &[]);
        let params = ["b = 2".to_string(), "...c".to_string(), "{ d }".to_string()];
        let out = rewrite("{ return a + b + c + d; }", &n, &params, BodyContext::Instance, &MaskCache::new());
        assert_eq!(out, "{ return __nazcaThis.a + b + c + d; }");
    }

    #[test]
    fn test_spread_and_ternary_operands() {
        let n = names(&["items", "text"], &[]);
        assert_eq!(
            run("{ return [...items]; }", &n, BodyContext::Instance),
            "{ return [...__nazcaThis.items]; }"
        );
        assert_eq!(
            run("{ return a ? text: 'x'; }", &n, BodyContext::Instance),
            "{ return a ? __nazcaThis.text: 'x'; }"
        );
        assert_eq!(
            run("{ f({ a: 1, text: 2 }); }", &n, BodyContext::Instance),
            "{ f({ a: 1, text: 2 }); }"
        );
    }

    #[test]
    fn test_braceless_for_binding_ends_with_the_loop() {
        let n = names(&["i"], &[]);
        let out = run("{ for (let i = 0; i < 3; i++) sum(i);\n return i; }", &n, BodyContext::Instance);
        assert_eq!(out, "{ for (let i = 0; i < 3; i++) sum(i);\n return __nazcaThis.i; }");
    }

    #[test]
    fn test_callback_parameters_shadow() {
        let n = names(&["item", "x"], &[]);
        let out = run("{ xs.forEach((item) => { use(item); }); xs.map(x => x * 2); use(item, x); }", &n, BodyContext::Instance);
        assert_eq!(
            out,
            "{ xs.forEach((item) => { use(item); }); xs.map(x => x * 2); use(__nazcaThis.item, __nazcaThis.x); }"
        );
    }

    #[test]
    fn test_non_identifier_names_use_brackets() {
        let n = names(&["@click", "$title"], &[]);
        let out = run("{ @click(); $title = 'a'; }", &n, BodyContext::Instance);
        assert_eq!(out, "{ __nazcaThis['@click'](); __nazcaThis.$title = 'a'; }");
    }

    #[test]
    fn test_no_names_is_identity() {
        let body = "{ let a = '}'; return a; }";
        assert_eq!(run(body, &names(&[], &[]), BodyContext::Instance), body);
    }
}
