//! Class Parser
//!
//! Finds `class Name < Parent ... { ... }` blocks in a masked buffer and builds
//! the class table. Bodies mix declarations and element references; element
//! references are handed to the hierarchy parser.

use crate::declaration::parse_declaration;
use crate::hierarchy::parse_element;
use crate::search::CodeText;
use crate::validate::{
    validate_unique_members, ClassDefinition, ClassTable, Declaration, Diagnostic, Members,
    ParseFailure, Span, ERR_CLASS_CLOSE, ERR_CLASS_HEADER, ERR_CLASS_OPEN, ERR_INVALID_PROPERTY,
};
use regex::Regex;

lazy_static::lazy_static! {
    static ref CLASS_HEADER: Regex = Regex::new(
        r"^class\s+([A-Za-z_$][A-Za-z0-9_$]*)((?:\s*<\s*[A-Za-z_$][A-Za-z0-9_$]*)*)\s*$"
    ).unwrap();
    static ref PARENT: Regex = Regex::new(r"<\s*([A-Za-z_$][A-Za-z0-9_$]*)").unwrap();
    static ref ELEMENT_HEADER: Regex = Regex::new(
        r"^[A-Za-z0-9_$\-]*(\.[A-Za-z_$][A-Za-z0-9_$\-]*)*$"
    ).unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATEMENT CLASSIFICATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Statement {
    End,
    Empty,
    Declaration,
    Element,
    Unknown,
}

/// Looks at the statement starting at `at` (trivia already skipped) inside a block body.
pub(crate) fn classify_statement(code: &CodeText, at: usize) -> Statement {
    let text = code.text();
    let bytes = text.as_bytes();
    match bytes.get(at) {
        None | Some(b'}') => return Statement::End,
        Some(b';') => return Statement::Empty,
        _ => {}
    }
    let from = if bytes[at] == b':' { at + 1 } else { at };
    match code.find_any(b":;{}", from) {
        Some((_, b':')) => Statement::Declaration,
        Some((i, b';' | b'{')) if is_element_header(&text[at..i]) => Statement::Element,
        _ => Statement::Unknown,
    }
}

pub(crate) fn is_element_header(header: &str) -> bool {
    let header = header.trim();
    !header.is_empty() && ELEMENT_HEADER.is_match(header)
}

/// End of the statement at `at`, for diagnostic spans.
pub(crate) fn statement_end(code: &CodeText, at: usize) -> usize {
    code.find_any(b";{}", at)
        .map(|(i, _)| i + 1)
        .unwrap_or(code.len())
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLASS PARSER
// ═══════════════════════════════════════════════════════════════════════════════

/// Next `class` keyword at block depth 0, preceded by whitespace, `;`, `}` or
/// start-of-text and followed by whitespace.
fn find_class_keyword(code: &CodeText, from: usize) -> Option<usize> {
    let bytes = code.text().as_bytes();
    let mut depth = 0usize;
    for i in from..bytes.len() {
        if !code.is_code(i) {
            continue;
        }
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            b'c' if depth == 0 && bytes[i..].starts_with(b"class") => {
                let before_ok = i == 0 || matches!(bytes[i - 1], b';' | b'}') || bytes[i - 1].is_ascii_whitespace();
                let after_ok = bytes.get(i + 5).map_or(false, |b| b.is_ascii_whitespace());
                if before_ok && after_ok {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses every class block from `from` to the end of the buffer.
///
/// On error the returned failure carries the classes parsed so far (including the
/// partially filled failing class) and the offset just past the failing class.
pub fn parse_classes(
    code: &CodeText,
    from: usize,
    file: &str,
) -> Result<ClassTable, ParseFailure<ClassTable>> {
    let text = code.text();
    let mut table = ClassTable::new();
    let mut pos = from;

    while let Some(at) = find_class_keyword(code, pos) {
        let open = match code.find_any(b"{;}", at) {
            Some((open, b'{')) => open,
            other => {
                return Err(ParseFailure {
                    diagnostic: Diagnostic::at(
                        ERR_CLASS_OPEN,
                        "Missing { for class definition",
                        file,
                        text,
                        Span::new(at, at + 5),
                    ),
                    partial: table,
                    resume_at: other.map(|(i, _)| i + 1).unwrap_or(text.len()),
                })
            }
        };

        let Some(close) = code.matching_close(open) else {
            return Err(ParseFailure {
                diagnostic: Diagnostic::at(
                    ERR_CLASS_CLOSE,
                    "Missing } for class definition",
                    file,
                    text,
                    Span::new(at, open + 1),
                ),
                partial: table,
                resume_at: text.len(),
            });
        };

        let header = text[at..open].trim();
        let Some(caps) = CLASS_HEADER.captures(header) else {
            return Err(ParseFailure {
                diagnostic: Diagnostic::at(
                    ERR_CLASS_HEADER,
                    "Class declaration is invalid",
                    file,
                    text,
                    Span::new(at, open),
                ),
                partial: table,
                resume_at: close + 1,
            });
        };
        let name = caps[1].to_string();
        let parents = PARENT
            .captures_iter(&caps[2])
            .map(|c| c[1].to_string())
            .collect();

        let mut class = ClassDefinition {
            name: name.clone(),
            parents,
            members: Members::default(),
            children: Vec::new(),
            source_file: file.to_string(),
            span: Span::new(at, close + 1),
        };
        let mut declarations = Vec::new();

        let checked = parse_class_body(code, open, close, file, &mut class, &mut declarations)
            .and_then(|_| {
                validate_unique_members(&name, &declarations, &class.children, file, text)
            });
        if table.contains_key(&name) {
            tracing::debug!(class = %name, "class redeclared, later declaration wins");
        }
        table.insert(name, class);

        if let Err(diagnostic) = checked {
            return Err(ParseFailure {
                diagnostic,
                partial: table,
                resume_at: close + 1,
            });
        }
        pos = close + 1;
    }

    Ok(table)
}

fn parse_class_body(
    code: &CodeText,
    open: usize,
    close: usize,
    file: &str,
    class: &mut ClassDefinition,
    declarations: &mut Vec<Declaration>,
) -> Result<(), Diagnostic> {
    let text = code.text();
    let mut pos = open + 1;
    loop {
        pos = code.skip_trivia(pos);
        if pos >= close {
            return Ok(());
        }
        match classify_statement(code, pos) {
            Statement::End => return Ok(()),
            Statement::Empty => pos += 1,
            Statement::Declaration => match parse_declaration(code, pos, file)? {
                Some((decl, next)) => {
                    declarations.push(decl.clone());
                    class.members.insert(decl);
                    pos = next;
                }
                None => return Ok(()),
            },
            Statement::Element => {
                let (element, next) = parse_element(code, pos, file)?;
                class.children.push(element);
                pos = next;
            }
            Statement::Unknown => {
                return Err(Diagnostic::at(
                    ERR_INVALID_PROPERTY,
                    "The property is invalid",
                    file,
                    text,
                    Span::new(pos, statement_end(code, pos)),
                ))
            }
        }
    }
}

/// Parses all classes, re-entering after each failure so independent errors in
/// later classes are still reported. Partial tables are merged in order.
pub fn parse_classes_recovering(code: &CodeText, file: &str) -> (ClassTable, Vec<Diagnostic>) {
    let mut table = ClassTable::new();
    let mut errors = Vec::new();
    let mut pos = 0;
    loop {
        match parse_classes(code, pos, file) {
            Ok(found) => {
                table.extend(found);
                return (table, errors);
            }
            Err(failure) => {
                tracing::debug!(
                    message = %failure.diagnostic.message,
                    resume_at = failure.resume_at,
                    "class parse failed, resuming"
                );
                table.extend(failure.partial);
                errors.push(failure.diagnostic);
                if failure.resume_at <= pos || failure.resume_at >= code.len() {
                    return (table, errors);
                }
                pos = failure.resume_at;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MaskCache;
    use crate::mask::MaskMode;

    fn classes(text: &str) -> Result<ClassTable, ParseFailure<ClassTable>> {
        let cache = MaskCache::new();
        let code = CodeText::new(text, MaskMode::Declarations, &cache);
        parse_classes(&code, 0, "test.nazca")
    }

    #[test]
    fn test_header_with_parents() {
        let table = classes("class Button < Base < button { color: red; }").unwrap();
        let button = &table["Button"];
        assert_eq!(button.parents, vec!["Base", "button"]);
        assert_eq!(button.members.style.len(), 1);
    }

    #[test]
    fn test_keyword_inside_identifier_or_string_is_ignored() {
        let table = classes("subclass X { }; text: 'class Y { }'; class Z { }").unwrap();
        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["Z"]);
    }

    #[test]
    fn test_invalid_header() {
        let failure = classes("class 9Lives { }").unwrap_err();
        assert_eq!(failure.diagnostic.code.as_deref(), Some(ERR_CLASS_HEADER));
        assert_eq!(failure.diagnostic.message, "Class declaration is invalid");
    }

    #[test]
    fn test_missing_open_brace() {
        let failure = classes("class A;").unwrap_err();
        assert_eq!(failure.diagnostic.code.as_deref(), Some(ERR_CLASS_OPEN));
    }

    #[test]
    fn test_unrecognized_body_statement() {
        let failure = classes("class A { a b c; }").unwrap_err();
        assert_eq!(failure.diagnostic.message, "The property is invalid");
        assert!(failure.partial.contains_key("A"));
    }

    #[test]
    fn test_later_declaration_overwrites() {
        let table = classes("class A { x: 1; } class A { y: 2; }").unwrap();
        assert_eq!(table.len(), 1);
        assert!(table["A"].members.variables.public.contains_key("y"));
        assert!(!table["A"].members.variables.public.contains_key("x"));
    }
}
