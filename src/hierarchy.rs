//! Hierarchy Parser
//!
//! Parses the visible element tree outside class blocks, plus the top-level
//! directives that live next to it (`*include`, `*json`, `*font-face`).

use crate::declaration::parse_declaration;
use crate::parse::{classify_statement, is_element_header, statement_end, Statement};
use crate::search::CodeText;
use crate::validate::{
    DataImport, Diagnostic, ElementNode, FontFace, Members, ParseFailure, Span, ERR_CLASS_OPEN,
    ERR_DATA_IMPORT, ERR_ELEMENT_BLOCK, ERR_UNRECOGNIZED_STATEMENT,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static::lazy_static! {
    static ref DIRECTIVE: Regex = Regex::new(r"^\*(include|json)\b").unwrap();
    static ref FONT_FACE: Regex = Regex::new(r"^\*font-face\b").unwrap();
    static ref CLASS_START: Regex = Regex::new(r"^class\s").unwrap();
    static ref DATA_IMPORT: Regex = Regex::new(r"^([A-Za-z_$][A-Za-z0-9_$]*)\s*=\s*(\S+)$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hierarchy {
    pub roots: Vec<ElementNode>,
    pub font_faces: Vec<FontFace>,
}

impl Hierarchy {
    fn extend(&mut self, other: Hierarchy) {
        self.roots.extend(other.roots);
        self.font_faces.extend(other.font_faces);
    }
}

/// Parses top-level statements from `from` to the end of the buffer.
pub fn parse_children(
    code: &CodeText,
    from: usize,
    file: &str,
) -> Result<Hierarchy, ParseFailure<Hierarchy>> {
    let text = code.text();
    let bytes = text.as_bytes();
    let mut hierarchy = Hierarchy::default();
    let mut pos = from;

    loop {
        pos = code.skip_trivia(pos);
        if pos >= bytes.len() {
            return Ok(hierarchy);
        }
        let rest = &text[pos..];

        if bytes[pos] == b';' {
            pos += 1;
        } else if DIRECTIVE.is_match(rest) {
            pos = statement_end(code, pos);
        } else if FONT_FACE.is_match(rest) {
            match font_face(code, pos, file) {
                Ok((face, next)) => {
                    hierarchy.font_faces.push(face);
                    pos = next;
                }
                Err((diagnostic, resume_at)) => {
                    return Err(ParseFailure {
                        diagnostic,
                        partial: hierarchy,
                        resume_at,
                    })
                }
            }
        } else if CLASS_START.is_match(rest) {
            match code.find_any(b"{;}", pos) {
                Some((open, b'{')) => match code.matching_close(open) {
                    Some(close) => pos = skip_semicolon(code, close + 1),
                    // the class parser reports the missing brace
                    None => return Ok(hierarchy),
                },
                other => {
                    return Err(ParseFailure {
                        diagnostic: Diagnostic::at(
                            ERR_CLASS_OPEN,
                            "Class should have an opening bracket",
                            file,
                            text,
                            Span::new(pos, pos + 5),
                        ),
                        partial: hierarchy,
                        resume_at: other.map(|(i, _)| i + 1).unwrap_or(bytes.len()),
                    })
                }
            }
        } else if classify_statement(code, pos) == Statement::Element {
            match parse_element(code, pos, file) {
                Ok((element, next)) => {
                    hierarchy.roots.push(element);
                    pos = next;
                }
                Err(diagnostic) => {
                    let resume_at = element_extent(code, pos);
                    return Err(ParseFailure {
                        diagnostic,
                        partial: hierarchy,
                        resume_at,
                    });
                }
            }
        } else {
            return Err(ParseFailure {
                diagnostic: Diagnostic::at(
                    ERR_UNRECOGNIZED_STATEMENT,
                    "The statement is not recognized. Should be *include, *json, *font-face, class or hierarchy",
                    file,
                    text,
                    Span::new(pos, statement_end(code, pos)),
                ),
                partial: hierarchy,
                resume_at: statement_end(code, pos),
            });
        }
    }
}

/// Parses the whole buffer, re-entering after each failure.
pub fn parse_hierarchy_recovering(code: &CodeText, file: &str) -> (Hierarchy, Vec<Diagnostic>) {
    let mut hierarchy = Hierarchy::default();
    let mut errors = Vec::new();
    let mut pos = 0;
    loop {
        match parse_children(code, pos, file) {
            Ok(found) => {
                hierarchy.extend(found);
                return (hierarchy, errors);
            }
            Err(failure) => {
                hierarchy.extend(failure.partial);
                errors.push(failure.diagnostic);
                if failure.resume_at <= pos || failure.resume_at >= code.len() {
                    return (hierarchy, errors);
                }
                pos = failure.resume_at;
            }
        }
    }
}

/// Where a failed element at `at` ends, so parsing resumes after all of it.
fn element_extent(code: &CodeText, at: usize) -> usize {
    match code.find_any(b"{;", at) {
        Some((open, b'{')) => code
            .matching_close(open)
            .map(|close| skip_semicolon(code, close + 1))
            .unwrap_or(code.len()),
        Some((semi, _)) => semi + 1,
        None => code.len(),
    }
}

fn skip_semicolon(code: &CodeText, from: usize) -> usize {
    let next = code.skip_trivia(from);
    if code.text().as_bytes().get(next) == Some(&b';') {
        next + 1
    } else {
        from
    }
}

fn font_face(code: &CodeText, at: usize, file: &str) -> Result<(FontFace, usize), (Diagnostic, usize)> {
    let text = code.text();
    let fail = |message: &str| {
        let end = statement_end(code, at);
        (
            Diagnostic::at(ERR_UNRECOGNIZED_STATEMENT, message, file, text, Span::new(at, end)),
            end,
        )
    };
    let open = match code.find_any(b"{;", at) {
        Some((open, b'{')) => open,
        _ => return Err(fail("*font-face should be followed by a { ... } block")),
    };
    let close = code
        .matching_close(open)
        .ok_or_else(|| fail("Missing } for *font-face"))?;
    Ok((
        FontFace {
            block: format!("@font-face {}", &text[open..=close]),
            span: Span::new(at, close + 1),
        },
        skip_semicolon(code, close + 1),
    ))
}

// ═══════════════════════════════════════════════════════════════════════════════
// ELEMENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Parses `name.ClassA.ClassB;` or `name.ClassA { ... }` at `at`.
pub fn parse_element(code: &CodeText, at: usize, file: &str) -> Result<(ElementNode, usize), Diagnostic> {
    let text = code.text();
    let (end, terminator) = code.find_any(b";{", at).ok_or_else(|| {
        Diagnostic::at(
            ERR_ELEMENT_BLOCK,
            "An element should end with ; or have a { ... } body",
            file,
            text,
            Span::new(at, text.len()),
        )
    })?;

    let header = text[at..end].trim();
    if !is_element_header(header) {
        return Err(Diagnostic::at(
            ERR_UNRECOGNIZED_STATEMENT,
            &format!("Invalid element reference '{}'", header),
            file,
            text,
            Span::new(at, end),
        ));
    }
    let mut segments = header.split('.');
    let name = segments
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let class_refs = segments.map(str::to_string).collect();

    let mut element = ElementNode {
        name,
        class_refs,
        overrides: Members::default(),
        children: Vec::new(),
        span: Span::new(at, end + 1),
    };

    if terminator == b';' {
        return Ok((element, end + 1));
    }

    let close = code.matching_close(end).ok_or_else(|| {
        Diagnostic::at(
            ERR_ELEMENT_BLOCK,
            &format!("Missing }} for element '{}'", header),
            file,
            text,
            Span::new(at, end + 1),
        )
    })?;

    let mut pos = end + 1;
    loop {
        pos = code.skip_trivia(pos);
        if pos >= close {
            break;
        }
        match classify_statement(code, pos) {
            Statement::End => break,
            Statement::Empty => pos += 1,
            Statement::Declaration => match parse_declaration(code, pos, file)? {
                Some((decl, next)) => {
                    element.overrides.insert(decl);
                    pos = next;
                }
                None => break,
            },
            Statement::Element => {
                let (child, next) = parse_element(code, pos, file)?;
                element.children.push(child);
                pos = next;
            }
            Statement::Unknown => {
                return Err(Diagnostic::at(
                    ERR_UNRECOGNIZED_STATEMENT,
                    "The statement is not recognized. Should be a property or a child element",
                    file,
                    text,
                    Span::new(pos, statement_end(code, pos)),
                ))
            }
        }
    }

    element.span = Span::new(at, close + 1);
    Ok((element, skip_semicolon(code, close + 1)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// DATA IMPORTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Collects `*json: name=path;` directives.
pub fn list_data_imports(code: &CodeText, file: &str) -> (Vec<DataImport>, Vec<Diagnostic>) {
    let text = code.text();
    let mut imports = Vec::new();
    let mut errors = Vec::new();
    let mut pos = 0;

    while let Some(at) = code.index_of("*json", pos) {
        let end = statement_end(code, at);
        pos = end.max(at + 1);
        let body = text[at + 5..end].trim_end_matches(';').trim();
        let parsed = body
            .strip_prefix(':')
            .map(str::trim)
            .and_then(|value| DATA_IMPORT.captures(value));
        match parsed {
            Some(caps) if text[..end].ends_with(';') => imports.push(DataImport {
                name: caps[1].to_string(),
                path: caps[2].trim_matches(|c| c == '\'' || c == '"').to_string(),
                span: Span::new(at, end),
            }),
            _ => errors.push(Diagnostic::at(
                ERR_DATA_IMPORT,
                "*json directive is invalid. Should be in format of '*json: objectName=path/to/file.json;'",
                file,
                text,
                Span::new(at, end),
            )),
        }
    }

    (imports, errors)
}
