//! Linting collaborator for embedded behavior bodies.
//!
//! The core hands over one raw body at a time; findings come back as plain
//! records and are turned into warning diagnostics by the analysis driver.

use oxc_allocator::Allocator;
use oxc_ast::ast::Statement;
use oxc_ast_visit::Visit;
use oxc_parser::Parser;
use oxc_span::SourceType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LintRequest {
    /// Body text including its braces.
    pub body: String,
    pub parameters: Vec<String>,
    /// 1-based line of the body's opening brace in its owning file.
    pub line_offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LintFinding {
    pub message: String,
    /// 1-based line in the owning file.
    pub line: u32,
    /// 1-based character on that line.
    pub character: u32,
}

pub trait Linter: Sync {
    fn lint(&self, request: &LintRequest) -> Vec<LintFinding>;
}

/// Parses each body as a function expression and reports syntax errors and
/// forgotten `debugger` statements.
#[derive(Debug, Clone, Copy, Default)]
pub struct OxcLinter;

struct DebuggerFinder {
    offsets: Vec<u32>,
}

impl<'a> Visit<'a> for DebuggerFinder {
    fn visit_statement(&mut self, it: &Statement<'a>) {
        if let Statement::DebuggerStatement(stmt) = it {
            self.offsets.push(stmt.span.start);
        }
        oxc_ast_visit::walk::walk_statement(self, it);
    }
}

impl OxcLinter {
    fn finding(request: &LintRequest, prefix: usize, offset: usize, message: String) -> LintFinding {
        let body = &request.body;
        let mut at = offset.saturating_sub(prefix).min(body.len());
        while !body.is_char_boundary(at) {
            at -= 1;
        }
        let before = &body[..at];
        let line = before.matches('\n').count() as u32;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        LintFinding {
            message,
            line: request.line_offset + line,
            character: before[line_start..].chars().count() as u32 + 1,
        }
    }
}

impl Linter for OxcLinter {
    fn lint(&self, request: &LintRequest) -> Vec<LintFinding> {
        let prefix = format!("(function ({}) ", request.parameters.join(", "));
        let source = format!("{}{});", prefix, request.body);

        let allocator = Allocator::default();
        let source_type = SourceType::default().with_module(false);
        let ret = Parser::new(&allocator, &source, source_type).parse();

        let mut findings: Vec<LintFinding> = ret
            .errors
            .iter()
            .map(|error| {
                let offset = error
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.first())
                    .map(|label| label.offset())
                    .unwrap_or(prefix.len());
                Self::finding(request, prefix.len(), offset, error.to_string())
            })
            .collect();

        if ret.errors.is_empty() {
            let mut finder = DebuggerFinder { offsets: Vec::new() };
            finder.visit_program(&ret.program);
            findings.extend(finder.offsets.into_iter().map(|offset| {
                Self::finding(
                    request,
                    prefix.len(),
                    offset as usize,
                    "Forgotten 'debugger' statement?".to_string(),
                )
            }));
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lint(body: &str, line_offset: u32) -> Vec<LintFinding> {
        OxcLinter.lint(&LintRequest {
            body: body.to_string(),
            parameters: vec!["a".to_string(), "b".to_string()],
            line_offset,
        })
    }

    #[test]
    fn test_clean_body() {
        assert!(lint("{ return a + b; }", 1).is_empty());
    }

    #[test]
    fn test_debugger_position() {
        let findings = lint("{\n  let x = a;\n  debugger;\n}", 10);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].message, "Forgotten 'debugger' statement?");
        assert_eq!(findings[0].line, 12);
        assert_eq!(findings[0].character, 3);
    }

    #[test]
    fn test_syntax_error_reported() {
        let findings = lint("{\n  return a +;\n}", 5);
        assert!(!findings.is_empty());
        assert!(findings.iter().all(|f| f.line >= 5));
    }
}
