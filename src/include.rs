//! Include Resolver
//!
//! Expands `*include: path;` directives depth-first, pre-order, and records
//! which original file and line every line of the flattened buffer came from.

use crate::cache::MaskCache;
use crate::mask::MaskMode;
use crate::search::CodeText;
use crate::validate::{
    line_column, Diagnostic, Position, Span, ERR_CIRCULAR_INCLUDE, ERR_INVALID_INCLUDE,
    ERR_MISSING_INCLUDE, ERR_SOURCE_UNREADABLE,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::ops::Range;
use std::path::{Component, Path, PathBuf};

// ═══════════════════════════════════════════════════════════════════════════════
// SOURCE READERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Capability used to load sources. Sibling includes are read concurrently.
pub trait SourceReader: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsSourceReader;

impl SourceReader for FsSourceReader {
    fn read(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// In-memory sources keyed by normalized path.
#[derive(Debug, Clone, Default)]
pub struct MemorySourceReader {
    files: HashMap<PathBuf, String>,
}

impl MemorySourceReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, source: impl Into<String>) -> Self {
        self.files.insert(normalize_path(path.as_ref()), source.into());
        self
    }
}

impl SourceReader for MemorySourceReader {
    fn read(&self, path: &Path) -> io::Result<String> {
        self.files
            .get(&normalize_path(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }
}

/// Lexically resolves `.` and `..` so the same file reached two ways compares equal.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION MAP
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Region {
    /// 0-based first line of the region in the flattened buffer.
    flat_line: u32,
    file: usize,
    /// 0-based line in `file` that `flat_line` came from.
    line: u32,
}

/// Maps flattened-buffer lines back to the file and line that contributed them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionMap {
    files: Vec<String>,
    regions: Vec<Region>,
}

impl PositionMap {
    fn add_region(&mut self, region: Region) {
        match self.regions.last_mut() {
            Some(last) if last.flat_line == region.flat_line => *last = region,
            _ => self.regions.push(region),
        }
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Original `(file, line)` of a 1-based flattened line.
    pub fn original_line(&self, flat_line: u32) -> Option<(&str, u32)> {
        let flat = flat_line.checked_sub(1)?;
        let index = self.regions.partition_point(|r| r.flat_line <= flat);
        let region = self.regions.get(index.checked_sub(1)?)?;
        let file = self.files.get(region.file)?;
        Some((file.as_str(), region.line + (flat - region.flat_line) + 1))
    }

    /// File that contributed the byte at `offset` of the flattened `text`.
    pub fn file_at(&self, text: &str, offset: usize) -> Option<&str> {
        let (line, _) = line_column(text, offset);
        self.original_line(line).map(|(file, _)| file)
    }

    /// Rewrites a diagnostic's file and lines from flattened to original coordinates.
    pub fn relocate(&self, diagnostic: &mut Diagnostic) {
        let start = diagnostic.line.start();
        let end = diagnostic.line.end();
        let Some((file, start_line)) = self.original_line(start) else {
            return;
        };
        let file = file.to_string();
        let end_line = match self.original_line(end) {
            Some((end_file, line)) if end_file == file => line,
            _ => start_line,
        };
        diagnostic.file = file;
        diagnostic.line = if start_line == end_line {
            Position::Point(start_line)
        } else {
            Position::Range(start_line, end_line)
        };
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXPANSION
// ═══════════════════════════════════════════════════════════════════════════════

/// One expanded `*include` directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncludeRecord {
    /// File holding the directive.
    pub including_file: String,
    pub included_file: String,
    /// 1-based line and column of the directive in `including_file`.
    pub line: u32,
    pub column: u32,
    /// 1-based flattened lines the expansion occupies.
    pub flat_lines: Range<u32>,
    pub depth: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Expansion {
    pub text: String,
    pub position_map: PositionMap,
    /// Resource diagnostics, already in original-file coordinates.
    pub diagnostics: Vec<Diagnostic>,
    pub includes: Vec<IncludeRecord>,
}

struct Directive {
    start: usize,
    end: usize,
    target: PathBuf,
}

struct Builder<'r> {
    reader: &'r dyn SourceReader,
    cache: &'r MaskCache,
    out: Expansion,
    /// Number of newlines written to `out.text`.
    lines: u32,
    stack: Vec<PathBuf>,
}

/// Reads `root` and expands its includes. Only an unreadable root is fatal.
pub fn expand_includes(
    root: &Path,
    reader: &dyn SourceReader,
    cache: &MaskCache,
) -> Result<Expansion, Diagnostic> {
    let root_name = root.to_string_lossy().to_string();
    let source = reader.read(root).map_err(|e| {
        Diagnostic::new(
            ERR_SOURCE_UNREADABLE,
            &format!("Cannot read '{}': {}", root_name, e),
            &root_name,
            1,
            1,
        )
    })?;
    Ok(expand_source(root, &source, reader, cache))
}

/// Expands an already loaded root source.
pub fn expand_source(
    root: &Path,
    source: &str,
    reader: &dyn SourceReader,
    cache: &MaskCache,
) -> Expansion {
    let mut builder = Builder {
        reader,
        cache,
        out: Expansion::default(),
        lines: 0,
        stack: Vec::new(),
    };
    builder.expand_file(root, source, 0);
    builder.out
}

impl<'r> Builder<'r> {
    fn register(&mut self, path: &Path) -> usize {
        self.out.position_map.files.push(path.to_string_lossy().to_string());
        self.out.position_map.files.len() - 1
    }

    fn at_line_start(&self) -> bool {
        self.out.text.is_empty() || self.out.text.ends_with('\n')
    }

    /// Appends parent text that begins on 0-based `line` of `file`.
    fn push_piece(&mut self, piece: &str, file: usize, line: u32) {
        if piece.is_empty() {
            return;
        }
        if self.at_line_start() {
            self.out.position_map.add_region(Region {
                flat_line: self.lines,
                file,
                line,
            });
        } else if piece.contains('\n') {
            self.out.position_map.add_region(Region {
                flat_line: self.lines + 1,
                file,
                line: line + 1,
            });
        }
        self.out.text.push_str(piece);
        self.lines += piece.matches('\n').count() as u32;
    }

    fn expand_file(&mut self, path: &Path, source: &str, depth: usize) {
        let file = self.register(path);
        let file_name = path.to_string_lossy().to_string();
        self.stack.push(normalize_path(path));
        tracing::debug!(file = %file_name, depth, "expanding includes");

        let code = CodeText::new(source, MaskMode::Declarations, self.cache);
        let directives = self.find_directives(&code, path, &file_name);

        let reader = self.reader;
        let stack = &self.stack;
        let reads: Vec<Option<io::Result<String>>> = directives
            .par_iter()
            .map(|d| {
                if stack.contains(&d.target) {
                    None
                } else {
                    Some(reader.read(&d.target))
                }
            })
            .collect();

        let mut cursor = 0;
        for (directive, read) in directives.iter().zip(reads) {
            let (line, column) = line_column(source, directive.start);
            self.push_piece(&source[cursor..directive.start], file, line_column(source, cursor).0 - 1);
            let target_name = directive.target.to_string_lossy().to_string();

            match read {
                Some(Ok(child)) => {
                    let first = self.lines + 1;
                    self.expand_file(&directive.target, &child, depth + 1);
                    self.out.includes.push(IncludeRecord {
                        including_file: file_name.clone(),
                        included_file: target_name,
                        line,
                        column,
                        flat_lines: first..self.lines + 2,
                        depth,
                    });
                }
                None => {
                    tracing::warn!(file = %target_name, "circular include rejected");
                    let message = format!("Circular include of '{}'", target_name);
                    self.reject(directive, ERR_CIRCULAR_INCLUDE, &message, &file_name, source, file, line);
                }
                Some(Err(e)) => {
                    tracing::debug!(file = %target_name, error = %e, "include unreadable");
                    self.reject(directive, ERR_MISSING_INCLUDE, "Included file does not exist", &file_name, source, file, line);
                }
            }
            cursor = directive.end;
        }

        let rest_line = line_column(source, cursor).0 - 1;
        self.push_piece(&source[cursor..], file, rest_line);
        self.stack.pop();
    }

    /// Reports a directive that could not be expanded and keeps its text in place.
    #[allow(clippy::too_many_arguments)]
    fn reject(
        &mut self,
        directive: &Directive,
        code: &str,
        message: &str,
        file_name: &str,
        source: &str,
        file: usize,
        line: u32,
    ) {
        self.out.diagnostics.push(Diagnostic::at(
            code,
            message,
            file_name,
            source,
            Span::new(directive.start, directive.end),
        ));
        self.push_piece(&source[directive.start..directive.end], file, line - 1);
    }

    fn find_directives(&mut self, code: &CodeText, path: &Path, file_name: &str) -> Vec<Directive> {
        let text = code.text();
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        let mut directives = Vec::new();
        let mut pos = 0;

        while let Some(start) = code.index_of("*include", pos) {
            pos = start + 1;
            let after = code.skip_trivia(start + "*include".len());
            let semicolon = code.find_any(b";", after).map(|(i, _)| i);
            match (text.as_bytes().get(after), semicolon) {
                (Some(b':'), Some(semi)) => {
                    let value = text[after + 1..semi]
                        .trim()
                        .trim_matches(|c| c == '\'' || c == '"');
                    if value.is_empty() {
                        self.out.diagnostics.push(invalid_include(file_name, text, start, semi + 1));
                    } else {
                        directives.push(Directive {
                            start,
                            end: semi + 1,
                            target: normalize_path(&dir.join(value)),
                        });
                    }
                    pos = semi + 1;
                }
                _ => {
                    let end = code.find_any(b";\n", start).map(|(i, _)| i).unwrap_or(text.len());
                    self.out.diagnostics.push(invalid_include(file_name, text, start, end));
                }
            }
        }
        directives
    }
}

fn invalid_include(file: &str, text: &str, start: usize, end: usize) -> Diagnostic {
    Diagnostic::at(
        ERR_INVALID_INCLUDE,
        "*include directive is invalid. Should be in format of '*include: path/to/file.nazca;'",
        file,
        text,
        Span::new(start, end),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::{line_column, DiagnosticCategory};

    fn expand(reader: &MemorySourceReader, root: &str) -> Expansion {
        expand_includes(Path::new(root), reader, &MaskCache::new()).unwrap()
    }

    #[test]
    fn test_nested_includes_map_back_to_leaf() {
        let reader = MemorySourceReader::new()
            .with_file("root.nazca", "a\n*include: a.nazca;\nb\n")
            .with_file("a.nazca", "x\n*include: sub/b.nazca;\ny\n")
            .with_file("sub/b.nazca", "p\nMARK\nq\n");
        let out = expand(&reader, "root.nazca");
        assert_eq!(out.text, "a\nx\np\nMARK\nq\n\ny\n\nb\n");
        assert!(out.diagnostics.is_empty());

        let (flat_line, _) = line_column(&out.text, out.text.find("MARK").unwrap());
        assert_eq!(out.position_map.original_line(flat_line), Some(("sub/b.nazca", 2)));

        let (flat_line, _) = line_column(&out.text, out.text.find('y').unwrap());
        assert_eq!(out.position_map.original_line(flat_line), Some(("a.nazca", 3)));

        let (flat_line, _) = line_column(&out.text, out.text.rfind('b').unwrap());
        assert_eq!(out.position_map.original_line(flat_line), Some(("root.nazca", 3)));
    }

    #[test]
    fn test_relocate_diagnostic() {
        let reader = MemorySourceReader::new()
            .with_file("dir/root.nazca", "one\n*include: ../lib/x.nazca;\n")
            .with_file("lib/x.nazca", "l1\nl2 BAD\n");
        let out = expand(&reader, "dir/root.nazca");
        let offset = out.text.find("BAD").unwrap();
        let mut d = Diagnostic::at("NZ-ERR-TREE-001", "bad", "dir/root.nazca", &out.text, Span::new(offset, offset + 3));
        out.position_map.relocate(&mut d);
        assert_eq!(d.file, "lib/x.nazca");
        assert_eq!(d.line, Position::Point(2));
    }

    #[test]
    fn test_missing_include_is_one_resource_diagnostic() {
        let reader = MemorySourceReader::new().with_file("main.nazca", "*include: missing.nazca;\n.div;");
        let out = expand(&reader, "main.nazca");
        assert_eq!(out.diagnostics.len(), 1);
        let d = &out.diagnostics[0];
        assert_eq!(d.category(), DiagnosticCategory::Resource);
        assert_eq!(d.message, "Included file does not exist");
        assert_eq!(d.line, Position::Point(1));
        assert_eq!(d.column, Position::Range(1, 25));
        assert!(out.text.contains("*include: missing.nazca;"));
    }

    #[test]
    fn test_cycles_are_rejected() {
        let reader = MemorySourceReader::new()
            .with_file("a.nazca", "*include: b.nazca;\nA")
            .with_file("b.nazca", "*include: a.nazca;\nB");
        let out = expand(&reader, "a.nazca");
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].code.as_deref(), Some(ERR_CIRCULAR_INCLUDE));
        assert_eq!(out.diagnostics[0].file, "b.nazca");
        assert!(out.text.ends_with("\nB\nA"));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let reader = MemorySourceReader::new()
            .with_file("r.nazca", "*include: a.nazca;\n*include: b.nazca;\n")
            .with_file("a.nazca", "*include: c.nazca;\n")
            .with_file("b.nazca", "*include: c.nazca;\n")
            .with_file("c.nazca", "C\n");
        let out = expand(&reader, "r.nazca");
        assert!(out.diagnostics.is_empty());
        assert_eq!(out.text.matches('C').count(), 2);
        assert_eq!(out.includes.len(), 4);
    }

    #[test]
    fn test_unreadable_root_is_fatal() {
        let reader = MemorySourceReader::new();
        assert!(expand_includes(Path::new("nope.nazca"), &reader, &MaskCache::new()).is_err());
    }

    #[test]
    fn test_fs_reader_resolves_relative_to_including_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("parts")).unwrap();
        std::fs::write(dir.path().join("main.nazca"), "*include: parts/box.nazca;\n").unwrap();
        std::fs::write(dir.path().join("parts/box.nazca"), "class Box { }\n").unwrap();
        let out = expand_includes(&dir.path().join("main.nazca"), &FsSourceReader, &MaskCache::new()).unwrap();
        assert!(out.diagnostics.is_empty());
        assert!(out.text.starts_with("class Box { }"));
    }
}
