//! Front-end pipeline shared by the analysis and compile drivers.
//!
//! Expands includes, parses classes and the hierarchy with recovery, resolves
//! every class and element, and moves every diagnostic into the coordinates of
//! the file that produced it.

use crate::cache::MaskCache;
use crate::hierarchy::{list_data_imports, parse_hierarchy_recovering, Hierarchy};
use crate::include::{expand_includes, Expansion, SourceReader};
use crate::mask::MaskMode;
use crate::parse::parse_classes_recovering;
use crate::resolve::{resolve, resolve_element, ResolvedClass};
use crate::search::CodeText;
use crate::validate::{
    collect_global_names, line_column, ClassTable, DataImport, Diagnostic, ElementNode,
    ERR_ERRORED_INCLUDE,
};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct FrontEnd {
    pub root: String,
    pub expansion: Expansion,
    pub classes: ClassTable,
    pub resolved: IndexMap<String, ResolvedClass>,
    pub hierarchy: Hierarchy,
    pub global: IndexMap<String, ElementNode>,
    pub data_imports: Vec<DataImport>,
    /// Every diagnostic found, in original-file coordinates.
    pub diagnostics: Vec<Diagnostic>,
}

/// Runs the front end over `root`. Only an unreadable root fails outright.
pub fn load(root: &Path, reader: &dyn SourceReader, cache: &MaskCache) -> Result<FrontEnd, Diagnostic> {
    let root_name = root.to_string_lossy().to_string();
    let expansion = expand_includes(root, reader, cache)?;
    tracing::debug!(
        file = %root_name,
        includes = expansion.includes.len(),
        bytes = expansion.text.len(),
        "includes expanded"
    );

    let text = expansion.text.as_str();
    let code = CodeText::new(text, MaskMode::Declarations, cache);
    let mut flat: Vec<Diagnostic> = Vec::new();

    let (mut classes, class_errors) = parse_classes_recovering(&code, &root_name);
    flat.extend(class_errors);
    for class in classes.values_mut() {
        if let Some(file) = expansion.position_map.file_at(text, class.span.start) {
            class.source_file = file.to_string();
        }
    }

    let (hierarchy, tree_errors) = parse_hierarchy_recovering(&code, &root_name);
    flat.extend(tree_errors);

    let (data_imports, import_errors) = list_data_imports(&code, &root_name);
    flat.extend(import_errors);

    let (global, global_errors) = collect_global_names(&hierarchy.roots, &root_name, text);
    flat.extend(global_errors);

    let mut resolved = IndexMap::new();
    for name in classes.keys() {
        match resolve(&classes, name) {
            Ok(class) => {
                resolved.insert(name.clone(), class);
            }
            Err(e) => flat.push(e.located(text)),
        }
        for child in &classes[name].children {
            check_element(&classes, child, &root_name, text, &mut flat);
        }
    }
    for element in &hierarchy.roots {
        check_element(&classes, element, &root_name, text, &mut flat);
    }
    tracing::debug!(
        classes = classes.len(),
        roots = hierarchy.roots.len(),
        errors = flat.len(),
        "front end parsed"
    );

    let mut diagnostics = expansion.diagnostics.clone();
    for mut diagnostic in flat {
        expansion.position_map.relocate(&mut diagnostic);
        diagnostics.push(diagnostic);
    }

    Ok(FrontEnd {
        root: root_name,
        expansion,
        classes,
        resolved,
        hierarchy,
        global,
        data_imports,
        diagnostics,
    })
}

/// Resolves an element and its descendants only to surface unknown references.
fn check_element(table: &ClassTable, element: &ElementNode, file: &str, text: &str, out: &mut Vec<Diagnostic>) {
    if let Err(e) = resolve_element(table, element, file) {
        out.push(e.located(text));
    }
    for child in &element.children {
        check_element(table, child, file, text, out);
    }
}

impl FrontEnd {
    /// Original `(file, line)` of a flattened offset.
    pub fn origin(&self, offset: usize) -> (String, u32) {
        let (flat_line, _) = line_column(&self.expansion.text, offset);
        self.expansion
            .position_map
            .original_line(flat_line)
            .map(|(file, line)| (file.to_string(), line))
            .unwrap_or_else(|| (self.root.clone(), flat_line))
    }

    pub fn is_root_file(&self, file: &str) -> bool {
        file == self.root
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Diagnostics as a caller sees them. Without `include_nested`, those from
    /// included files are dropped and every top-level include whose subtree
    /// produced an error is flagged at its directive instead.
    pub fn report(&self, include_nested: bool) -> Vec<Diagnostic> {
        if include_nested {
            return self.diagnostics.clone();
        }
        let mut out: Vec<Diagnostic> = self
            .diagnostics
            .iter()
            .filter(|d| self.is_root_file(&d.file))
            .cloned()
            .collect();

        let failing: HashSet<&str> = self
            .diagnostics
            .iter()
            .filter(|d| d.is_error() && !self.is_root_file(&d.file))
            .map(|d| d.file.as_str())
            .collect();
        if failing.is_empty() {
            return out;
        }

        let includes = &self.expansion.includes;
        for record in includes.iter().filter(|r| r.depth == 0) {
            let in_subtree = includes.iter().any(|r| {
                r.flat_lines.start >= record.flat_lines.start
                    && r.flat_lines.end <= record.flat_lines.end
                    && failing.contains(r.included_file.as_str())
            });
            if in_subtree {
                out.push(Diagnostic::new(
                    ERR_ERRORED_INCLUDE,
                    "Included file contains errors",
                    &record.including_file,
                    record.line,
                    record.column,
                ));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::include::MemorySourceReader;
    use crate::validate::{Position, ERR_DUPLICATE_GLOBAL, ERR_STYLE_OVERRIDE, ERR_UNKNOWN_CLASS};

    fn front(reader: &MemorySourceReader, root: &str) -> FrontEnd {
        load(Path::new(root), reader, &MaskCache::new()).unwrap()
    }

    #[test]
    fn test_class_source_file_follows_include() {
        let reader = MemorySourceReader::new()
            .with_file("main.nazca", "*include: lib.nazca;\nclass Main { };\n")
            .with_file("lib.nazca", "class Lib { };\n");
        let fe = front(&reader, "main.nazca");
        assert_eq!(fe.classes["Lib"].source_file, "lib.nazca");
        assert_eq!(fe.classes["Main"].source_file, "main.nazca");
        assert!(fe.diagnostics.is_empty());
    }

    #[test]
    fn test_errors_are_relocated_to_their_file() {
        let reader = MemorySourceReader::new()
            .with_file("main.nazca", "*include: lib.nazca;\n.div;\n")
            .with_file("lib.nazca", "\n\nclass Bad { color: { a: 1; }; };\n");
        let fe = front(&reader, "main.nazca");
        let d = fe
            .diagnostics
            .iter()
            .find(|d| d.code.as_deref() == Some(ERR_STYLE_OVERRIDE))
            .unwrap();
        assert_eq!(d.file, "lib.nazca");
        assert_eq!(d.line, Position::Point(3));
    }

    #[test]
    fn test_report_flags_failing_include() {
        let reader = MemorySourceReader::new()
            .with_file("main.nazca", ".div;\n*include: lib.nazca;\n")
            .with_file("lib.nazca", "class A < Ghost { };\n");
        let fe = front(&reader, "main.nazca");
        assert!(fe.diagnostics.iter().any(|d| d.code.as_deref() == Some(ERR_UNKNOWN_CLASS)));

        let report = fe.report(false);
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].message, "Included file contains errors");
        assert_eq!(report[0].file, "main.nazca");
        assert_eq!(report[0].line, Position::Point(2));

        let nested = fe.report(true);
        assert_eq!(nested[0].file, "lib.nazca");
    }

    #[test]
    fn test_unknown_element_reference() {
        let reader = MemorySourceReader::new().with_file("main.nazca", ".div { .Nope; };");
        let fe = front(&reader, "main.nazca");
        assert_eq!(fe.diagnostics.len(), 1);
        assert_eq!(fe.diagnostics[0].code.as_deref(), Some(ERR_UNKNOWN_CLASS));
    }

    #[test]
    fn test_duplicate_global_name() {
        let reader = MemorySourceReader::new().with_file("main.nazca", "a.div;\n.div { a.span; };");
        let fe = front(&reader, "main.nazca");
        assert_eq!(fe.diagnostics.len(), 1);
        assert_eq!(fe.diagnostics[0].code.as_deref(), Some(ERR_DUPLICATE_GLOBAL));
        assert_eq!(fe.diagnostics[0].line, Position::Point(2));
    }
}
