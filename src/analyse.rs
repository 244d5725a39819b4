//! Analysis driver: every diagnostic a source tree produces, without emitting.

use crate::cache::MaskCache;
use crate::hierarchy::Hierarchy;
use crate::include::SourceReader;
use crate::lint::{LintRequest, Linter};
use crate::source::{load, FrontEnd};
use crate::validate::{
    ClassTable, DataImport, Diagnostic, ElementNode, FontFace, FunctionValue, Members, WARN_LINT,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyseOptions {
    /// Report diagnostics located in included files too.
    pub include_nested_diagnostics: bool,
    /// Run the linting collaborator over behavior bodies.
    pub lint: bool,
}

impl Default for AnalyseOptions {
    fn default() -> Self {
        Self {
            include_nested_diagnostics: false,
            lint: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub classes: ClassTable,
    pub hierarchy: Vec<ElementNode>,
    pub global: IndexMap<String, ElementNode>,
    pub font_faces: Vec<FontFace>,
    pub data_imports: Vec<DataImport>,
    pub warnings: Vec<Diagnostic>,
    pub errors: Vec<Diagnostic>,
}

impl AnalysisReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn analyse_file(
    path: &Path,
    reader: &dyn SourceReader,
    linter: Option<&dyn Linter>,
    options: &AnalyseOptions,
) -> Result<AnalysisReport, Diagnostic> {
    let cache = MaskCache::new();
    let front = load(path, reader, &cache)?;

    let mut diagnostics = front.report(options.include_nested_diagnostics);
    if let (true, Some(linter)) = (options.lint, linter) {
        diagnostics.extend(lint_bodies(&front, linter, options.include_nested_diagnostics));
    }

    let (errors, warnings): (Vec<_>, Vec<_>) = diagnostics.into_iter().partition(Diagnostic::is_error);
    tracing::debug!(
        file = %front.root,
        errors = errors.len(),
        warnings = warnings.len(),
        "analysis finished"
    );

    let FrontEnd {
        classes,
        hierarchy: Hierarchy { roots, font_faces },
        global,
        data_imports,
        ..
    } = front;
    Ok(AnalysisReport {
        classes,
        hierarchy: roots,
        global,
        font_faces,
        data_imports,
        warnings,
        errors,
    })
}

fn lint_bodies(front: &FrontEnd, linter: &dyn Linter, include_nested: bool) -> Vec<Diagnostic> {
    let mut bodies: Vec<&FunctionValue> = Vec::new();
    for class in front.classes.values() {
        collect_bodies(&class.members, &mut bodies);
        for child in &class.children {
            collect_element_bodies(child, &mut bodies);
        }
    }
    for root in &front.hierarchy.roots {
        collect_element_bodies(root, &mut bodies);
    }

    let mut out = Vec::new();
    for body in bodies {
        let (file, line) = front.origin(body.body_span.start);
        if !include_nested && !front.is_root_file(&file) {
            continue;
        }
        let request = LintRequest {
            body: body.body.clone(),
            parameters: body.parameters.clone(),
            line_offset: line,
        };
        for finding in linter.lint(&request) {
            out.push(Diagnostic::new(WARN_LINT, &finding.message, &file, finding.line, finding.character));
        }
    }
    out
}

fn collect_bodies<'a>(members: &'a Members, out: &mut Vec<&'a FunctionValue>) {
    out.extend(members.bodies().into_iter().map(|(_, _, f)| f));
}

fn collect_element_bodies<'a>(element: &'a ElementNode, out: &mut Vec<&'a FunctionValue>) {
    collect_bodies(&element.overrides, out);
    for child in &element.children {
        collect_element_bodies(child, out);
    }
}
