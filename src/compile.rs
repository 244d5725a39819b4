//! Compile driver: resolves the whole tree and rewrites every behavior body
//! once, producing the unit the emitters consume.

use crate::cache::MaskCache;
use crate::formatter::Beautify;
use crate::include::SourceReader;
use crate::renamer::{rewrite, BodyContext, ResolvableNames};
use crate::resolve::{element_tag, element_text, has_document_root, resolve_element, ResolvedClass};
use crate::source::{load, FrontEnd};
use crate::validate::{
    BodyKind, ClassTable, DataImport, DeclarationValue, Diagnostic, ElementNode, FontFace,
    Members, ERR_DOCUMENT_ROOT,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOptions {
    pub beautify: Beautify,
    pub include_nested_diagnostics: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewrittenBody {
    /// Class name, or the element path for inline overrides.
    pub owner: String,
    pub member: String,
    pub kind: BodyKind,
    pub context: BodyContext,
    pub parameters: Vec<String>,
    pub source: String,
    pub rewritten: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledElement {
    pub name: Option<String>,
    pub tag: String,
    pub class_refs: Vec<String>,
    pub text: Option<DeclarationValue>,
    pub resolved: ResolvedClass,
    pub children: Vec<CompiledElement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledUnit {
    pub classes: ClassTable,
    pub resolved: IndexMap<String, ResolvedClass>,
    pub tree: Vec<CompiledElement>,
    pub font_faces: Vec<FontFace>,
    pub data_imports: Vec<DataImport>,
    pub bodies: Vec<RewrittenBody>,
    pub beautify: Beautify,
    pub warnings: Vec<Diagnostic>,
}

/// Compiles `path`. Any error-severity diagnostic aborts with the full list.
pub fn compile_file(
    path: &Path,
    reader: &dyn SourceReader,
    options: &CompileOptions,
) -> Result<CompiledUnit, Vec<Diagnostic>> {
    let cache = MaskCache::new();
    let front = load(path, reader, &cache).map_err(|e| vec![e])?;

    let mut diagnostics = front.report(options.include_nested_diagnostics);
    if !front.has_errors() && !has_document_root(&front.classes, &front.hierarchy.roots) {
        diagnostics.push(Diagnostic::new(
            ERR_DOCUMENT_ROOT,
            "Your hierarchy should have html as a parent node",
            &front.root,
            1,
            1,
        ));
    }
    if diagnostics.iter().any(Diagnostic::is_error) || front.has_errors() {
        tracing::debug!(file = %front.root, count = diagnostics.len(), "compile aborted");
        return Err(diagnostics);
    }

    let mut compiler = Compiler {
        front: &front,
        cache: &cache,
        bodies: Vec::new(),
    };
    for (name, class) in &front.classes {
        if let Some(resolved) = front.resolved.get(name) {
            compiler.rewrite_members(name, &class.members, &resolved.resolvable_names(), BodyContext::Instance);
        }
        for child in &class.children {
            compiler
                .element(child, &format!("{}>", name), BodyContext::Instance)
                .map_err(|e| vec![e])?;
        }
    }
    let mut tree = Vec::new();
    for root in &front.hierarchy.roots {
        tree.push(
            compiler
                .element(root, "", BodyContext::FreeStanding)
                .map_err(|e| vec![e])?,
        );
    }
    let bodies = compiler.bodies;
    tracing::debug!(file = %front.root, bodies = bodies.len(), "compiled");

    Ok(CompiledUnit {
        classes: front.classes.clone(),
        resolved: front.resolved.clone(),
        tree,
        font_faces: front.hierarchy.font_faces.clone(),
        data_imports: front.data_imports.clone(),
        bodies,
        beautify: options.beautify,
        warnings: diagnostics,
    })
}

struct Compiler<'f> {
    front: &'f FrontEnd,
    cache: &'f MaskCache,
    bodies: Vec<RewrittenBody>,
}

fn element_path(element: &ElementNode) -> String {
    let mut path = element.name.clone().unwrap_or_default();
    for reference in &element.class_refs {
        path.push('.');
        path.push_str(reference);
    }
    path
}

impl<'f> Compiler<'f> {
    fn rewrite_members(&mut self, owner: &str, members: &Members, names: &ResolvableNames, context: BodyContext) {
        for (kind, member, function) in members.bodies() {
            let rewritten = rewrite(&function.body, names, &function.parameters, context, self.cache);
            self.bodies.push(RewrittenBody {
                owner: owner.to_string(),
                member: member.to_string(),
                kind,
                context,
                parameters: function.parameters.clone(),
                source: function.body.clone(),
                rewritten,
            });
        }
    }

    fn element(&mut self, element: &ElementNode, prefix: &str, context: BodyContext) -> Result<CompiledElement, Diagnostic> {
        let table = &self.front.classes;
        let resolved = resolve_element(table, element, &self.front.root)
            .map_err(|e| e.located(&self.front.expansion.text))?;
        let owner = format!("{}{}", prefix, element_path(element));
        self.rewrite_members(&owner, &element.overrides, &resolved.resolvable_names(), context);

        let mut children = Vec::new();
        for child in &element.children {
            children.push(self.element(child, &format!("{}>", owner), context)?);
        }
        Ok(CompiledElement {
            name: element.name.clone(),
            tag: element_tag(table, &element.class_refs),
            class_refs: element.class_refs.clone(),
            text: element_text(table, element),
            resolved,
            children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::include::MemorySourceReader;

    fn compile(source: &str) -> Result<CompiledUnit, Vec<Diagnostic>> {
        let reader = MemorySourceReader::new().with_file("main.nazca", source);
        compile_file(Path::new("main.nazca"), &reader, &CompileOptions::default())
    }

    #[test]
    fn test_requires_html_root() {
        let errors = compile(".div;").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Your hierarchy should have html as a parent node");
    }

    #[test]
    fn test_html_root_through_class() {
        let unit = compile("class Page < html { };\n.Page { .body; };").unwrap();
        assert_eq!(unit.tree[0].tag, "html");
        assert_eq!(unit.tree[0].children[0].tag, "body");
    }

    #[test]
    fn test_parse_errors_abort() {
        let errors = compile("class A { a b c; };\n.html;").unwrap_err();
        assert!(errors.iter().any(|e| e.message == "The property is invalid"));
    }

    #[test]
    fn test_top_level_bodies_are_free_standing() {
        let unit = compile(
            "class Counter { #count: 0; bump: () { count++; }; };\n\
             .html { .Counter { @click: () { count = 0; }; }; };",
        )
        .unwrap();
        let class_body = unit.bodies.iter().find(|b| b.member == "bump").unwrap();
        assert_eq!(class_body.context, BodyContext::Instance);
        assert_eq!(class_body.rewritten, "{ __nazcaThis.__nazcaProtected.count++; }");

        let handler = unit.bodies.iter().find(|b| b.member == "click").unwrap();
        assert_eq!(handler.context, BodyContext::FreeStanding);
        assert_eq!(handler.owner, ".html>.Counter");
        assert_eq!(handler.rewritten, "{ window.count = 0; }");
    }

    #[test]
    fn test_defaulted_parameter_shadows_member() {
        let unit = compile("class A { b: 1; f: (a, b = 2) { return a + b; }; };\n.html;").unwrap();
        let body = unit.bodies.iter().find(|b| b.member == "f").unwrap();
        assert_eq!(body.parameters, vec!["a", "b = 2"]);
        assert_eq!(body.rewritten, "{ return a + b; }");
    }

    #[test]
    fn test_element_text_and_beautify() {
        let reader = MemorySourceReader::new().with_file("main.nazca", ".html { .body { text: 'hi'; }; };");
        let options = CompileOptions {
            beautify: Beautify::Minify,
            ..CompileOptions::default()
        };
        let unit = compile_file(Path::new("main.nazca"), &reader, &options).unwrap();
        assert_eq!(unit.beautify, Beautify::Minify);
        let body = &unit.tree[0].children[0];
        assert!(matches!(&body.text, Some(DeclarationValue::Scalar(s)) if s.as_text() == "hi"));
    }
}
