//! # Nazca Compiler Front End
//!
//! Parses Nazca sources (one nested, class-based syntax for structure, style
//! and behavior) and resolves them into data the emitters consume.
//!
//! ## Pipeline
//!
//! 1. **Includes**: `*include: path;` directives are expanded depth-first and a
//!    position map remembers which file and line every flattened line came from.
//! 2. **Literal mask**: every buffer is scanned once into a side mask marking
//!    strings, templates, regexes and comments, so no search ever matches inside them.
//! 3. **Classes and hierarchy**: class blocks and the visible element tree are
//!    parsed with recovery; one faulty construct never hides the next.
//! 4. **Resolution**: each class is merged with its ancestors. The class wins,
//!    then its first parent and that parent's line, then later parents.
//! 5. **Rewriting**: free references to members inside behavior bodies are
//!    qualified through the instance receiver, honouring local shadowing.
//!
//! Diagnostics are returned as data. Nothing here prints.

#[cfg(feature = "napi")]
use napi_derive::napi;

mod analyse;
mod cache;
mod compile;
mod declaration;
mod formatter;
mod hierarchy;
mod include;
mod lint;
mod mask;
mod parse;
mod renamer;
mod resolve;
mod scope;
mod search;
mod source;
mod validate;


pub use analyse::{analyse_file, AnalyseOptions, AnalysisReport};
pub use cache::MaskCache;
pub use compile::{compile_file, CompileOptions, CompiledElement, CompiledUnit, RewrittenBody};
pub use declaration::{parse_declaration, CSS_PROPERTIES};
pub use formatter::{format_script, Beautify};
pub use hierarchy::{list_data_imports, parse_children, parse_element, parse_hierarchy_recovering, Hierarchy};
pub use include::{
    expand_includes, expand_source, normalize_path, Expansion, FsSourceReader, IncludeRecord,
    MemorySourceReader, PositionMap, SourceReader,
};
pub use lint::{LintFinding, LintRequest, Linter, OxcLinter};
pub use mask::{build_mask, LiteralMask, MaskMode};
pub use parse::{parse_classes, parse_classes_recovering};
pub use renamer::{rewrite, BodyContext, ResolvableNames, GLOBAL_NAMESPACE, PROTECTED_NAMESPACE, RECEIVER};
pub use resolve::{
    element_tag, element_text, graphical_ancestors, has_document_root, is_graphical, resolve,
    resolve_element, Member, ResolvedClass, HTML_TAGS,
};
pub use scope::{find_local_declarations, BindingScope, LocalDeclaration, ScopeStack};
pub use search::{code_index_of, find_matching_close, split_statements, CodeText};
pub use source::{load, FrontEnd};
pub use validate::*;

#[cfg(feature = "napi")]
#[napi(js_name = "analyseNative")]
pub fn analyse_native(path: String, include_nested: Option<bool>) -> serde_json::Value {
    let options = AnalyseOptions {
        include_nested_diagnostics: include_nested.unwrap_or(false),
        ..AnalyseOptions::default()
    };
    match analyse_file(std::path::Path::new(&path), &FsSourceReader, Some(&OxcLinter), &options) {
        Ok(report) => serde_json::to_value(report).unwrap_or(serde_json::Value::Null),
        Err(diagnostic) => serde_json::json!({ "errors": [diagnostic], "warnings": [] }),
    }
}

#[cfg(feature = "napi")]
#[napi(js_name = "compileNative")]
pub fn compile_native(path: String, beautify: Option<i32>) -> serde_json::Value {
    let beautify = match Beautify::from_config(i64::from(beautify.unwrap_or(0)), &path) {
        Ok(b) => b,
        Err(diagnostic) => return serde_json::json!({ "errors": [diagnostic] }),
    };
    let options = CompileOptions {
        beautify,
        ..CompileOptions::default()
    };
    match compile_file(std::path::Path::new(&path), &FsSourceReader, &options) {
        Ok(unit) => serde_json::to_value(unit).unwrap_or(serde_json::Value::Null),
        Err(errors) => serde_json::json!({ "errors": errors }),
    }
}
