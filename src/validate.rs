use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTIC CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_CLASS_OPEN: &str = "NZ-ERR-CLASS-001";
pub const ERR_CLASS_HEADER: &str = "NZ-ERR-CLASS-002";
pub const ERR_CLASS_CLOSE: &str = "NZ-ERR-CLASS-003";
pub const ERR_DUPLICATE_MEMBER: &str = "NZ-ERR-CLASS-004";
pub const ERR_UNKNOWN_CLASS: &str = "NZ-ERR-CLASS-005";
pub const ERR_INHERITANCE_CYCLE: &str = "NZ-ERR-CLASS-006";
pub const ERR_PROPERTY_NAME: &str = "NZ-ERR-DECL-001";
pub const ERR_INVALID_PROPERTY: &str = "NZ-ERR-DECL-002";
pub const ERR_STYLE_OVERRIDE: &str = "NZ-ERR-DECL-003";
pub const ERR_MISSING_TERMINATOR: &str = "NZ-ERR-DECL-004";
pub const ERR_MEMBER_VALUE: &str = "NZ-ERR-DECL-005";
pub const ERR_UNRECOGNIZED_STATEMENT: &str = "NZ-ERR-TREE-001";
pub const ERR_ELEMENT_BLOCK: &str = "NZ-ERR-TREE-002";
pub const ERR_DUPLICATE_GLOBAL: &str = "NZ-ERR-TREE-003";
pub const ERR_DOCUMENT_ROOT: &str = "NZ-ERR-TREE-004";
pub const ERR_DATA_IMPORT: &str = "NZ-ERR-JSON-001";
pub const ERR_MISSING_INCLUDE: &str = "NZ-ERR-INCLUDE-001";
pub const ERR_INVALID_INCLUDE: &str = "NZ-ERR-INCLUDE-002";
pub const ERR_CIRCULAR_INCLUDE: &str = "NZ-ERR-INCLUDE-003";
pub const ERR_ERRORED_INCLUDE: &str = "NZ-ERR-INCLUDE-004";
pub const ERR_SOURCE_UNREADABLE: &str = "NZ-ERR-INCLUDE-005";
pub const ERR_FORMAT: &str = "NZ-ERR-FORMAT-001";
pub const ERR_CONFIG: &str = "NZ-ERR-CONFIG-001";
pub const WARN_LINT: &str = "NZ-WARN-LINT-001";

/// Coarse grouping of diagnostic codes, used by hosts to decide what halts a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticCategory {
    Structural,
    Semantic,
    Resource,
    Advisory,
}

pub fn category_of(code: &str) -> DiagnosticCategory {
    match code {
        ERR_DUPLICATE_MEMBER | ERR_UNKNOWN_CLASS | ERR_INHERITANCE_CYCLE | ERR_STYLE_OVERRIDE
        | ERR_MEMBER_VALUE | ERR_DUPLICATE_GLOBAL | ERR_DOCUMENT_ROOT | ERR_DATA_IMPORT
        | ERR_CONFIG => DiagnosticCategory::Semantic,
        ERR_MISSING_INCLUDE | ERR_INVALID_INCLUDE | ERR_CIRCULAR_INCLUDE | ERR_ERRORED_INCLUDE
        | ERR_SOURCE_UNREADABLE => DiagnosticCategory::Resource,
        WARN_LINT => DiagnosticCategory::Advisory,
        _ => DiagnosticCategory::Structural,
    }
}

pub fn describe(code: &str) -> &'static str {
    match code {
        ERR_CLASS_OPEN => "A class header must be followed by '{'.",
        ERR_CLASS_HEADER => "A class header reads 'class Name < Parent < ...'.",
        ERR_CLASS_CLOSE => "Every class block is closed by a matching '}'.",
        ERR_DUPLICATE_MEMBER => {
            "Variables, methods, style properties and named children share one namespace per class."
        }
        ERR_UNKNOWN_CLASS => "Every parent is a declared class or a raw tag name.",
        ERR_INHERITANCE_CYCLE => "A class never inherits from itself.",
        ERR_PROPERTY_NAME => "Property names are identifiers with an optional sigil.",
        ERR_INVALID_PROPERTY => "Class bodies contain declarations and element references only.",
        ERR_STYLE_OVERRIDE => "Style properties only take scalar values.",
        ERR_MISSING_TERMINATOR => "Scalar declarations end with ';'.",
        ERR_MEMBER_VALUE => "Getters, setters and event handlers are functions; attributes are scalars.",
        ERR_UNRECOGNIZED_STATEMENT => {
            "Top-level statements are *include, *json, *font-face, class or hierarchy."
        }
        ERR_ELEMENT_BLOCK => "An element reference ends with ';' or a '{ ... }' block.",
        ERR_DUPLICATE_GLOBAL => "Named elements are unique across the visible tree.",
        ERR_DOCUMENT_ROOT => "A compiled document has an html root element.",
        ERR_DATA_IMPORT => "*json directives read '*json: objectName=path/to/file.json;'.",
        ERR_MISSING_INCLUDE => "Included files exist relative to the including file.",
        ERR_INVALID_INCLUDE => "*include directives read '*include: path;'.",
        ERR_CIRCULAR_INCLUDE => "The include graph has no cycles.",
        ERR_ERRORED_INCLUDE => "Included files parse without errors.",
        ERR_SOURCE_UNREADABLE => "The root source file is readable.",
        ERR_FORMAT => "Generated behavior code parses before formatting.",
        ERR_CONFIG => "Configuration values are within their allowed range.",
        WARN_LINT => "Embedded behavior code passes the linter.",
        _ => "Unknown diagnostic.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTIC
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Error,
    Warning,
}

/// A 1-based line or column, either a single point or an inclusive range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Position {
    Point(u32),
    Range(u32, u32),
}

impl Position {
    fn spanning(start: u32, end: u32) -> Self {
        if start == end {
            Position::Point(start)
        } else {
            Position::Range(start, end)
        }
    }

    pub fn start(&self) -> u32 {
        match *self {
            Position::Point(p) => p,
            Position::Range(s, _) => s,
        }
    }

    pub fn end(&self) -> u32 {
        match *self {
            Position::Point(p) => p,
            Position::Range(_, e) => e,
        }
    }
}

/// Byte offsets into the buffer a node was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub message: String,
    pub line: Position,
    pub column: Position,
    pub file: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Offsets into the parsed buffer, kept until the positions are resolved.
    #[serde(skip)]
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn new(code: &str, message: &str, file: &str, line: u32, column: u32) -> Self {
        let severity = if category_of(code) == DiagnosticCategory::Advisory {
            Severity::Warning
        } else {
            Severity::Error
        };
        Diagnostic {
            message: message.to_string(),
            line: Position::Point(line),
            column: Position::Point(column),
            file: file.to_string(),
            severity,
            code: Some(code.to_string()),
            span: None,
        }
    }

    /// Builds a diagnostic whose line and column are computed from `span` within `text`.
    pub fn at(code: &str, message: &str, file: &str, text: &str, span: Span) -> Self {
        Self::new(code, message, file, 0, 0).with_span(span).located(text)
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Fills `line`/`column` from the recorded span.
    pub fn located(mut self, text: &str) -> Self {
        if let Some(span) = self.span {
            let (start_line, start_column) = line_column(text, span.start);
            let (end_line, end_column) = line_column(text, span.end.max(span.start));
            self.line = Position::spanning(start_line, end_line);
            self.column = Position::spanning(start_column, end_column);
        }
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn category(&self) -> DiagnosticCategory {
        self.code
            .as_deref()
            .map(category_of)
            .unwrap_or(DiagnosticCategory::Structural)
    }
}

/// Everything a failed parse managed to build before the error, and where to continue.
#[derive(Debug, Clone)]
pub struct ParseFailure<T> {
    pub diagnostic: Diagnostic,
    pub partial: T,
    pub resume_at: usize,
}

/// 1-based line and character column of a byte offset. Offsets past the end clamp to it.
pub fn line_column(text: &str, offset: usize) -> (u32, u32) {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    let before = &text[..offset];
    let line = before.matches('\n').count() as u32 + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = before[line_start..].chars().count() as u32 + 1;
    (line, column)
}

// ═══════════════════════════════════════════════════════════════════════════════
// IR TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Access {
    #[default]
    Public,
    Protected,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeclarationKind {
    Variable,
    Method,
    Getter,
    Setter,
    Attribute,
    EventHandler,
    State,
    StyleProperty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Scalar {
    String(String),
    /// Numeric text as written, e.g. `0.5`.
    Number(String),
    Boolean(bool),
    /// Array or regular-expression literal, kept verbatim.
    Literal(String),
}

impl Scalar {
    pub fn as_text(&self) -> String {
        match self {
            Scalar::String(s) | Scalar::Number(s) | Scalar::Literal(s) => s.clone(),
            Scalar::Boolean(b) => b.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionValue {
    pub parameters: Vec<String>,
    /// Body text including its braces.
    pub body: String,
    pub body_span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum DeclarationValue {
    Scalar(Scalar),
    /// Brace-matched block, verbatim.
    Object(String),
    Function(FunctionValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Declaration {
    pub name: String,
    pub kind: DeclarationKind,
    pub access: Access,
    pub value: DeclarationValue,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessBuckets<V> {
    pub public: IndexMap<String, V>,
    pub protected: IndexMap<String, V>,
    pub private: IndexMap<String, V>,
}

impl<V> Default for AccessBuckets<V> {
    fn default() -> Self {
        Self {
            public: IndexMap::new(),
            protected: IndexMap::new(),
            private: IndexMap::new(),
        }
    }
}

impl<V> AccessBuckets<V> {
    pub fn bucket_mut(&mut self, access: Access) -> &mut IndexMap<String, V> {
        match access {
            Access::Public => &mut self.public,
            Access::Protected => &mut self.protected,
            Access::Private => &mut self.private,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Access, &String, &V)> {
        self.public
            .iter()
            .map(|(k, v)| (Access::Public, k, v))
            .chain(self.protected.iter().map(|(k, v)| (Access::Protected, k, v)))
            .chain(self.private.iter().map(|(k, v)| (Access::Private, k, v)))
    }
}

/// Member buckets of a class body or an element's inline overrides.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Members {
    pub variables: AccessBuckets<DeclarationValue>,
    pub methods: AccessBuckets<FunctionValue>,
    pub style: IndexMap<String, Scalar>,
    pub attributes: IndexMap<String, Scalar>,
    pub getters: IndexMap<String, FunctionValue>,
    pub setters: IndexMap<String, FunctionValue>,
    pub event_handlers: IndexMap<String, FunctionValue>,
    pub states: IndexMap<String, String>,
}

/// Which bucket a behavior body was declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BodyKind {
    Method,
    Constructor,
    Getter,
    Setter,
    EventHandler,
}

impl Members {
    /// Files a parsed declaration into its bucket. The parser guarantees kind and value agree.
    pub fn insert(&mut self, decl: Declaration) {
        let Declaration {
            name,
            kind,
            access,
            value,
            ..
        } = decl;
        match (kind, value) {
            (DeclarationKind::Method, DeclarationValue::Function(f)) => {
                self.methods.bucket_mut(access).insert(name, f);
            }
            (DeclarationKind::Getter, DeclarationValue::Function(f)) => {
                self.getters.insert(name, f);
            }
            (DeclarationKind::Setter, DeclarationValue::Function(f)) => {
                self.setters.insert(name, f);
            }
            (DeclarationKind::EventHandler, DeclarationValue::Function(f)) => {
                self.event_handlers.insert(name, f);
            }
            (DeclarationKind::Attribute, DeclarationValue::Scalar(s)) => {
                self.attributes.insert(name, s);
            }
            (DeclarationKind::StyleProperty, DeclarationValue::Scalar(s)) => {
                self.style.insert(name, s);
            }
            (DeclarationKind::State, DeclarationValue::Object(block)) => {
                self.states.insert(name, block);
            }
            (_, value) => {
                self.variables.bucket_mut(access).insert(name, value);
            }
        }
    }

    /// Every behavior body in declaration-bucket order.
    pub fn bodies(&self) -> Vec<(BodyKind, &str, &FunctionValue)> {
        let mut out = Vec::new();
        for (_, name, f) in self.methods.iter() {
            let kind = if name == "constructor" {
                BodyKind::Constructor
            } else {
                BodyKind::Method
            };
            out.push((kind, name.as_str(), f));
        }
        for (name, f) in &self.getters {
            out.push((BodyKind::Getter, name.as_str(), f));
        }
        for (name, f) in &self.setters {
            out.push((BodyKind::Setter, name.as_str(), f));
        }
        for (name, f) in &self.event_handlers {
            out.push((BodyKind::EventHandler, name.as_str(), f));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementNode {
    pub name: Option<String>,
    pub class_refs: Vec<String>,
    pub overrides: Members,
    pub children: Vec<ElementNode>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDefinition {
    pub name: String,
    pub parents: Vec<String>,
    pub members: Members,
    pub children: Vec<ElementNode>,
    pub source_file: String,
    pub span: Span,
}

pub type ClassTable = IndexMap<String, ClassDefinition>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FontFace {
    pub block: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataImport {
    pub name: String,
    pub path: String,
    pub span: Span,
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALIDATION PASSES
// ═══════════════════════════════════════════════════════════════════════════════

/// Checks that variables, methods, style keys and named children of one class
/// never share a name. Runs over the complete body, so declaration order does not matter.
pub fn validate_unique_members(
    class_name: &str,
    declarations: &[Declaration],
    children: &[ElementNode],
    file: &str,
    text: &str,
) -> Result<(), Diagnostic> {
    let mut seen: HashMap<&str, Span> = HashMap::new();
    let names = declarations
        .iter()
        .filter(|d| {
            matches!(
                d.kind,
                DeclarationKind::Variable | DeclarationKind::Method | DeclarationKind::StyleProperty
            )
        })
        .map(|d| (d.name.as_str(), d.span))
        .chain(
            children
                .iter()
                .filter_map(|c| c.name.as_deref().map(|n| (n, c.span))),
        );

    let mut first_duplicate: Option<(&str, Span)> = None;
    for (name, span) in names {
        if seen.insert(name, span).is_some() {
            let earlier = first_duplicate.map(|(_, s)| s.start).unwrap_or(usize::MAX);
            if span.start < earlier {
                first_duplicate = Some((name, span));
            }
        }
    }

    match first_duplicate {
        Some((name, span)) => Err(Diagnostic::at(
            ERR_DUPLICATE_MEMBER,
            &format!(
                "Class '{}' has a duplicate member '{}'. Variables, methods, style properties and named children should have unique names",
                class_name, name
            ),
            file,
            text,
            span,
        )),
        None => Ok(()),
    }
}

/// Collects every named element of the visible tree, reporting names used twice.
pub fn collect_global_names(
    roots: &[ElementNode],
    file: &str,
    text: &str,
) -> (IndexMap<String, ElementNode>, Vec<Diagnostic>) {
    fn walk(
        nodes: &[ElementNode],
        global: &mut IndexMap<String, ElementNode>,
        errors: &mut Vec<Diagnostic>,
        file: &str,
        text: &str,
    ) {
        for node in nodes {
            if let Some(name) = &node.name {
                if global.contains_key(name) {
                    errors.push(Diagnostic::at(
                        ERR_DUPLICATE_GLOBAL,
                        "Duplicate global name is found",
                        file,
                        text,
                        node.span,
                    ));
                } else {
                    global.insert(name.clone(), node.clone());
                }
            }
            walk(&node.children, global, errors, file, text);
        }
    }

    let mut global = IndexMap::new();
    let mut errors = Vec::new();
    walk(roots, &mut global, &mut errors, file, text);
    (global, errors)
}
