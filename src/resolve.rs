//! Inheritance Resolver
//!
//! Merges a class with all of its ancestors. Parents are visited in declared
//! order and each parent's own ancestors are visited right after it; every map
//! is filled only where a key is still absent, so the class itself wins first,
//! then the earliest parent and its line, then later parents.

use crate::renamer::ResolvableNames;
use crate::validate::{
    ClassDefinition, ClassTable, DeclarationValue, Diagnostic, ElementNode, FunctionValue,
    Members, Scalar, Span, ERR_INHERITANCE_CYCLE, ERR_UNKNOWN_CLASS,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

lazy_static::lazy_static! {
    pub static ref HTML_TAGS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        for tag in [
            "html", "base", "head", "link", "meta", "script", "style", "title", "body",
            "address", "article", "aside", "footer", "header", "h1", "h2", "h3", "h4", "h5",
            "h6", "hgroup", "main", "nav", "section", "blockquote", "cite", "dd", "dt", "dl",
            "div", "figcaption", "figure", "hr", "li", "ol", "p", "pre", "ul", "a", "abbr",
            "b", "bdi", "bdo", "br", "code", "data", "time", "dfn", "em", "i", "kbd", "mark",
            "q", "rb", "ruby", "rp", "rt", "rtc", "s", "del", "ins", "samp", "small", "span",
            "strong", "sub", "sup", "u", "var", "wbr", "area", "map", "audio", "img", "track",
            "video", "embed", "iframe", "object", "param", "picture", "source", "canvas",
            "noscript", "caption", "col", "colgroup", "table", "tbody", "tr", "td", "tfoot",
            "th", "thead", "button", "datalist", "option", "fieldset", "label", "form",
            "input", "legend", "meter", "optgroup", "select", "output", "progress",
            "textarea", "details", "dialog", "menu", "summary", "slot", "template",
            "acronym", "applet", "basefont", "bgsound", "big", "blink", "center", "command",
            "content", "dir", "element", "font", "frame", "frameset", "image", "isindex",
            "keygen", "listing", "marquee", "menuitem", "multicol", "nextid", "nobr",
            "noembed", "noframes", "plaintext", "shadow", "spacer", "strike", "tt", "xmp",
        ] {
            s.insert(tag);
        }
        s
    };
}

/// Names every instance answers to without declaring them.
pub const BUILTIN_MEMBERS: &[&str] = &["text", "value", "children", "html", "trigger"];

pub const DEFAULT_TAG: &str = "div";

// ═══════════════════════════════════════════════════════════════════════════════
// RESOLVED CLASS
// ═══════════════════════════════════════════════════════════════════════════════

/// A variable, method or named child visible through an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Member {
    Variable(DeclarationValue),
    Method(FunctionValue),
    Child(ElementNode),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedClass {
    pub name: String,
    pub style: IndexMap<String, Scalar>,
    pub attributes: IndexMap<String, Scalar>,
    pub getters: IndexMap<String, FunctionValue>,
    pub setters: IndexMap<String, FunctionValue>,
    pub event_handlers: IndexMap<String, FunctionValue>,
    pub states: IndexMap<String, String>,
    pub public: IndexMap<String, Member>,
    /// Protected members plus every named child element along the chain.
    pub protected: IndexMap<String, Member>,
    /// Private members of the class itself; never inherited.
    pub private: IndexMap<String, Member>,
    /// Ancestors that are raw tags or inherit from one, in precedence order.
    pub graphical_ancestors: Vec<String>,
}

impl ResolvedClass {
    /// Whether an instance owns a concrete tree node.
    pub fn is_graphical(&self) -> bool {
        !self.graphical_ancestors.is_empty()
    }

    /// Names the rewriter may qualify inside this class's bodies. A protected
    /// or private name hides a public one with the same spelling.
    pub fn resolvable_names(&self) -> ResolvableNames {
        let mut names = ResolvableNames::default();
        names.public.extend(self.style.keys().cloned());
        names.public.extend(self.attributes.keys().map(|k| format!("${}", k)));
        names.public.extend(self.getters.keys().cloned());
        names.public.extend(self.setters.keys().cloned());
        names.public.extend(self.event_handlers.keys().map(|k| format!("@{}", k)));
        names
            .public
            .extend(self.public.keys().filter(|k| *k != "constructor").cloned());
        names.public.extend(BUILTIN_MEMBERS.iter().map(|s| s.to_string()));

        names.protected.extend(self.protected.keys().cloned());
        for hidden in self.protected.keys().chain(self.private.keys()) {
            names.public.remove(hidden);
        }
        for hidden in self.private.keys() {
            names.protected.remove(hidden);
        }
        names
    }
}

fn fill<V: Clone>(into: &mut IndexMap<String, V>, from: &IndexMap<String, V>) {
    for (key, value) in from {
        if !into.contains_key(key) {
            into.insert(key.clone(), value.clone());
        }
    }
}

fn fill_members(into: &mut IndexMap<String, Member>, items: impl Iterator<Item = (String, Member)>) {
    for (key, value) in items {
        into.entry(key).or_insert(value);
    }
}

struct Merge<'t> {
    table: &'t ClassTable,
    out: ResolvedClass,
    /// Classes on the current inheritance path.
    path: Vec<String>,
    graphical: HashSet<String>,
}

impl<'t> Merge<'t> {
    fn absorb(&mut self, members: &Members, children: &[ElementNode], own: bool) {
        let out = &mut self.out;
        fill(&mut out.style, &members.style);
        fill(&mut out.attributes, &members.attributes);
        fill(&mut out.getters, &members.getters);
        fill(&mut out.setters, &members.setters);
        fill(&mut out.event_handlers, &members.event_handlers);
        fill(&mut out.states, &members.states);

        fill_members(
            &mut out.public,
            members
                .variables
                .public
                .iter()
                .map(|(k, v)| (k.clone(), Member::Variable(v.clone())))
                .chain(members.methods.public.iter().map(|(k, f)| (k.clone(), Member::Method(f.clone())))),
        );
        fill_members(
            &mut out.protected,
            members
                .variables
                .protected
                .iter()
                .map(|(k, v)| (k.clone(), Member::Variable(v.clone())))
                .chain(members.methods.protected.iter().map(|(k, f)| (k.clone(), Member::Method(f.clone()))))
                .chain(children.iter().filter_map(|c| {
                    c.name.clone().map(|name| (name, Member::Child(c.clone())))
                })),
        );
        if own {
            fill_members(
                &mut out.private,
                members
                    .variables
                    .private
                    .iter()
                    .map(|(k, v)| (k.clone(), Member::Variable(v.clone())))
                    .chain(members.methods.private.iter().map(|(k, f)| (k.clone(), Member::Method(f.clone())))),
            );
        }
    }

    /// Absorbs `parents` and their lines. Returns whether any of them is graphical.
    fn ancestors(&mut self, owner: &str, parents: &[String], span: Span, file: &str) -> Result<bool, Diagnostic> {
        let mut graphical = false;
        for parent in parents {
            let Some(class) = self.table.get(parent) else {
                if HTML_TAGS.contains(parent.as_str()) {
                    let slot = self.out.graphical_ancestors.len();
                    self.mark_graphical(parent, slot);
                    graphical = true;
                    continue;
                }
                return Err(unknown_class(parent, file, span));
            };
            if self.path.iter().any(|p| p == parent) {
                return Err(Diagnostic::new(
                    ERR_INHERITANCE_CYCLE,
                    &format!("Class '{}' inherits from itself through '{}'", parent, owner),
                    file,
                    0,
                    0,
                )
                .with_span(span));
            }
            let slot = self.out.graphical_ancestors.len();
            self.path.push(parent.clone());
            self.absorb(&class.members, &class.children, false);
            let inherited = self.ancestors(&class.name, &class.parents, class.span, &class.source_file)?;
            self.path.pop();
            if inherited {
                self.mark_graphical(parent, slot);
                graphical = true;
            }
        }
        Ok(graphical)
    }

    fn mark_graphical(&mut self, name: &str, slot: usize) {
        if self.graphical.insert(name.to_string()) {
            self.out.graphical_ancestors.insert(slot, name.to_string());
        }
    }
}

fn unknown_class(name: &str, file: &str, span: Span) -> Diagnostic {
    Diagnostic::new(
        ERR_UNKNOWN_CLASS,
        &format!("The class '{}' is not found. Probably it is not included.", name),
        file,
        0,
        0,
    )
    .with_span(span)
}

fn merge(
    table: &ClassTable,
    name: &str,
    parents: &[String],
    members: &Members,
    children: &[ElementNode],
    span: Span,
    file: &str,
) -> Result<ResolvedClass, Diagnostic> {
    let mut m = Merge {
        table,
        out: ResolvedClass {
            name: name.to_string(),
            ..ResolvedClass::default()
        },
        path: vec![name.to_string()],
        graphical: HashSet::new(),
    };
    m.absorb(members, children, true);
    m.ancestors(name, parents, span, file)?;
    Ok(m.out)
}

/// Resolves `name` against the table. The table itself is never modified.
pub fn resolve(table: &ClassTable, name: &str) -> Result<ResolvedClass, Diagnostic> {
    let class: &ClassDefinition = table.get(name).ok_or_else(|| {
        Diagnostic::new(
            ERR_UNKNOWN_CLASS,
            &format!("The class '{}' is not found. Probably it is not included.", name),
            "",
            0,
            0,
        )
    })?;
    merge(
        table,
        &class.name,
        &class.parents,
        &class.members,
        &class.children,
        class.span,
        &class.source_file,
    )
}

/// Resolves an element as an anonymous class whose parents are its class references.
pub fn resolve_element(table: &ClassTable, element: &ElementNode, file: &str) -> Result<ResolvedClass, Diagnostic> {
    merge(
        table,
        element.name.as_deref().unwrap_or(""),
        &element.class_refs,
        &element.overrides,
        &element.children,
        element.span,
        file,
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// GRAPHICAL ANCESTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// True for a raw tag, or a class with any ancestor that is a raw tag.
pub fn is_graphical(table: &ClassTable, name: &str) -> Result<bool, Diagnostic> {
    fn walk(table: &ClassTable, name: &str, path: &mut Vec<String>) -> Result<bool, Diagnostic> {
        let Some(class) = table.get(name) else {
            return if HTML_TAGS.contains(name) {
                Ok(true)
            } else {
                Err(unknown_class(name, "", Span::default()))
            };
        };
        if path.iter().any(|p| p == name) {
            return Ok(false);
        }
        path.push(name.to_string());
        let mut found = false;
        for parent in &class.parents {
            if walk(table, parent, path)? {
                found = true;
                break;
            }
        }
        path.pop();
        Ok(found)
    }
    walk(table, name, &mut Vec::new())
}

/// Ordered graphical ancestors of `name`, without resolving members.
pub fn graphical_ancestors(table: &ClassTable, name: &str) -> Result<Vec<String>, Diagnostic> {
    resolve(table, name).map(|r| r.graphical_ancestors)
}

/// The first raw tag reachable through `class`'s parents, depth first.
fn inherited_tag(table: &ClassTable, class: &ClassDefinition, path: &mut Vec<String>) -> Option<String> {
    if path.contains(&class.name) {
        return None;
    }
    path.push(class.name.clone());
    let mut found = None;
    for parent in &class.parents {
        if let Some(parent_class) = table.get(parent) {
            found = inherited_tag(table, parent_class, path);
        } else if HTML_TAGS.contains(parent.as_str()) {
            found = Some(parent.clone());
        }
        if found.is_some() {
            break;
        }
    }
    path.pop();
    found
}

/// Tag an element with these class references renders as. A later reference
/// that names or inherits a tag replaces an earlier one.
pub fn element_tag(table: &ClassTable, class_refs: &[String]) -> String {
    let mut tag = DEFAULT_TAG.to_string();
    for reference in class_refs {
        if HTML_TAGS.contains(reference.as_str()) {
            tag = reference.clone();
        }
        if let Some(class) = table.get(reference) {
            if let Some(inherited) = inherited_tag(table, class, &mut Vec::new()) {
                tag = inherited;
            }
        }
    }
    tag
}

/// Inline `text`/`html` of an element, falling back to its referenced classes, last first.
pub fn element_text(table: &ClassTable, element: &ElementNode) -> Option<DeclarationValue> {
    let own = &element.overrides.variables.public;
    if let Some(v) = own.get("text").or_else(|| own.get("html")) {
        return Some(v.clone());
    }
    element.class_refs.iter().rev().find_map(|reference| {
        let vars = &table.get(reference)?.members.variables.public;
        vars.get("text").or_else(|| vars.get("html")).cloned()
    })
}

/// Whether some top-level element renders as `<html>`.
pub fn has_document_root(table: &ClassTable, roots: &[ElementNode]) -> bool {
    roots
        .iter()
        .any(|root| element_tag(table, &root.class_refs) == "html")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MaskCache;
    use crate::mask::MaskMode;
    use crate::parse::parse_classes;
    use crate::search::CodeText;

    fn table(text: &str) -> ClassTable {
        let cache = MaskCache::new();
        let code = CodeText::new(text, MaskMode::Declarations, &cache);
        parse_classes(&code, 0, "test.nazca").unwrap()
    }

    fn style(resolved: &ResolvedClass, key: &str) -> String {
        resolved.style[key].as_text()
    }

    #[test]
    fn test_earlier_parent_wins() {
        let t = table(
            "class B { color: blue; width: 1px; }; \
             class C { color: green; height: 2px; }; \
             class A < B < C { margin: 0; };",
        );
        let a = resolve(&t, "A").unwrap();
        assert_eq!(style(&a, "color"), "blue");
        assert_eq!(style(&a, "width"), "1px");
        assert_eq!(style(&a, "height"), "2px");
        assert_eq!(style(&a, "margin"), "0");
    }

    #[test]
    fn test_own_declaration_wins() {
        let t = table("class B { color: blue; }; class A < B { color: red; };");
        assert_eq!(style(&resolve(&t, "A").unwrap(), "color"), "red");
    }

    #[test]
    fn test_earlier_parent_ancestors_beat_later_parent() {
        let t = table(
            "class Root { color: black; }; \
             class B < Root { }; \
             class C { color: green; }; \
             class A < B < C { };",
        );
        assert_eq!(style(&resolve(&t, "A").unwrap(), "color"), "black");
    }

    #[test]
    fn test_diamond() {
        let t = table(
            "class Top { #count: 0; color: black; }; \
             class L < Top { }; \
             class R < Top { color: white; }; \
             class D < L < R { };",
        );
        let d = resolve(&t, "D").unwrap();
        assert_eq!(style(&d, "color"), "black");
        assert!(d.protected.contains_key("count"));
    }

    #[test]
    fn test_named_children_are_protected() {
        let t = table("class Card { title.h1; .p; };");
        let card = resolve(&t, "Card").unwrap();
        assert!(matches!(card.protected.get("title"), Some(Member::Child(_))));
        assert_eq!(card.protected.len(), 1);
    }

    #[test]
    fn test_private_is_not_inherited() {
        let t = table("class B { -secret: 1; }; class A < B { };");
        assert!(resolve(&t, "B").unwrap().private.contains_key("secret"));
        assert!(resolve(&t, "A").unwrap().private.is_empty());
    }

    #[test]
    fn test_unknown_parent() {
        let t = table("class A < Missing { };");
        let err = resolve(&t, "A").unwrap_err();
        assert_eq!(err.message, "The class 'Missing' is not found. Probably it is not included.");
        assert_eq!(err.code.as_deref(), Some(ERR_UNKNOWN_CLASS));
    }

    #[test]
    fn test_cycle_is_reported() {
        let t = table("class A < B { }; class B < A { };");
        let err = resolve(&t, "A").unwrap_err();
        assert_eq!(err.code.as_deref(), Some(ERR_INHERITANCE_CYCLE));
    }

    #[test]
    fn test_graphical_ancestors() {
        let t = table("class Base < button { }; class Plain { }; class A < Plain < Base { };");
        let a = resolve(&t, "A").unwrap();
        assert_eq!(a.graphical_ancestors, vec!["Base", "button"]);
        assert!(a.is_graphical());
        assert!(!resolve(&t, "Plain").unwrap().is_graphical());
        assert!(is_graphical(&t, "Base").unwrap());
    }

    #[test]
    fn test_element_tag() {
        let t = table("class Field < input { }; class Box { };");
        assert_eq!(element_tag(&t, &["Box".to_string()]), "div");
        assert_eq!(element_tag(&t, &["span".to_string(), "Field".to_string()]), "input");
        assert_eq!(element_tag(&t, &["Field".to_string(), "span".to_string()]), "span");
    }

    #[test]
    fn test_resolvable_names() {
        let t = table(
            "class A { #x: 1; y: 2; $title: 'a'; @click: (e) { }; color: red; }; \
             class B < A { -y: 3; };",
        );
        let names = resolve(&t, "B").unwrap().resolvable_names();
        assert!(names.protected.contains("x"));
        assert!(names.public.contains("$title"));
        assert!(names.public.contains("@click"));
        assert!(names.public.contains("color"));
        assert!(names.public.contains("text"));
        assert!(!names.public.contains("y"));
    }
}
