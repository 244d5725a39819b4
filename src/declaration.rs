//! Declaration Parser
//!
//! Parses one `name: value;`, `name: (params) { body }` or `name: { block }` unit
//! of a class or element body into a typed, access-qualified [`Declaration`].

use crate::scope::split_top_level;
use crate::search::CodeText;
use crate::validate::{
    Access, Declaration, DeclarationKind, DeclarationValue, Diagnostic, FunctionValue, Scalar,
    Span, ERR_INVALID_PROPERTY, ERR_MEMBER_VALUE, ERR_MISSING_TERMINATOR, ERR_PROPERTY_NAME,
    ERR_STYLE_OVERRIDE,
};
use regex::Regex;
use std::collections::HashSet;

lazy_static::lazy_static! {
    static ref PROPERTY_NAME: Regex = Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$\-]*$").unwrap();
    static ref NUMBER: Regex = Regex::new(r"^-?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").unwrap();

    pub static ref CSS_PROPERTIES: HashSet<&'static str> = {
        let mut s = HashSet::new();
        for name in [
            "align-content", "align-items", "align-self", "all", "animation", "animation-delay",
            "animation-direction", "animation-duration", "animation-fill-mode",
            "animation-iteration-count", "animation-name", "animation-play-state",
            "animation-timing-function", "appearance", "backdrop-filter", "backface-visibility",
            "background", "background-attachment", "background-blend-mode", "background-clip",
            "background-color", "background-image", "background-origin", "background-position",
            "background-repeat", "background-size", "border", "border-bottom",
            "border-bottom-color", "border-bottom-left-radius", "border-bottom-right-radius",
            "border-bottom-style", "border-bottom-width", "border-collapse", "border-color",
            "border-image", "border-image-outset", "border-image-repeat", "border-image-slice",
            "border-image-source", "border-image-width", "border-left", "border-left-color",
            "border-left-style", "border-left-width", "border-radius", "border-right",
            "border-right-color", "border-right-style", "border-right-width", "border-spacing",
            "border-style", "border-top", "border-top-color", "border-top-left-radius",
            "border-top-right-radius", "border-top-style", "border-top-width", "border-width",
            "bottom", "box-decoration-break", "box-shadow", "box-sizing", "break-after",
            "break-before", "break-inside", "caption-side", "caret-color", "clear", "clip",
            "clip-path", "color", "column-count", "column-fill", "column-gap", "column-rule",
            "column-rule-color", "column-rule-style", "column-rule-width", "column-span",
            "column-width", "columns", "content", "counter-increment", "counter-reset",
            "cursor", "direction", "display", "empty-cells", "filter", "flex", "flex-basis",
            "flex-direction", "flex-flow", "flex-grow", "flex-shrink", "flex-wrap", "float",
            "font", "font-family", "font-feature-settings", "font-kerning", "font-size",
            "font-size-adjust", "font-stretch", "font-style", "font-variant", "font-weight",
            "gap", "grid", "grid-area", "grid-auto-columns", "grid-auto-flow", "grid-auto-rows",
            "grid-column", "grid-column-end", "grid-column-gap", "grid-column-start",
            "grid-gap", "grid-row", "grid-row-end", "grid-row-gap", "grid-row-start",
            "grid-template", "grid-template-areas", "grid-template-columns",
            "grid-template-rows", "hanging-punctuation", "height", "hyphens", "isolation",
            "justify-content", "justify-items", "justify-self", "left", "letter-spacing",
            "line-height", "list-style", "list-style-image", "list-style-position",
            "list-style-type", "margin", "margin-bottom", "margin-left", "margin-right",
            "margin-top", "max-height", "max-width", "min-height", "min-width",
            "mix-blend-mode", "object-fit", "object-position", "opacity", "order", "outline",
            "outline-color", "outline-offset", "outline-style", "outline-width", "overflow",
            "overflow-wrap", "overflow-x", "overflow-y", "padding", "padding-bottom",
            "padding-left", "padding-right", "padding-top", "page-break-after",
            "page-break-before", "page-break-inside", "perspective", "perspective-origin",
            "place-content", "place-items", "place-self", "pointer-events", "position",
            "quotes", "resize", "right", "row-gap", "scroll-behavior", "tab-size",
            "table-layout", "text-align", "text-align-last", "text-decoration",
            "text-decoration-color", "text-decoration-line", "text-decoration-style",
            "text-indent", "text-justify", "text-overflow", "text-shadow", "text-transform",
            "top", "transform", "transform-origin", "transform-style", "transition",
            "transition-delay", "transition-duration", "transition-property",
            "transition-timing-function", "unicode-bidi", "user-select", "vertical-align",
            "visibility", "white-space", "width", "word-break", "word-spacing", "word-wrap",
            "writing-mode", "z-index",
        ] {
            s.insert(name);
        }
        s
    };
}

fn sigil_of(c: u8) -> bool {
    matches!(c, b'#' | b'-' | b'<' | b'>' | b'$' | b'@' | b':')
}

/// Parses the declaration at (or after trivia from) `offset`.
///
/// Returns `Ok(None)` at a closing brace, at the end of the buffer, or when no
/// live `:` precedes the next `;`/`{`/`}`. On success also returns the offset
/// just past the consumed declaration, including its `;`.
pub fn parse_declaration(
    code: &CodeText,
    offset: usize,
    file: &str,
) -> Result<Option<(Declaration, usize)>, Diagnostic> {
    let text = code.text();
    let bytes = text.as_bytes();
    let start = code.skip_trivia(offset);
    if start >= bytes.len() || bytes[start] == b'}' {
        return Ok(None);
    }

    let search_from = if bytes[start] == b':' { start + 1 } else { start };
    let colon = match code.find_any(b":;{}", search_from) {
        Some((i, b':')) => i,
        _ => return Ok(None),
    };

    let raw_name = text[start..colon].trim();
    let (sigil, name) = match raw_name.as_bytes().first() {
        Some(&c) if sigil_of(c) => (Some(c), &raw_name[1..]),
        _ => (None, raw_name),
    };
    if !PROPERTY_NAME.is_match(name) {
        return Err(Diagnostic::at(
            ERR_PROPERTY_NAME,
            &format!("Invalid property name '{}'", raw_name),
            file,
            text,
            Span::new(start, colon),
        ));
    }

    let mut v = colon + 1;
    while v < bytes.len() && bytes[v].is_ascii_whitespace() {
        v += 1;
    }

    let (value, end) = match bytes.get(v) {
        Some(b'(') => parse_function(code, v, raw_name, file)?,
        Some(b'{') => {
            let close = code.matching_close(v).ok_or_else(|| {
                Diagnostic::at(
                    ERR_INVALID_PROPERTY,
                    &format!("Missing }} for the value of '{}'", raw_name),
                    file,
                    text,
                    Span::new(start, v),
                )
            })?;
            (
                DeclarationValue::Object(text[v..=close].to_string()),
                consume_semicolon(bytes, close + 1),
            )
        }
        _ => {
            let (value_end, end) = match code.find_any(b";}", v) {
                Some((i, b';')) => (i, i + 1),
                Some((i, _)) => (i, i),
                None => {
                    return Err(Diagnostic::at(
                        ERR_MISSING_TERMINATOR,
                        &format!("Missing ';' after '{}'", raw_name),
                        file,
                        text,
                        Span::new(start, bytes.len()),
                    ))
                }
            };
            (
                DeclarationValue::Scalar(classify_scalar(text[v.min(value_end)..value_end].trim())),
                end,
            )
        }
    };

    let is_function = matches!(value, DeclarationValue::Function(_));
    let (kind, access) = match sigil {
        Some(b'#') => (variable_or_method(is_function), Access::Protected),
        Some(b'-') => (variable_or_method(is_function), Access::Private),
        Some(b'<') => (DeclarationKind::Getter, Access::Public),
        Some(b'>') => (DeclarationKind::Setter, Access::Public),
        Some(b'$') => (DeclarationKind::Attribute, Access::Public),
        Some(b'@') => (DeclarationKind::EventHandler, Access::Public),
        Some(_) => (DeclarationKind::State, Access::Public),
        None if CSS_PROPERTIES.contains(name) => (DeclarationKind::StyleProperty, Access::Public),
        None => (variable_or_method(is_function), Access::Public),
    };

    let span = Span::new(start, end);
    let fail = |error_code: &str, message: String| {
        Err(Diagnostic::at(error_code, &message, file, text, span))
    };
    match (kind, &value) {
        (DeclarationKind::StyleProperty, DeclarationValue::Scalar(_)) => {}
        (DeclarationKind::StyleProperty, _) => {
            return fail(
                ERR_STYLE_OVERRIDE,
                format!(
                    "Style property '{}' cannot be overridden with a structural value",
                    name
                ),
            )
        }
        (DeclarationKind::Getter | DeclarationKind::Setter | DeclarationKind::EventHandler, v)
            if !matches!(v, DeclarationValue::Function(_)) =>
        {
            return fail(
                ERR_MEMBER_VALUE,
                format!(
                    "'{}' should be declared as a function: {}: (parameters) {{ ... }}",
                    raw_name, raw_name
                ),
            )
        }
        (DeclarationKind::Attribute, v) if !matches!(v, DeclarationValue::Scalar(_)) => {
            return fail(
                ERR_MEMBER_VALUE,
                format!("Attribute '{}' should have a scalar value", raw_name),
            )
        }
        (DeclarationKind::State, v) if !matches!(v, DeclarationValue::Object(_)) => {
            return fail(
                ERR_MEMBER_VALUE,
                format!("State '{}' should be a block of style properties", raw_name),
            )
        }
        _ => {}
    }

    Ok(Some((
        Declaration {
            name: name.to_string(),
            kind,
            access,
            value,
            span,
        },
        end,
    )))
}

fn variable_or_method(is_function: bool) -> DeclarationKind {
    if is_function {
        DeclarationKind::Method
    } else {
        DeclarationKind::Variable
    }
}

fn parse_function(
    code: &CodeText,
    open_paren: usize,
    raw_name: &str,
    file: &str,
) -> Result<(DeclarationValue, usize), Diagnostic> {
    let text = code.text();
    let bytes = text.as_bytes();
    let close_paren = closing_paren(code, open_paren).ok_or_else(|| {
        Diagnostic::at(
            ERR_INVALID_PROPERTY,
            &format!("Missing ) for the parameters of '{}'", raw_name),
            file,
            text,
            Span::new(open_paren, open_paren + 1),
        )
    })?;
    let parameters: Vec<String> = split_top_level(&text[open_paren + 1..close_paren], b',')
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    let open = code.skip_trivia(close_paren + 1);
    if bytes.get(open) != Some(&b'{') {
        return Err(Diagnostic::at(
            ERR_INVALID_PROPERTY,
            &format!("Missing {{ after the parameters of '{}'", raw_name),
            file,
            text,
            Span::new(close_paren, close_paren + 1),
        ));
    }
    let close = code.matching_close(open).ok_or_else(|| {
        Diagnostic::at(
            ERR_INVALID_PROPERTY,
            &format!("Missing }} for the body of '{}'", raw_name),
            file,
            text,
            Span::new(open, open + 1),
        )
    })?;

    Ok((
        DeclarationValue::Function(FunctionValue {
            parameters,
            body: text[open..=close].to_string(),
            body_span: Span::new(open, close + 1),
        }),
        consume_semicolon(bytes, close + 1),
    ))
}

/// Live `)` balancing the `(` at `open`.
fn closing_paren(code: &CodeText, open: usize) -> Option<usize> {
    let bytes = code.text().as_bytes();
    let mut depth = 0usize;
    for i in open..bytes.len() {
        if !code.is_code(i) {
            continue;
        }
        match bytes[i] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn consume_semicolon(bytes: &[u8], from: usize) -> usize {
    let mut i = from;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if bytes.get(i) == Some(&b';') {
        i + 1
    } else {
        from
    }
}

/// Trims one layer of matching quotes; unquoted text is typed by its shape.
fn classify_scalar(raw: &str) -> Scalar {
    let b = raw.as_bytes();
    if b.len() >= 2 && matches!(b[0], b'\'' | b'"' | b'`') && b[b.len() - 1] == b[0] {
        return Scalar::String(raw[1..raw.len() - 1].to_string());
    }
    match raw {
        "true" => Scalar::Boolean(true),
        "false" => Scalar::Boolean(false),
        _ if NUMBER.is_match(raw) => Scalar::Number(raw.to_string()),
        _ if raw.starts_with('[') || (raw.starts_with('/') && raw.len() > 1) => {
            Scalar::Literal(raw.to_string())
        }
        _ => Scalar::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MaskCache;
    use crate::mask::MaskMode;

    fn parse(text: &str) -> Result<Option<(Declaration, usize)>, Diagnostic> {
        let cache = MaskCache::new();
        let code = CodeText::new(text, MaskMode::Declarations, &cache);
        parse_declaration(&code, 0, "test.nazca")
    }

    fn decl(text: &str) -> Declaration {
        parse(text).unwrap().unwrap().0
    }

    #[test]
    fn test_scalar_variable_trims_quotes() {
        let d = decl("  title: 'Hello; world';");
        assert_eq!(d.name, "title");
        assert_eq!(d.kind, DeclarationKind::Variable);
        assert_eq!(d.access, Access::Public);
        assert_eq!(
            d.value,
            DeclarationValue::Scalar(Scalar::String("Hello; world".into()))
        );
    }

    #[test]
    fn test_sigils_select_access_and_kind() {
        assert_eq!(decl("#count: 1;").access, Access::Protected);
        assert_eq!(decl("-secret: true;").access, Access::Private);
        assert_eq!(decl("$href: '/';").kind, DeclarationKind::Attribute);
        assert_eq!(decl("<size: () { return 1; };").kind, DeclarationKind::Getter);
        assert_eq!(decl(">size: (v) { };").kind, DeclarationKind::Setter);
        assert_eq!(decl("@click: (e) { };").kind, DeclarationKind::EventHandler);
        assert_eq!(decl(":hover: { color: red; };").kind, DeclarationKind::State);
        assert_eq!(decl("#run: () { };").kind, DeclarationKind::Method);
    }

    #[test]
    fn test_known_style_property_is_classified() {
        let d = decl("background-color: #fff;");
        assert_eq!(d.kind, DeclarationKind::StyleProperty);
        assert_eq!(d.value, DeclarationValue::Scalar(Scalar::String("#fff".into())));
        assert_eq!(decl("$color: red;").kind, DeclarationKind::Attribute);
    }

    #[test]
    fn test_method_parameters_and_body() {
        let text = "sum: (a, b) { return a + '}'; }; next: 1;";
        let (d, end) = parse(text).unwrap().unwrap();
        match d.value {
            DeclarationValue::Function(f) => {
                assert_eq!(f.parameters, vec!["a", "b"]);
                assert_eq!(f.body, "{ return a + '}'; }");
                assert_eq!(&text[f.body_span.start..f.body_span.end], f.body);
            }
            other => panic!("expected function, got {:?}", other),
        }
        assert_eq!(&text[end..], " next: 1;");
    }

    #[test]
    fn test_parameters_split_at_top_level() {
        match decl("f: ({a, b}, c = g(1, 2), ...rest) { };").value {
            DeclarationValue::Function(f) => {
                assert_eq!(f.parameters, vec!["{a, b}", "c = g(1, 2)", "...rest"]);
                assert_eq!(f.body, "{ }");
            }
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_state_block_with_url() {
        let text = ":hover: { background: url(http://x.io/a.png); }; width: 1px;";
        let (d, end) = parse(text).unwrap().unwrap();
        assert_eq!(d.kind, DeclarationKind::State);
        assert_eq!(
            d.value,
            DeclarationValue::Object("{ background: url(http://x.io/a.png); }".into())
        );
        assert_eq!(&text[end..], " width: 1px;");
    }

    #[test]
    fn test_scalar_types() {
        let value = |t: &str| match decl(t).value {
            DeclarationValue::Scalar(s) => s,
            other => panic!("{:?}", other),
        };
        assert_eq!(value("n: 0.5;"), Scalar::Number("0.5".into()));
        assert_eq!(value("b: false;"), Scalar::Boolean(false));
        assert_eq!(value("list: [1, 2];"), Scalar::Literal("[1, 2]".into()));
    }

    #[test]
    fn test_last_declaration_may_omit_semicolon() {
        let text = "{ a: 1 }";
        let cache = MaskCache::new();
        let code = CodeText::new(text, MaskMode::Declarations, &cache);
        let (d, end) = parse_declaration(&code, 1, "f").unwrap().unwrap();
        assert_eq!(d.value, DeclarationValue::Scalar(Scalar::Number("1".into())));
        assert_eq!(&text[end..], "}");
    }

    #[test]
    fn test_no_declaration_at_close_or_without_colon() {
        assert!(parse("   }").unwrap().is_none());
        assert!(parse("").unwrap().is_none());
        assert!(parse(".div.Box;").unwrap().is_none());
    }

    #[test]
    fn test_invalid_name_is_reported() {
        let err = parse("my name: 1;").unwrap_err();
        assert_eq!(err.code.as_deref(), Some(ERR_PROPERTY_NAME));
        assert!(err.message.starts_with("Invalid property name"));
    }

    #[test]
    fn test_structural_style_override_is_rejected() {
        let err = parse("color: { a: 1 };").unwrap_err();
        assert_eq!(err.code.as_deref(), Some(ERR_STYLE_OVERRIDE));
        let err = parse("width: () { };").unwrap_err();
        assert_eq!(err.code.as_deref(), Some(ERR_STYLE_OVERRIDE));
    }

    #[test]
    fn test_getter_requires_function() {
        let err = parse("<size: 3;").unwrap_err();
        assert_eq!(err.code.as_deref(), Some(ERR_MEMBER_VALUE));
    }

    #[test]
    fn test_missing_terminator() {
        let err = parse("text: 'hi'").unwrap_err();
        assert_eq!(err.code.as_deref(), Some(ERR_MISSING_TERMINATOR));
    }
}
