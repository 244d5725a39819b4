//! Literal Mask
//!
//! One pass over a buffer marking every byte offset that lies inside a string,
//! template, regular-expression literal or comment. In declaration mode a
//! `name: value` additionally masks its scalar value up to the terminating `;`,
//! so scanners looking for structure never stop inside a declaration value.
//!
//! Offsets are byte offsets. Every delimiter the machine reacts to is ASCII,
//! so a masked/unmasked boundary always falls on a char boundary.

/// Which grammar the buffer is scanned with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaskMode {
    /// Nazca declarations: colon regions are active.
    Declarations,
    /// Embedded behavior code: plain literal and comment masking.
    Code,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralMask {
    bits: Vec<bool>,
}

impl LiteralMask {
    pub fn is_masked(&self, offset: usize) -> bool {
        self.bits.get(offset).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }
}

pub fn build_mask(text: &str, mode: MaskMode) -> LiteralMask {
    let mut builder = MaskBuilder {
        bytes: text.as_bytes(),
        bits: vec![false; text.len()],
    };
    builder.scan(0, mode, false);
    LiteralMask { bits: builder.bits }
}

const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "of", "new", "delete", "void", "throw",
    "instanceof", "yield", "await",
];

struct MaskBuilder<'a> {
    bytes: &'a [u8],
    bits: Vec<bool>,
}

impl<'a> MaskBuilder<'a> {
    fn peek(&self, i: usize) -> Option<u8> {
        self.bytes.get(i).copied()
    }

    fn mark(&mut self, from: usize, to: usize) {
        let to = to.min(self.bits.len());
        let from = from.min(to);
        for bit in &mut self.bits[from..to] {
            *bit = true;
        }
    }

    /// Scans live code from `start`. With `stop_at_close`, returns the offset of the
    /// `}` closing the enclosing block; otherwise runs to the end.
    fn scan(&mut self, start: usize, mode: MaskMode, stop_at_close: bool) -> usize {
        let len = self.bytes.len();
        let mut depth = 0usize;
        let mut i = start;
        while i < len {
            match self.bytes[i] {
                b'\'' | b'"' => i = self.quoted(i),
                b'`' => i = self.template(i),
                b'/' if self.peek(i + 1) == Some(b'/') => i = self.line_comment(i),
                b'/' if self.peek(i + 1) == Some(b'*') => i = self.block_comment(i),
                b'/' if regex_allowed(self.bytes, i) => i = self.regex(i),
                b'{' => {
                    depth += 1;
                    i += 1;
                }
                b'}' => {
                    if depth == 0 && stop_at_close {
                        return i;
                    }
                    depth = depth.saturating_sub(1);
                    i += 1;
                }
                b':' if mode == MaskMode::Declarations && !at_statement_start(self.bytes, i) => {
                    i = self.colon_region(i)
                }
                _ => i += 1,
            }
        }
        len
    }

    fn quoted(&mut self, open: usize) -> usize {
        let quote = self.bytes[open];
        let mut j = open + 1;
        while j < self.bytes.len() {
            match self.bytes[j] {
                b'\\' => j += 2,
                b'\n' => break,
                c if c == quote => {
                    self.mark(open, j + 1);
                    return j + 1;
                }
                _ => j += 1,
            }
        }
        let end = j.min(self.bytes.len());
        self.mark(open, end);
        end
    }

    fn template(&mut self, open: usize) -> usize {
        let len = self.bytes.len();
        let mut mark_from = open;
        let mut j = open + 1;
        while j < len {
            match self.bytes[j] {
                b'\\' => j += 2,
                b'`' => {
                    self.mark(mark_from, j + 1);
                    return j + 1;
                }
                b'$' if self.peek(j + 1) == Some(b'{') => {
                    self.mark(mark_from, j + 2);
                    let close = self.scan(j + 2, MaskMode::Code, true);
                    if close >= len {
                        return len;
                    }
                    mark_from = close;
                    j = close + 1;
                }
                _ => j += 1,
            }
        }
        self.mark(mark_from, len);
        len
    }

    fn line_comment(&mut self, open: usize) -> usize {
        let end = self.bytes[open..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| open + p)
            .unwrap_or(self.bytes.len());
        self.mark(open, end);
        end
    }

    fn block_comment(&mut self, open: usize) -> usize {
        let end = self.bytes[open + 2..]
            .windows(2)
            .position(|w| w == b"*/")
            .map(|p| open + 2 + p + 2)
            .unwrap_or(self.bytes.len());
        self.mark(open, end);
        end
    }

    fn regex(&mut self, open: usize) -> usize {
        let mut in_class = false;
        let mut j = open + 1;
        while j < self.bytes.len() {
            match self.bytes[j] {
                b'\\' => {
                    j += 2;
                    continue;
                }
                b'\n' => break,
                b'[' => in_class = true,
                b']' => in_class = false,
                b'/' if !in_class => {
                    self.mark(open, j + 1);
                    return j + 1;
                }
                _ => {}
            }
            j += 1;
        }
        let end = j.min(self.bytes.len());
        self.mark(open, end);
        end
    }

    /// A `:` that names a value. Method bodies are masked as code, object values
    /// with the declaration grammar, and scalars whole up to `;` or the `}`
    /// closing the enclosing block.
    fn colon_region(&mut self, colon: usize) -> usize {
        let len = self.bytes.len();
        let mut j = colon + 1;
        while j < len && self.bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        if j >= len {
            return len;
        }
        match self.bytes[j] {
            b'(' => {
                let mut depth = 0usize;
                let Some(close) = self.bytes[j..].iter().position(|&b| {
                    match b {
                        b'(' => depth += 1,
                        b')' => depth -= 1,
                        _ => {}
                    }
                    depth == 0
                }) else {
                    return j + 1;
                };
                let close = j + close;
                let mut k = close + 1;
                while k < len && self.bytes[k].is_ascii_whitespace() {
                    k += 1;
                }
                if k < len && self.bytes[k] == b'{' {
                    self.block(k, MaskMode::Code)
                } else {
                    close + 1
                }
            }
            b'{' => self.block(j, MaskMode::Declarations),
            _ => self.scalar(j),
        }
    }

    fn block(&mut self, open: usize, mode: MaskMode) -> usize {
        let close = self.scan(open + 1, mode, true);
        if close >= self.bytes.len() {
            self.bytes.len()
        } else {
            close + 1
        }
    }

    fn scalar(&mut self, start: usize) -> usize {
        let len = self.bytes.len();
        let mut k = start;
        if matches!(self.bytes[k], b'\'' | b'"' | b'`') {
            let quote = self.bytes[k];
            k += 1;
            while k < len {
                if self.bytes[k] == b'\\' {
                    k += 2;
                    continue;
                }
                k += 1;
                if self.bytes[k - 1] == quote {
                    break;
                }
            }
        }
        let mut depth = 0usize;
        while k < len {
            match self.bytes[k] {
                b'\\' => {
                    k += 2;
                    continue;
                }
                b';' => break,
                b'{' => depth += 1,
                b'}' => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                _ => {}
            }
            k += 1;
        }
        let end = k.min(len);
        self.mark(start, end);
        end
    }
}

/// True when the last non-space byte before `i` ends a statement (or there is none),
/// which makes a colon at `i` a state sigil rather than a value separator.
fn at_statement_start(bytes: &[u8], i: usize) -> bool {
    let mut k = i;
    while k > 0 && bytes[k - 1].is_ascii_whitespace() {
        k -= 1;
    }
    k == 0 || matches!(bytes[k - 1], b';' | b'{' | b'}')
}

fn regex_allowed(bytes: &[u8], i: usize) -> bool {
    let mut k = i;
    while k > 0 && bytes[k - 1].is_ascii_whitespace() {
        k -= 1;
    }
    if k == 0 {
        return true;
    }
    let prev = bytes[k - 1];
    if b"(,=:[!&|?{};+-*%<>~^".contains(&prev) {
        return true;
    }
    if prev.is_ascii_alphanumeric() || prev == b'_' || prev == b'$' {
        let end = k;
        while k > 0 && (bytes[k - 1].is_ascii_alphanumeric() || bytes[k - 1] == b'_' || bytes[k - 1] == b'$') {
            k -= 1;
        }
        let word = std::str::from_utf8(&bytes[k..end]).unwrap_or("");
        return REGEX_PREFIX_KEYWORDS.contains(&word);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn masked(text: &str, mode: MaskMode) -> String {
        let mask = build_mask(text, mode);
        (0..text.len())
            .map(|i| if mask.is_masked(i) { '#' } else { '.' })
            .collect()
    }

    #[test]
    fn test_quotes_and_comments_are_masked() {
        assert_eq!(masked("a 'b;c' d", MaskMode::Code), "..#####..");
        assert_eq!(masked("x // y\nz", MaskMode::Code), "..####..");
        assert_eq!(masked("a /* } */ b", MaskMode::Code), "..#######..");
    }

    #[test]
    fn test_escaped_quote_does_not_close() {
        assert_eq!(masked(r"'a\'b' c", MaskMode::Code), "######..");
    }

    #[test]
    fn test_template_interpolation_stays_live() {
        assert_eq!(masked("`a${b}c`", MaskMode::Code), "####.###");
    }

    #[test]
    fn test_division_is_not_a_regex() {
        assert_eq!(masked("a / b; c / d", MaskMode::Code), "............");
        assert_eq!(masked("x = /a;b/g;", MaskMode::Code), "....#####..");
    }

    #[test]
    fn test_colon_masks_scalar_value() {
        let text = "color: red; x";
        assert_eq!(masked(text, MaskMode::Declarations), ".......###...");
        assert_eq!(masked(text, MaskMode::Code), ".............");
    }

    #[test]
    fn test_url_in_scalar_is_not_a_comment() {
        let text = "src: http://a/b;\nnext: 1;";
        let mask = build_mask(text, MaskMode::Declarations);
        let semicolon = text.find(';').unwrap();
        assert!(!mask.is_masked(semicolon));
        assert!(!mask.is_masked(text.find("next").unwrap()));
    }

    #[test]
    fn test_scalar_ends_at_enclosing_close() {
        let text = "{ a: 1 } b";
        assert_eq!(masked(text, MaskMode::Declarations), ".....##...");
    }

    #[test]
    fn test_state_sigil_opens_no_region() {
        let text = "{ :hover: { a: 1; }; }";
        let mask = build_mask(text, MaskMode::Declarations);
        assert!(!mask.is_masked(2));
        assert!(!mask.is_masked(3));
        assert!(mask.is_masked(text.find('1').unwrap()));
        assert!(!mask.is_masked(text.rfind('}').unwrap()));
    }

    #[test]
    fn test_url_inside_object_value_keeps_braces_live() {
        let text = "*font-face: { src: url(https://x.io/a.woff); }; :hover: { background: url(http://x.io/a.png); }; w: 1;";
        let mask = build_mask(text, MaskMode::Declarations);
        for (i, b) in text.bytes().enumerate() {
            if b == b'{' || b == b'}' {
                assert!(!mask.is_masked(i), "brace at {} is masked", i);
            }
        }
        assert!(mask.is_masked(text.find("//x.io/a.woff").unwrap()));
        assert!(!mask.is_masked(text.find("w:").unwrap()));
    }

    #[test]
    fn test_method_body_literals_are_masked_as_code() {
        let text = "f: (a) { return ':}'; }; g: 2;";
        let mask = build_mask(text, MaskMode::Declarations);
        assert!(!mask.is_masked(text.find("return").unwrap()));
        assert!(mask.is_masked(text.find(":}").unwrap()));
        assert!(!mask.is_masked(text.rfind('}').unwrap()));
        assert!(mask.is_masked(text.rfind('2').unwrap()));
    }
}
