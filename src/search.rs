//! Code-Aware Search
//!
//! Pattern search, statement splitting and brace matching over a buffer paired
//! with its literal mask. A match counts only when its first byte is live code.

use crate::cache::MaskCache;
use crate::mask::{LiteralMask, MaskMode};
use std::ops::Range;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CodeText<'a> {
    text: &'a str,
    mask: Arc<LiteralMask>,
}

impl<'a> CodeText<'a> {
    pub fn new(text: &'a str, mode: MaskMode, cache: &MaskCache) -> Self {
        Self {
            text,
            mask: cache.mask(text, mode),
        }
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn is_code(&self, offset: usize) -> bool {
        offset < self.text.len() && !self.mask.is_masked(offset)
    }

    /// First live occurrence of `pattern` at or after `from`.
    pub fn index_of(&self, pattern: &str, from: usize) -> Option<usize> {
        let mut from = from.min(self.text.len());
        while !self.text.is_char_boundary(from) {
            from += 1;
        }
        self.text[from..]
            .match_indices(pattern)
            .map(|(i, _)| from + i)
            .find(|&i| !self.mask.is_masked(i))
    }

    /// First live byte out of `set`, returning its offset and value.
    pub fn find_any(&self, set: &[u8], from: usize) -> Option<(usize, u8)> {
        let bytes = self.text.as_bytes();
        (from..bytes.len())
            .find(|&i| set.contains(&bytes[i]) && !self.mask.is_masked(i))
            .map(|i| (i, bytes[i]))
    }

    /// Skips whitespace and comments, returning the offset of the next statement.
    pub fn skip_trivia(&self, from: usize) -> usize {
        let bytes = self.text.as_bytes();
        let mut i = from.min(bytes.len());
        loop {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if bytes[i..].starts_with(b"//") {
                i = self.text[i..].find('\n').map(|p| i + p).unwrap_or(bytes.len());
            } else if bytes[i..].starts_with(b"/*") {
                i = self.text[i + 2..].find("*/").map(|p| i + 2 + p + 2).unwrap_or(bytes.len());
            } else {
                return i;
            }
        }
    }

    /// Offset of the live `}` matching the live `{` at `open`.
    pub fn matching_close(&self, open: usize) -> Option<usize> {
        let bytes = self.text.as_bytes();
        let mut depth = 1usize;
        for i in open + 1..bytes.len() {
            if self.mask.is_masked(i) {
                continue;
            }
            match bytes[i] {
                b'{' => depth += 1,
                b'}' => {
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

    /// Statement ranges covering the whole buffer, each ending just after a live
    /// `;` or newline (the last one may end without a terminator).
    pub fn statement_ranges(&self) -> Vec<Range<usize>> {
        let bytes = self.text.as_bytes();
        let mut ranges = Vec::new();
        let mut start = 0;
        for (i, &b) in bytes.iter().enumerate() {
            if (b == b';' || b == b'\n') && !self.mask.is_masked(i) {
                ranges.push(start..i + 1);
                start = i + 1;
            }
        }
        if start < bytes.len() {
            ranges.push(start..bytes.len());
        }
        ranges
    }

    pub fn split_statements(&self) -> Vec<&'a str> {
        self.statement_ranges()
            .into_iter()
            .map(|r| &self.text[r])
            .filter(|s| !s.trim().is_empty())
            .collect()
    }
}

pub fn code_index_of(text: &str, pattern: &str, from: usize, cache: &MaskCache) -> Option<usize> {
    CodeText::new(text, MaskMode::Declarations, cache).index_of(pattern, from)
}

pub fn split_statements<'a>(text: &'a str, cache: &MaskCache) -> Vec<&'a str> {
    CodeText::new(text, MaskMode::Code, cache).split_statements()
}

// ═══════════════════════════════════════════════════════════════════════════════
// BRACKET MATCHER
// ═══════════════════════════════════════════════════════════════════════════════

/// Plain depth counting from `open + 1`. Callers pass an offset already known to be a real brace.
pub fn find_matching_close(text: &str, open: usize) -> Option<usize> {
    let mut depth = 1usize;
    for (i, b) in text.bytes().enumerate().skip(open + 1) {
        match b {
            b'{' => depth += 1,
            b'}' => {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::build_mask;

    #[test]
    fn test_index_of_skips_literals() {
        let cache = MaskCache::new();
        let text = "a = 'class b'; class c";
        assert_eq!(code_index_of(text, "class", 0, &cache), text.rfind("class"));
    }

    #[test]
    fn test_skip_trivia_past_end_is_clamped() {
        let cache = MaskCache::new();
        let code = CodeText::new("a; // x", MaskMode::Code, &cache);
        assert_eq!(code.skip_trivia(2), 7);
        assert_eq!(code.skip_trivia(8), 7);
        assert_eq!(code.skip_trivia(100), 7);
    }

    #[test]
    fn test_index_of_never_lands_on_masked_offset() {
        let cache = MaskCache::new();
        let samples = [
            "x: ';;'; y: 1; // ;\n z: `;${a;}`;",
            "/* { } */ { a: '}' }; /re;/",
            "name: value { ; } ;",
        ];
        for text in samples {
            let hand = build_mask(text, MaskMode::Declarations);
            for pattern in [";", "{", "}", ":"] {
                let code = CodeText::new(text, MaskMode::Declarations, &cache);
                let mut from = 0;
                while let Some(i) = code.index_of(pattern, from) {
                    assert!(!hand.is_masked(i), "{:?} matched masked {} in {:?}", pattern, i, text);
                    from = i + 1;
                }
            }
        }
    }

    #[test]
    fn test_split_statements_drops_empty_segments() {
        let cache = MaskCache::new();
        let parts = split_statements("let a = ';';\n\n  b();  c()\n", &cache);
        assert_eq!(parts, vec!["let a = ';';", "  b();", "  c()\n"]);
    }

    #[test]
    fn test_statement_ranges_cover_everything() {
        let cache = MaskCache::new();
        let text = "a;\n  b; c";
        let code = CodeText::new(text, MaskMode::Code, &cache);
        let joined: String = code.statement_ranges().into_iter().map(|r| &text[r]).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_find_matching_close_counts_depth() {
        let text = "{ a { b } { c } }";
        assert_eq!(find_matching_close(text, 0), Some(text.len() - 1));
        assert_eq!(find_matching_close(text, 4), Some(8));
        assert_eq!(find_matching_close("{ {", 0), None);
    }

    #[test]
    fn test_matching_close_ignores_quoted_braces() {
        let cache = MaskCache::new();
        let text = "{ s = '}'; }";
        let code = CodeText::new(text, MaskMode::Code, &cache);
        assert_eq!(code.matching_close(0), Some(text.len() - 1));
        assert_eq!(find_matching_close(text, 0), Some(7));
    }
}
