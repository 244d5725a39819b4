use crate::mask::{build_mask, LiteralMask, MaskMode};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MaskKey {
    mode: MaskMode,
    hash: String,
    len: usize,
}

/// Masks shared by every scanner of one compilation run, keyed by exact text value.
///
/// Entries are immutable once inserted, so concurrent readers of different
/// files never observe a mask change underneath them.
#[derive(Debug, Default)]
pub struct MaskCache {
    entries: RwLock<HashMap<MaskKey, Arc<LiteralMask>>>,
}

impl MaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute_hash(source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn mask(&self, text: &str, mode: MaskMode) -> Arc<LiteralMask> {
        let key = MaskKey {
            mode,
            hash: Self::compute_hash(text),
            len: text.len(),
        };

        if let Ok(entries) = self.entries.read() {
            if let Some(mask) = entries.get(&key) {
                return Arc::clone(mask);
            }
        }

        let mask = Arc::new(build_mask(text, mode));
        match self.entries.write() {
            Ok(mut entries) => Arc::clone(entries.entry(key).or_insert(mask)),
            // A poisoned lock only loses the memoisation, never the result.
            Err(_) => mask,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_text_reuses_mask() {
        let cache = MaskCache::new();
        let a = cache.mask("x: 'a';", MaskMode::Declarations);
        let b = cache.mask("x: 'a';", MaskMode::Declarations);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_one_character_difference_rebuilds() {
        let cache = MaskCache::new();
        let a = cache.mask("x: 'a';", MaskMode::Declarations);
        let b = cache.mask("x: 'b';", MaskMode::Declarations);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_modes_are_cached_separately() {
        let cache = MaskCache::new();
        let decl = cache.mask("a: b;", MaskMode::Declarations);
        let code = cache.mask("a: b;", MaskMode::Code);
        assert!(decl.is_masked(3));
        assert!(!code.is_masked(3));
    }
}
