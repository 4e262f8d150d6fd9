//! Equal-length lazy masking of known sensitive words.
//!
//! Once a keyword is confirmed, every later probe replaces it with a
//! `*` run of the same character length before the text goes upstream.
//! Equal length is what keeps the coordinate system stable: offsets
//! computed on a masked view are valid against the original input.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// The fill character used for masking.
pub const MASK_CHAR: char = '*';

/// Process-lifetime store of confirmed sensitive words for one scan.
///
/// Cheap to clone; all clones share the same set. `add` is linearizable
/// against concurrent `apply` calls: `apply` snapshots the set under the
/// lock and masks outside it, so it never observes a half-added entry.
#[derive(Debug, Clone, Default)]
pub struct MaskRegistry {
    inner: Arc<Mutex<BTreeSet<String>>>,
}

impl MaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a confirmed keyword. Returns false on duplicates and
    /// empty strings.
    pub fn add(&self, keyword: &str) -> bool {
        if keyword.is_empty() {
            return false;
        }
        let mut set = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let inserted = set.insert(keyword.to_string());
        if inserted {
            debug!(keyword, total = set.len(), "registered sensitive word");
        }
        inserted
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current keywords, longest first. Longest-first ordering makes the
    /// replacement deterministic when entries overlap (leftmost-longest
    /// wins), and stops a short entry from splitting a longer one.
    pub fn snapshot(&self) -> Vec<String> {
        let set = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut keywords: Vec<String> = set.iter().cloned().collect();
        keywords.sort_by(|a, b| {
            b.chars()
                .count()
                .cmp(&a.chars().count())
                .then_with(|| a.cmp(b))
        });
        keywords
    }

    /// Replace every occurrence of every registered keyword with an
    /// equal-length `*` run. Idempotent and length-preserving.
    pub fn apply(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        let keywords = self.snapshot();
        if keywords.is_empty() {
            return text.to_string();
        }

        let mut masked = text.to_string();
        for keyword in &keywords {
            if masked.contains(keyword.as_str()) {
                let replacement = MASK_CHAR.to_string().repeat(keyword.chars().count());
                masked = masked.replace(keyword.as_str(), &replacement);
            }
        }

        debug_assert_eq!(masked.chars().count(), text.chars().count());
        masked
    }

    /// True when the text has no unmasked, non-whitespace character
    /// left. Such a text cannot carry a new keyword, so probing it is
    /// pointless.
    pub fn is_fully_masked(text: &str) -> bool {
        text.chars().all(|c| c == MASK_CHAR || c.is_whitespace())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_every_occurrence_with_equal_length() {
        let masks = MaskRegistry::new();
        assert!(masks.add("foo"));
        let masked = masks.apply("foo bar foo");
        assert_eq!(masked, "*** bar ***");
        assert_eq!(masked.chars().count(), "foo bar foo".chars().count());
    }

    #[test]
    fn add_is_noop_on_duplicates_and_empties() {
        let masks = MaskRegistry::new();
        assert!(masks.add("x"));
        assert!(!masks.add("x"));
        assert!(!masks.add(""));
        assert_eq!(masks.len(), 1);
    }

    #[test]
    fn longest_keyword_wins_on_overlap() {
        let masks = MaskRegistry::new();
        masks.add("cat");
        masks.add("black cat");
        assert_eq!(masks.apply("a black cat sat"), "a ********* sat");
    }

    #[test]
    fn apply_is_idempotent() {
        let masks = MaskRegistry::new();
        masks.add("secret");
        let once = masks.apply("a secret plan");
        let twice = masks.apply(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn equal_length_holds_for_multibyte_keywords() {
        let masks = MaskRegistry::new();
        masks.add("敏感词");
        let masked = masks.apply("这是敏感词测试");
        assert_eq!(masked, "这是***测试");
        assert_eq!(masked.chars().count(), "这是敏感词测试".chars().count());
    }

    #[test]
    fn fully_masked_detection() {
        assert!(MaskRegistry::is_fully_masked(""));
        assert!(MaskRegistry::is_fully_masked("***  *\n*"));
        assert!(!MaskRegistry::is_fully_masked("**a*"));
    }

    #[test]
    fn clones_share_state() {
        let masks = MaskRegistry::new();
        let other = masks.clone();
        other.add("shared");
        assert_eq!(masks.apply("shared"), "******");
    }
}
