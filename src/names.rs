//! Canonical identifiers for map descriptors.
//!
//! Header text, table columns and named ranges all pass through
//! [`normalize`] and then through a single [`NameRegistry`] per build, so every
//! descriptor in one semantic map can be referenced by a unique name.

use ahash::AHashMap;

/// Trims, lowercases and collapses whitespace runs into a single `_`.
///
/// Returns an empty string for blank input; callers treat that as "no name".
pub fn normalize(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

/// Occurrence counts of base names seen during one build.
#[derive(Debug, Default)]
pub struct NameRegistry {
    counts: AHashMap<String, u32>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` and returns the name to emit for it.
    ///
    /// The first occurrence keeps the token; later ones get `__2`, `__3`, ...
    pub fn dedupe(&mut self, token: &str) -> String {
        let count = self.counts.entry(token.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            token.to_string()
        } else {
            format!("{token}__{count}")
        }
    }

    /// Normalizes `raw` and dedupes it; `None` when it normalizes to nothing.
    pub fn claim(&mut self, raw: &str) -> Option<String> {
        let token = normalize(raw);
        if token.is_empty() {
            None
        } else {
            Some(self.dedupe(&token))
        }
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
