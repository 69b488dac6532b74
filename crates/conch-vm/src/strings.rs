//! String intern pool
//!
//! Insert-only owner of every string the program can reference by an
//! interned index: constant-pool strings (interned at VM construction)
//! and runtime-produced strings (`INT_TO_STR`, `CONCAT`, `READ`, native
//! results). Entries live until teardown and are never garbage
//! collected.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHashMap;

/// Deduplicating, insertion-ordered string owner
#[derive(Debug, Default)]
pub struct StringInterner {
    entries: Vec<Box<str>>,
    /// hash -> entry indices with that hash (collisions scan)
    dedup_index: FxHashMap<u64, Vec<u32>>,
}

impl StringInterner {
    /// Create an empty interner
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn hash_str(s: &str) -> u64 {
        let mut hasher = rustc_hash::FxHasher::default();
        s.hash(&mut hasher);
        hasher.finish()
    }

    /// Insert a string, returning the index of an existing equal entry
    /// when there is one
    pub fn insert(&mut self, s: String) -> u32 {
        let hash = Self::hash_str(&s);
        if let Some(indices) = self.dedup_index.get(&hash) {
            for &idx in indices {
                if *self.entries[idx as usize] == *s {
                    return idx;
                }
            }
        }
        let idx = self.entries.len() as u32;
        self.entries.push(s.into_boxed_str());
        self.dedup_index.entry(hash).or_default().push(idx);
        idx
    }

    /// Get an interned string by index
    #[inline]
    pub fn get(&self, index: u32) -> Option<&str> {
        self.entries.get(index as usize).map(|s| &**s)
    }

    /// Number of interned strings
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
