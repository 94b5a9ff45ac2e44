//! Dirty-key tracking
//!
//! Keys whose cached object may hold changes not yet confirmed durable.
//! Marks and clears come from call sites holding different keys' locks, so
//! the set itself is concurrent.

use dashmap::DashSet;
use std::hash::Hash;

/// Concurrent set of keys with possibly unpersisted changes.
#[derive(Debug)]
pub struct DirtySet<K: Eq + Hash> {
    keys: DashSet<K>,
}

impl<K: Clone + Eq + Hash> DirtySet<K> {
    /// Create an empty set
    pub fn new() -> Self {
        Self {
            keys: DashSet::new(),
        }
    }

    /// Flag `key` as possibly unpersisted
    pub fn mark(&self, key: K) {
        self.keys.insert(key);
    }

    /// Flag `key` as persisted. Returns whether it was dirty.
    pub fn clear(&self, key: &K) -> bool {
        self.keys.remove(key).is_some()
    }

    /// True if `key` is flagged
    pub fn contains(&self, key: &K) -> bool {
        self.keys.contains(key)
    }

    /// Point-in-time copy of the flagged keys
    pub fn snapshot(&self) -> Vec<K> {
        self.keys.iter().map(|k| k.key().clone()).collect()
    }

    /// Unflag everything
    pub fn clear_all(&self) {
        self.keys.clear();
    }

    /// Number of flagged keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when nothing is flagged
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<K: Clone + Eq + Hash> Default for DirtySet<K> {
    fn default() -> Self {
        Self::new()
    }
}
