//! In-memory reference repositories
//!
//! Rows are kept as `serde_json::Value`, the stored form every built-in
//! entity translates to. These back the default [`MemoryRepositoryFactory`]
//! and the test suites; they define no on-disk format.
//!
//! [`MemoryRepositoryFactory`]: crate::manager::MemoryRepositoryFactory

use dashmap::DashMap;
use keepsake_core::{
    ensure_supported, Error, KeepsakeResult, KeyedObject, KeyedRepository, QueryObject,
    SingleRepository,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Row predicate for queries that are not restricted to keys.
pub trait JsonFilter<K> {
    /// True if the stored row for `key` satisfies the query
    fn matches(&self, key: &K, stored: &Value) -> bool;
}

/// Keyed repository held in a concurrent map.
pub struct MemoryKeyedRepository<K: Eq + Hash, Q> {
    rows: DashMap<K, Value>,
    non_key_queries: bool,
    running: AtomicBool,
    _query: PhantomData<fn(&Q)>,
}

impl<K, Q> MemoryKeyedRepository<K, Q>
where
    K: Clone + Eq + Hash,
{
    /// A repository answering key-restricted queries only
    pub fn new() -> Self {
        Self::with_non_key_queries(false)
    }

    /// A repository that also answers unrestricted queries when `enabled`
    pub fn with_non_key_queries(enabled: bool) -> Self {
        Self {
            rows: DashMap::new(),
            non_key_queries: enabled,
            running: AtomicBool::new(false),
            _query: PhantomData,
        }
    }

    /// Stored row for `key`, bypassing any service cache
    pub fn row(&self, key: &K) -> Option<Value> {
        self.rows.get(key).map(|r| r.value().clone())
    }

    /// Number of stored rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// True between `startup` and `shutdown`
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl<K, Q> Default for MemoryKeyedRepository<K, Q>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, Q> MemoryKeyedRepository<K, Q>
where
    K: Clone + Eq + Hash + Debug + Send + Sync,
    Q: QueryObject<K> + JsonFilter<K>,
{
    fn select(&self, query: &Q) -> KeepsakeResult<HashMap<K, Value>> {
        ensure_supported(query, self.non_key_queries)?;
        if query.restricted_to_keys() {
            return Ok(query
                .keys()
                .iter()
                .filter_map(|k| self.row(k).map(|v| (k.clone(), v)))
                .collect());
        }
        let keys = query.keys();
        Ok(self
            .rows
            .iter()
            .filter(|r| keys.is_empty() || keys.contains(r.key()))
            .filter(|r| query.matches(r.key(), r.value()))
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect())
    }
}

impl<K, Q> KeyedRepository<K, Q, Value> for MemoryKeyedRepository<K, Q>
where
    K: Clone + Eq + Hash + Debug + Send + Sync,
    Q: QueryObject<K> + JsonFilter<K>,
{
    fn get(&self, key: &K) -> KeepsakeResult<Option<Value>> {
        Ok(self.row(key))
    }

    fn get_all(&self, query: &Q) -> KeepsakeResult<HashMap<K, Value>> {
        self.select(query)
    }

    fn get_unique(&self, query: &Q) -> KeepsakeResult<Option<KeyedObject<K, Value>>> {
        let mut matches = self.select(query)?;
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.drain().next().map(|(k, v)| KeyedObject::new(k, Some(v)))),
            n => Err(Error::Query(format!(
                "{:?} matched {} entities, expected at most one",
                query, n
            ))),
        }
    }

    fn exists(&self, key: &K) -> KeepsakeResult<bool> {
        Ok(self.rows.contains_key(key))
    }

    fn count(&self, query: &Q) -> KeepsakeResult<usize> {
        Ok(self.select(query)?.len())
    }

    fn save(&self, key: &K, object: Value) -> KeepsakeResult<()> {
        self.rows.insert(key.clone(), object);
        Ok(())
    }

    fn delete(&self, key: &K) -> KeepsakeResult<()> {
        self.rows.remove(key);
        Ok(())
    }

    fn supports_non_key_queries(&self) -> bool {
        self.non_key_queries
    }

    fn all_keys(&self) -> KeepsakeResult<Vec<K>> {
        Ok(self.rows.iter().map(|r| r.key().clone()).collect())
    }

    fn startup(&self) -> bool {
        self.running.store(true, Ordering::Release);
        debug!(target: "keepsake::memory", rows = self.rows.len(), "Keyed repository started");
        true
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Single-object repository held in memory.
#[derive(Debug, Default)]
pub struct MemorySingleRepository {
    value: Mutex<Option<Value>>,
}

impl MemorySingleRepository {
    /// An empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored value, bypassing any service cache
    pub fn stored(&self) -> Option<Value> {
        self.value.lock().clone()
    }
}

impl SingleRepository<Value> for MemorySingleRepository {
    fn get(&self) -> KeepsakeResult<Option<Value>> {
        Ok(self.value.lock().clone())
    }

    fn save(&self, object: Value) -> KeepsakeResult<()> {
        *self.value.lock() = Some(object);
        Ok(())
    }
}
