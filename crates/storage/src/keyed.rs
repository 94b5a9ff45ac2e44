//! Keyed storage service
//!
//! Façade over one repository for one entity type. It owns the per-key lock
//! registry, the idle cache of loaded objects and the dirty set, and routes
//! every backend call through the shared [`Dispatcher`].
//!
//! # Locking
//!
//! Cache probes take the key's read lock. Any call that reaches the backend
//! (miss load, save, delete, flush) holds the key's write lock for the whole
//! round-trip. Keys never share a lock, so work on different keys proceeds
//! in parallel.
//!
//! # Per-key lifecycle
//!
//! ```text
//! Unknown --load--> Cached/Dirty --save--> Cached/Clean --get--> Cached/Dirty
//! Cached/* --delete (backend ok)--> Unknown
//! Cached/Clean --idle--> Unknown
//! Cached/Dirty --idle, flush ok--> Unknown
//! ```
//!
//! Every successful fetch marks the key dirty, since a caller that fetched an
//! object is assumed to be about to change it.

use keepsake_core::{
    ensure_supported, DataKey, DataTranslator, Error, KeepsakeResult, KeyedDataObject,
    KeyedObject, KeyedRepository, Migration, QueryObject,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::config::ServiceConfig;
use crate::dirty::DirtySet;
use crate::dispatcher::Dispatcher;
use crate::future::StorageFuture;
use crate::lock_registry::{acquire_read, acquire_write, LockRegistry};
use crate::record::Record;
use crate::sweeper::Evictable;

/// Repository handle shared between a service and its owner
pub type SharedRepository<K, Q, O> = Arc<dyn KeyedRepository<K, Q, O>>;

/// Point-in-time counters for one service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStats {
    /// Objects currently cached
    pub cached: usize,
    /// Keys flagged as possibly unpersisted
    pub dirty: usize,
    /// Live per-key locks
    pub locks: usize,
}

/// Outcome of one idle-eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Cache entries removed
    pub evicted: usize,
    /// Dirty entries saved before removal
    pub flushed: usize,
    /// Dirty entries kept because their save failed
    pub retained: usize,
    /// Idle key locks removed
    pub locks_evicted: usize,
}

struct Inner<K, Q, D, O>
where
    K: Eq + Hash,
    Q: QueryObject<K>,
{
    name: String,
    translator: Arc<dyn DataTranslator<D, O>>,
    migration: Arc<dyn Migration<D>>,
    repository: RwLock<Option<SharedRepository<K, Q, O>>>,
    locks: LockRegistry<K>,
    cache: TtlCache<K, Record<D>>,
    dirty: DirtySet<K>,
    /// Bumped by every delete and cache reset. Query rows read before a bump
    /// are re-read under the key lock before they are cached.
    generation: AtomicU64,
    dispatcher: Arc<Dispatcher>,
    lock_timeout: Option<Duration>,
}

/// Cached, lock-protected access to entities of one type keyed by `K`.
///
/// Every operation comes in two forms: a `*_on_thread` form that runs on the
/// calling thread and returns a [`KeepsakeResult`], and a form returning a
/// [`StorageFuture`] that is offloaded when called from the main thread.
/// Future-returning calls never fail synchronously.
///
/// Cloning is cheap; clones share all state.
pub struct KeyedStorageService<K, Q, D, O>
where
    K: Eq + Hash,
    Q: QueryObject<K>,
{
    inner: Arc<Inner<K, Q, D, O>>,
}

impl<K, Q, D, O> Clone for KeyedStorageService<K, Q, D, O>
where
    K: Eq + Hash,
    Q: QueryObject<K>,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, Q, D, O> KeyedStorageService<K, Q, D, O>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    Q: QueryObject<K> + 'static,
    D: Send + Sync + 'static,
    O: Send + 'static,
{
    /// Create a service backed by `repository`.
    ///
    /// The repository's `startup` hook is not called; use [`attach`] to
    /// swap in a repository that still needs starting.
    ///
    /// [`attach`]: KeyedStorageService::attach
    pub fn new(
        name: impl Into<String>,
        repository: SharedRepository<K, Q, O>,
        translator: Arc<dyn DataTranslator<D, O>>,
        migration: Arc<dyn Migration<D>>,
        dispatcher: Arc<Dispatcher>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                translator,
                migration,
                repository: RwLock::new(Some(repository)),
                locks: LockRegistry::new(config.cache_ttl),
                cache: TtlCache::new(config.cache_ttl),
                dirty: DirtySet::new(),
                generation: AtomicU64::new(0),
                dispatcher,
                lock_timeout: config.lock_timeout,
            }),
        }
    }

    /// Name used in logs and errors
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// A fresh domain object stamped with the current data version. Not cached.
    pub fn create_new(&self) -> D {
        self.inner.create_new()
    }

    /// Whether the attached repository answers non-key queries
    pub fn supports_non_key_queries(&self) -> bool {
        self.inner
            .repository()
            .map(|r| r.supports_non_key_queries())
            .unwrap_or(false)
    }

    // ========================================================================
    // Single-key reads
    // ========================================================================

    /// Cached or loaded object for `key`, or `None` if it does not exist.
    ///
    /// A cache hit is answered on the calling thread without dispatching.
    pub fn get(&self, key: K) -> StorageFuture<Option<Record<D>>> {
        if let Some(record) = self.inner.try_cached(&key) {
            return StorageFuture::ready(Ok(Some(record)));
        }
        let inner = Arc::clone(&self.inner);
        self.inner.dispatcher.run(move || inner.get_on_thread(&key))
    }

    /// Synchronous form of [`get`](KeyedStorageService::get)
    pub fn get_on_thread(&self, key: &K) -> KeepsakeResult<Option<Record<D>>> {
        self.inner.get_on_thread(key)
    }

    /// Like `get`, creating, stamping and saving a new object when absent.
    ///
    /// Creation happens under the key's write lock, so concurrent and
    /// repeated calls for a new key all observe the same first object.
    pub fn get_or_new(&self, key: K) -> StorageFuture<Record<D>> {
        if let Some(record) = self.inner.try_cached(&key) {
            return StorageFuture::ready(Ok(record));
        }
        let inner = Arc::clone(&self.inner);
        self.inner
            .dispatcher
            .run(move || inner.get_or_new_on_thread(&key))
    }

    /// Synchronous form of [`get_or_new`](KeyedStorageService::get_or_new)
    pub fn get_or_new_on_thread(&self, key: &K) -> KeepsakeResult<Record<D>> {
        self.inner.get_or_new_on_thread(key)
    }

    /// Cached object for `key` without loading, touching its idle timer or
    /// marking it dirty
    pub fn peek(&self, key: &K) -> Option<Record<D>> {
        self.inner.cache.peek(key)
    }

    /// True if `key` may hold unpersisted changes
    pub fn is_dirty(&self, key: &K) -> bool {
        self.inner.dirty.contains(key)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// The unique entity matching `query`, cached as a side effect.
    pub fn get_by_query(&self, query: Q) -> StorageFuture<Option<KeyedObject<K, Record<D>>>> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .dispatcher
            .run(move || inner.get_by_query_on_thread(&query))
    }

    /// Synchronous form of [`get_by_query`](KeyedStorageService::get_by_query)
    pub fn get_by_query_on_thread(
        &self,
        query: &Q,
    ) -> KeepsakeResult<Option<KeyedObject<K, Record<D>>>> {
        self.inner.get_by_query_on_thread(query)
    }

    /// Every entity matching `query`, cached as a side effect.
    ///
    /// All-or-nothing: any load or translation failure fails the whole call.
    pub fn get_all(&self, query: Q) -> StorageFuture<HashMap<K, Record<D>>> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .dispatcher
            .run(move || inner.get_all_on_thread(&query))
    }

    /// Synchronous form of [`get_all`](KeyedStorageService::get_all)
    pub fn get_all_on_thread(&self, query: &Q) -> KeepsakeResult<HashMap<K, Record<D>>> {
        self.inner.get_all_on_thread(query)
    }

    /// Whether the backend holds `key`. Uncached.
    pub fn exists(&self, key: K) -> StorageFuture<bool> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .dispatcher
            .run(move || inner.repository()?.exists(&key))
    }

    /// Synchronous form of [`exists`](KeyedStorageService::exists)
    pub fn exists_on_thread(&self, key: &K) -> KeepsakeResult<bool> {
        self.inner.repository()?.exists(key)
    }

    /// Whether anything matches `query`. Uncached.
    pub fn exists_by_query(&self, query: Q) -> StorageFuture<bool> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .dispatcher
            .run(move || inner.count_on_thread(&query).map(|n| n > 0))
    }

    /// Synchronous form of [`exists_by_query`](KeyedStorageService::exists_by_query)
    pub fn exists_by_query_on_thread(&self, query: &Q) -> KeepsakeResult<bool> {
        self.inner.count_on_thread(query).map(|n| n > 0)
    }

    /// Number of entities matching `query`. Uncached.
    pub fn count(&self, query: Q) -> StorageFuture<usize> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .dispatcher
            .run(move || inner.count_on_thread(&query))
    }

    /// Synchronous form of [`count`](KeyedStorageService::count)
    pub fn count_on_thread(&self, query: &Q) -> KeepsakeResult<usize> {
        self.inner.count_on_thread(query)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Cache `record` under `key` and persist it.
    ///
    /// The cache reflects `record` even if the backend save fails; the key
    /// then stays dirty so a later flush retries it.
    pub fn save(&self, key: K, record: Record<D>) -> StorageFuture<()> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .dispatcher
            .run(move || inner.save_on_thread(&key, &record))
    }

    /// Synchronous form of [`save`](KeyedStorageService::save)
    pub fn save_on_thread(&self, key: &K, record: &Record<D>) -> KeepsakeResult<()> {
        self.inner.save_on_thread(key, record)
    }

    /// Delete `key` from the backend, then drop it from the cache.
    ///
    /// If the backend delete fails the cached object is left untouched.
    pub fn delete(&self, key: K) -> StorageFuture<()> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .dispatcher
            .run(move || inner.delete_on_thread(&key))
    }

    /// Synchronous form of [`delete`](KeyedStorageService::delete)
    pub fn delete_on_thread(&self, key: &K) -> KeepsakeResult<()> {
        self.inner.delete_on_thread(key)
    }

    /// Persist every dirty key that is still cached.
    ///
    /// Works from a snapshot of the dirty set. Keys that have left the cache
    /// are skipped. A failure does not stop the flush; the first error is
    /// returned once every key has been tried. Resolves to the number of
    /// objects saved.
    pub fn ensure_saved(&self) -> StorageFuture<usize> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .dispatcher
            .run(move || inner.ensure_saved_on_thread())
    }

    /// Synchronous form of [`ensure_saved`](KeyedStorageService::ensure_saved)
    pub fn ensure_saved_on_thread(&self) -> KeepsakeResult<usize> {
        self.inner.ensure_saved_on_thread()
    }

    // ========================================================================
    // Cache management
    // ========================================================================

    /// Drop every cached object, dirty flag and idle lock, then clear the
    /// backend's own cache. Unsaved changes are discarded.
    pub fn clear_cache(&self) -> StorageFuture<()> {
        self.inner.clear_local();
        let inner = Arc::clone(&self.inner);
        self.inner.dispatcher.run(move || {
            inner.repository()?.clear_cache();
            Ok(())
        })
    }

    /// Drop every cached object whose key is not in `keep`, and the same keys
    /// from the backend's cache.
    pub fn clear_cache_unless(&self, keep: HashSet<K>) -> StorageFuture<()> {
        let removed = self.inner.clear_local_unless(&keep);
        let inner = Arc::clone(&self.inner);
        self.inner.dispatcher.run(move || {
            inner.repository()?.clear_cache_for(&removed);
            Ok(())
        })
    }

    /// Evict objects and locks idle as of `now`, saving dirty objects first.
    pub fn evict_idle(&self, now: Instant) -> EvictionReport {
        self.inner.evict_idle(now)
    }

    /// Current cache, dirty and lock counts
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            cached: self.inner.cache.len(),
            dirty: self.inner.dirty.len(),
            locks: self.inner.locks.len(),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start `repository` and route all further calls to it.
    ///
    /// Local caches are dropped, since they describe the previous backend.
    /// Fails with [`Error::Config`] if the repository refuses to start.
    pub fn attach(&self, repository: SharedRepository<K, Q, O>) -> KeepsakeResult<()> {
        if !repository.startup() {
            return Err(Error::Config(format!(
                "repository for {} failed to start",
                self.inner.name
            )));
        }
        let previous = self.inner.repository.write().replace(Arc::clone(&repository));
        self.inner.clear_local();
        if let Some(previous) = previous {
            if !same_repository(&previous, &repository) {
                previous.shutdown();
            }
        }
        info!(target: "keepsake::storage", service = %self.inner.name, "Repository attached");
        Ok(())
    }

    /// Flush dirty objects, then shut the repository down and detach it.
    ///
    /// The repository is detached even if the flush fails; the flush error is
    /// returned. Calls made while detached fail with [`Error::Detached`].
    pub fn detach(&self) -> KeepsakeResult<()> {
        let flushed = if self.is_attached() {
            self.inner.ensure_saved_on_thread().map(|_| ())
        } else {
            Ok(())
        };
        if let Err(e) = &flushed {
            warn!(target: "keepsake::storage", service = %self.inner.name, error = %e,
                "Flush before detach failed");
        }
        let previous = self.inner.repository.write().take();
        self.inner.clear_local();
        if let Some(previous) = previous {
            previous.shutdown();
            info!(target: "keepsake::storage", service = %self.inner.name, "Repository detached");
        }
        flushed
    }

    /// True while a repository is attached
    pub fn is_attached(&self) -> bool {
        self.inner.repository.read().is_some()
    }
}

impl<K, Q, D, O> KeyedStorageService<K, Q, D, O>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    Q: QueryObject<K> + 'static,
    D: KeyedDataObject + Send + Sync + 'static,
    O: Send + 'static,
{
    /// Set one field on the object for `key` (created if absent) and save it.
    pub fn set_and_save<V>(&self, key: K, data_key: DataKey<V, D>, value: V) -> StorageFuture<()>
    where
        V: Serialize + Send + 'static,
    {
        let service = self.clone();
        self.inner
            .dispatcher
            .run(move || service.set_and_save_on_thread(&key, &data_key, value))
    }

    /// Synchronous form of [`set_and_save`](KeyedStorageService::set_and_save)
    pub fn set_and_save_on_thread<V: Serialize>(
        &self,
        key: &K,
        data_key: &DataKey<V, D>,
        value: V,
    ) -> KeepsakeResult<()> {
        let record = self.inner.get_or_new_on_thread(key)?;
        record.write().set(data_key, value)?;
        self.inner.save_on_thread(key, &record)
    }

    /// Remove one field from the object for `key` (created if absent) and save it.
    pub fn remove_and_save<V: 'static>(&self, key: K, data_key: DataKey<V, D>) -> StorageFuture<()> {
        let service = self.clone();
        self.inner
            .dispatcher
            .run(move || service.remove_and_save_on_thread(&key, &data_key))
    }

    /// Synchronous form of [`remove_and_save`](KeyedStorageService::remove_and_save)
    pub fn remove_and_save_on_thread<V>(&self, key: &K, data_key: &DataKey<V, D>) -> KeepsakeResult<()> {
        let record = self.inner.get_or_new_on_thread(key)?;
        record.write().remove(data_key);
        self.inner.save_on_thread(key, &record)
    }
}

/// True if both handles point at the same repository instance.
pub(crate) fn same_repository<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl<K, Q, D, O> Evictable for KeyedStorageService<K, Q, D, O>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    Q: QueryObject<K> + 'static,
    D: Send + Sync + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn evict_idle(&self, now: Instant) -> EvictionReport {
        self.inner.evict_idle(now)
    }
}

impl<K, Q, D, O> Debug for KeyedStorageService<K, Q, D, O>
where
    K: Clone + Eq + Hash,
    Q: QueryObject<K>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedStorageService")
            .field("name", &self.inner.name)
            .field("cached", &self.inner.cache.len())
            .field("dirty", &self.inner.dirty.len())
            .finish()
    }
}

impl<K, Q, D, O> Inner<K, Q, D, O>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    Q: QueryObject<K> + 'static,
    D: Send + Sync + 'static,
    O: Send + 'static,
{
    fn repository(&self) -> KeepsakeResult<SharedRepository<K, Q, O>> {
        self.repository
            .read()
            .clone()
            .ok_or_else(|| Error::Detached(self.name.clone()))
    }

    fn create_new(&self) -> D {
        let mut data = self.translator.create_new();
        self.migration.stamp_version(&mut data);
        data
    }

    /// Non-blocking cache probe used before dispatching
    fn try_cached(&self, key: &K) -> Option<Record<D>> {
        let lock = self.locks.lock_for(key);
        let _read = lock.try_read()?;
        let record = self.cache.get(key)?;
        self.dirty.mark(key.clone());
        Some(record)
    }

    fn get_on_thread(&self, key: &K) -> KeepsakeResult<Option<Record<D>>> {
        let lock = self.locks.lock_for(key);
        {
            let _read = acquire_read(&lock, self.lock_timeout, key)?;
            if let Some(record) = self.cache.get(key) {
                self.dirty.mark(key.clone());
                return Ok(Some(record));
            }
        }
        let _write = acquire_write(&lock, self.lock_timeout, key)?;
        self.load_locked(key)
    }

    /// Cache lookup then backend load. Caller holds the key's write lock.
    fn load_locked(&self, key: &K) -> KeepsakeResult<Option<Record<D>>> {
        // Another caller may have loaded it while we waited for the lock
        if let Some(record) = self.cache.get(key) {
            self.dirty.mark(key.clone());
            return Ok(Some(record));
        }

        let stored = match self.repository()?.get(key)? {
            Some(stored) => stored,
            None => return Ok(None),
        };
        let mut data = self.translator.from_storage(stored)?;
        self.migration.upgrade(&mut data);

        let record = Record::new(data);
        self.cache.put(key.clone(), record.clone());
        self.dirty.mark(key.clone());
        debug!(target: "keepsake::storage", service = %self.name, key = ?key, "Loaded from repository");
        Ok(Some(record))
    }

    fn get_or_new_on_thread(&self, key: &K) -> KeepsakeResult<Record<D>> {
        let lock = self.locks.lock_for(key);
        {
            let _read = acquire_read(&lock, self.lock_timeout, key)?;
            if let Some(record) = self.cache.get(key) {
                self.dirty.mark(key.clone());
                return Ok(record);
            }
        }

        let _write = acquire_write(&lock, self.lock_timeout, key)?;
        if let Some(record) = self.load_locked(key)? {
            return Ok(record);
        }

        let record = Record::new(self.create_new());
        if let Err(e) = self.save_locked(key, &record) {
            // The new object stays cached and dirty; a later flush retries it
            warn!(target: "keepsake::storage", service = %self.name, key = ?key, error = %e,
                "Failed to persist newly created object");
        } else {
            debug!(target: "keepsake::storage", service = %self.name, key = ?key, "Created new object");
        }
        Ok(record)
    }

    fn get_by_query_on_thread(&self, query: &Q) -> KeepsakeResult<Option<KeyedObject<K, Record<D>>>> {
        let repository = self.repository()?;
        ensure_supported(query, repository.supports_non_key_queries())?;

        let read_at = self.generation.load(Ordering::SeqCst);
        let found = match repository.get_unique(query)? {
            Some(found) => found,
            None => return Ok(None),
        };
        let found = found.try_map_value(|stored| {
            let mut data = self.translator.from_storage(stored)?;
            self.migration.upgrade(&mut data);
            Ok::<D, Error>(data)
        })?;

        match found.value {
            Some(data) => match self.adopt(&found.key, data, read_at)? {
                Some(record) => Ok(Some(KeyedObject::new(found.key, Some(record)))),
                // Deleted after the query read it
                None => Ok(None),
            },
            None => Ok(Some(KeyedObject::empty(found.key))),
        }
    }

    fn get_all_on_thread(&self, query: &Q) -> KeepsakeResult<HashMap<K, Record<D>>> {
        let repository = self.repository()?;
        ensure_supported(query, repository.supports_non_key_queries())?;

        // Translate everything before touching the cache so a bad row fails
        // the whole call without side effects
        let read_at = self.generation.load(Ordering::SeqCst);
        let mut loaded = Vec::new();
        for (key, stored) in repository.get_all(query)? {
            let mut data = self.translator.from_storage(stored)?;
            self.migration.upgrade(&mut data);
            loaded.push((key, data));
        }

        let mut result = HashMap::with_capacity(loaded.len());
        for (key, data) in loaded {
            if let Some(record) = self.adopt(&key, data, read_at)? {
                result.insert(key, record);
            }
        }
        debug!(target: "keepsake::storage", service = %self.name, count = result.len(), "Loaded by query");
        Ok(result)
    }

    /// Cache an object loaded by a query unless one is already cached, in
    /// which case the cached one wins so unsaved edits are not lost.
    ///
    /// `read_at` is the generation observed before the backend read. If a
    /// delete has happened since, `data` may describe a removed row, so the
    /// key is loaded again instead. Returns `None` when the key is gone.
    fn adopt(&self, key: &K, data: D, read_at: u64) -> KeepsakeResult<Option<Record<D>>> {
        let lock = self.locks.lock_for(key);
        let _write = acquire_write(&lock, self.lock_timeout, key)?;
        if let Some(existing) = self.cache.get(key) {
            self.dirty.mark(key.clone());
            return Ok(Some(existing));
        }
        if self.generation.load(Ordering::SeqCst) != read_at {
            debug!(target: "keepsake::storage", service = %self.name, key = ?key,
                "Re-reading query result after a concurrent delete");
            return self.load_locked(key);
        }

        let record = Record::new(data);
        self.cache.put(key.clone(), record.clone());
        self.dirty.mark(key.clone());
        Ok(Some(record))
    }

    fn count_on_thread(&self, query: &Q) -> KeepsakeResult<usize> {
        let repository = self.repository()?;
        ensure_supported(query, repository.supports_non_key_queries())?;
        repository.count(query)
    }

    fn save_on_thread(&self, key: &K, record: &Record<D>) -> KeepsakeResult<()> {
        let lock = self.locks.lock_for(key);
        let _write = acquire_write(&lock, self.lock_timeout, key)?;
        self.save_locked(key, record)
    }

    /// Cache `record` and persist it. Caller holds the key's write lock.
    fn save_locked(&self, key: &K, record: &Record<D>) -> KeepsakeResult<()> {
        self.cache.put(key.clone(), record.clone());
        self.persist_locked(key, record)
    }

    /// Persist `record` and update the dirty flag. Caller holds the key's
    /// write lock.
    fn persist_locked(&self, key: &K, record: &Record<D>) -> KeepsakeResult<()> {
        self.dirty.mark(key.clone());
        let stored = self.translator.to_storage(&record.read())?;
        self.repository()?.save(key, stored)?;
        self.dirty.clear(key);
        debug!(target: "keepsake::storage", service = %self.name, key = ?key, "Saved");
        Ok(())
    }

    fn delete_on_thread(&self, key: &K) -> KeepsakeResult<()> {
        let lock = self.locks.lock_for(key);
        let _write = acquire_write(&lock, self.lock_timeout, key)?;
        self.repository()?.delete(key)?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cache.invalidate(key);
        self.dirty.clear(key);
        debug!(target: "keepsake::storage", service = %self.name, key = ?key, "Deleted");
        Ok(())
    }

    fn ensure_saved_on_thread(&self) -> KeepsakeResult<usize> {
        let mut saved = 0;
        let mut first_error = None;

        for key in self.dirty.snapshot() {
            let lock = self.locks.lock_for(&key);
            let outcome = acquire_write(&lock, self.lock_timeout, &key).and_then(|_write| {
                // Re-check under the lock: a delete or save may have won the race
                match self.cache.peek(&key) {
                    Some(record) if self.dirty.contains(&key) => {
                        self.persist_locked(&key, &record).map(|_| true)
                    }
                    Some(_) => Ok(false),
                    None => {
                        self.dirty.clear(&key);
                        Ok(false)
                    }
                }
            });
            match outcome {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(target: "keepsake::storage", service = %self.name, key = ?key, error = %e,
                        "Failed to flush dirty object");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if saved > 0 {
            debug!(target: "keepsake::storage", service = %self.name, saved, "Flushed dirty objects");
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(saved),
        }
    }

    fn clear_local(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cache.invalidate_all();
        self.dirty.clear_all();
        self.locks.reset();
    }

    fn clear_local_unless(&self, keep: &HashSet<K>) -> Vec<K> {
        let removed = self.cache.invalidate_unless(|k| keep.contains(k));
        for key in &removed {
            self.dirty.clear(key);
        }
        removed
    }

    fn evict_idle(&self, now: Instant) -> EvictionReport {
        let mut report = EvictionReport::default();

        for key in self.cache.idle_keys(now) {
            // Look up without refreshing, so the lock can go in this same pass
            let lock = match self.locks.existing(&key) {
                Some(lock) => lock,
                None => self.locks.lock_for(&key),
            };
            // A key busy with another operation is not idle
            let _write = match lock.try_write() {
                Some(guard) => guard,
                None => continue,
            };

            if self.dirty.contains(&key) {
                let record = match self.cache.peek(&key) {
                    Some(record) => record,
                    None => continue,
                };
                match self.persist_locked(&key, &record) {
                    Ok(()) => report.flushed += 1,
                    Err(e) => {
                        warn!(target: "keepsake::storage", service = %self.name, key = ?key, error = %e,
                            "Keeping idle object cached, flush failed");
                        report.retained += 1;
                        continue;
                    }
                }
            }

            if self.cache.remove_if_idle(&key, now).is_some() {
                report.evicted += 1;
            }
        }

        report.locks_evicted = self.locks.evict_idle(now);
        if report.evicted > 0 || report.retained > 0 {
            debug!(target: "keepsake::storage", service = %self.name, ?report, "Idle eviction pass");
        }
        report
    }
}
