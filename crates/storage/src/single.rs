//! Cached service for singleton data
//!
//! Some entities have exactly one instance (server-wide general data, the
//! kit registry). They need no key locks or dirty set: a single cached
//! object and one lock serializing backend round-trips are enough.

use keepsake_core::{DataTranslator, Error, KeepsakeResult, Migration, SingleRepository};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::future::StorageFuture;
use crate::keyed::same_repository;
use crate::record::Record;

/// Single-object repository handle shared between a service and its owner
pub type SharedSingleRepository<O> = Arc<dyn SingleRepository<O>>;

struct Inner<D, O> {
    name: String,
    translator: Arc<dyn DataTranslator<D, O>>,
    migration: Arc<dyn Migration<D>>,
    repository: RwLock<Option<SharedSingleRepository<O>>>,
    cached: Mutex<Option<Record<D>>>,
    io_lock: Mutex<()>,
    dispatcher: Arc<Dispatcher>,
}

/// Cached access to a singleton entity.
pub struct SingleCachedService<D, O> {
    inner: Arc<Inner<D, O>>,
}

impl<D, O> Clone for SingleCachedService<D, O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D, O> SingleCachedService<D, O>
where
    D: Send + Sync + 'static,
    O: Send + 'static,
{
    /// Create a service backed by `repository`
    pub fn new(
        name: impl Into<String>,
        repository: SharedSingleRepository<O>,
        translator: Arc<dyn DataTranslator<D, O>>,
        migration: Arc<dyn Migration<D>>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                translator,
                migration,
                repository: RwLock::new(Some(repository)),
                cached: Mutex::new(None),
                io_lock: Mutex::new(()),
                dispatcher,
            }),
        }
    }

    /// Name used in logs and errors
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// A fresh object stamped with the current data version. Not cached.
    pub fn create_new(&self) -> D {
        self.inner.create_new()
    }

    /// The cached object, without loading
    pub fn cached(&self) -> Option<Record<D>> {
        self.inner.cached.lock().clone()
    }

    /// The cached or loaded object, `None` if the backend holds nothing
    pub fn get(&self) -> StorageFuture<Option<Record<D>>> {
        if let Some(record) = self.cached() {
            return StorageFuture::ready(Ok(Some(record)));
        }
        let inner = Arc::clone(&self.inner);
        self.inner.dispatcher.run(move || inner.get_on_thread())
    }

    /// Synchronous form of [`get`](SingleCachedService::get)
    pub fn get_on_thread(&self) -> KeepsakeResult<Option<Record<D>>> {
        self.inner.get_on_thread()
    }

    /// The cached or loaded object, created and saved when absent
    pub fn get_or_new(&self) -> StorageFuture<Record<D>> {
        if let Some(record) = self.cached() {
            return StorageFuture::ready(Ok(record));
        }
        let inner = Arc::clone(&self.inner);
        self.inner.dispatcher.run(move || inner.get_or_new_on_thread())
    }

    /// Synchronous form of [`get_or_new`](SingleCachedService::get_or_new)
    pub fn get_or_new_on_thread(&self) -> KeepsakeResult<Record<D>> {
        self.inner.get_or_new_on_thread()
    }

    /// Persist `record` and make it the cached object
    pub fn save(&self, record: Record<D>) -> StorageFuture<()> {
        let inner = Arc::clone(&self.inner);
        self.inner.dispatcher.run(move || inner.save_on_thread(&record))
    }

    /// Synchronous form of [`save`](SingleCachedService::save)
    pub fn save_on_thread(&self, record: &Record<D>) -> KeepsakeResult<()> {
        self.inner.save_on_thread(record)
    }

    /// Persist the cached object, if any
    pub fn ensure_saved(&self) -> StorageFuture<()> {
        let inner = Arc::clone(&self.inner);
        self.inner.dispatcher.run(move || inner.ensure_saved_on_thread())
    }

    /// Synchronous form of [`ensure_saved`](SingleCachedService::ensure_saved)
    pub fn ensure_saved_on_thread(&self) -> KeepsakeResult<()> {
        self.inner.ensure_saved_on_thread()
    }

    /// Load from the backend, replacing the cached object only on success
    pub fn reload(&self) -> StorageFuture<Option<Record<D>>> {
        let inner = Arc::clone(&self.inner);
        self.inner.dispatcher.run(move || inner.reload_on_thread())
    }

    /// Synchronous form of [`reload`](SingleCachedService::reload)
    pub fn reload_on_thread(&self) -> KeepsakeResult<Option<Record<D>>> {
        self.inner.reload_on_thread()
    }

    /// Forget the cached object and clear the backend's cache
    pub fn clear_cache(&self) {
        *self.inner.cached.lock() = None;
        if let Ok(repository) = self.inner.repository() {
            repository.clear_cache();
        }
    }

    /// Start `repository` and route all further calls to it
    pub fn attach(&self, repository: SharedSingleRepository<O>) -> KeepsakeResult<()> {
        if !repository.startup() {
            return Err(Error::Config(format!(
                "repository for {} failed to start",
                self.inner.name
            )));
        }
        let _io = self.inner.io_lock.lock();
        let previous = self.inner.repository.write().replace(Arc::clone(&repository));
        *self.inner.cached.lock() = None;
        if let Some(previous) = previous {
            if !same_repository(&previous, &repository) {
                previous.shutdown();
            }
        }
        info!(target: "keepsake::storage", service = %self.inner.name, "Repository attached");
        Ok(())
    }

    /// Save the cached object, then shut the repository down and detach it.
    ///
    /// The repository is detached even if the save fails; the save error is
    /// returned.
    pub fn detach(&self) -> KeepsakeResult<()> {
        let flushed = if self.is_attached() {
            self.inner.ensure_saved_on_thread()
        } else {
            Ok(())
        };
        if let Err(e) = &flushed {
            warn!(target: "keepsake::storage", service = %self.inner.name, error = %e,
                "Save before detach failed");
        }
        let _io = self.inner.io_lock.lock();
        let previous = self.inner.repository.write().take();
        *self.inner.cached.lock() = None;
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

impl<D, O> std::fmt::Debug for SingleCachedService<D, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleCachedService")
            .field("name", &self.inner.name)
            .field("cached", &self.inner.cached.lock().is_some())
            .finish()
    }
}

impl<D, O> Inner<D, O>
where
    D: Send + Sync + 'static,
    O: Send + 'static,
{
    fn repository(&self) -> KeepsakeResult<SharedSingleRepository<O>> {
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

    /// Load and translate. Caller holds `io_lock`.
    fn load_locked(&self) -> KeepsakeResult<Option<D>> {
        let stored = match self.repository()?.get()? {
            Some(stored) => stored,
            None => return Ok(None),
        };
        let mut data = self.translator.from_storage(stored)?;
        self.migration.upgrade(&mut data);
        Ok(Some(data))
    }

    /// Persist without touching the cache. Caller holds `io_lock`.
    fn persist_locked(&self, record: &Record<D>) -> KeepsakeResult<()> {
        let stored = self.translator.to_storage(&record.read())?;
        self.repository()?.save(stored)
    }

    fn get_on_thread(&self) -> KeepsakeResult<Option<Record<D>>> {
        let _io = self.io_lock.lock();
        if let Some(record) = self.cached.lock().clone() {
            return Ok(Some(record));
        }
        let record = self.load_locked()?.map(Record::new);
        if let Some(record) = &record {
            *self.cached.lock() = Some(record.clone());
        }
        Ok(record)
    }

    fn get_or_new_on_thread(&self) -> KeepsakeResult<Record<D>> {
        let _io = self.io_lock.lock();
        if let Some(record) = self.cached.lock().clone() {
            return Ok(record);
        }
        let record = match self.load_locked()? {
            Some(data) => Record::new(data),
            None => {
                let record = Record::new(self.create_new());
                if let Err(e) = self.persist_locked(&record) {
                    warn!(target: "keepsake::storage", service = %self.name, error = %e,
                        "Failed to persist newly created object");
                }
                record
            }
        };
        *self.cached.lock() = Some(record.clone());
        Ok(record)
    }

    fn save_on_thread(&self, record: &Record<D>) -> KeepsakeResult<()> {
        let _io = self.io_lock.lock();
        self.persist_locked(record)?;
        *self.cached.lock() = Some(record.clone());
        debug!(target: "keepsake::storage", service = %self.name, "Saved");
        Ok(())
    }

    fn ensure_saved_on_thread(&self) -> KeepsakeResult<()> {
        let _io = self.io_lock.lock();
        let cached = self.cached.lock().clone();
        match cached {
            Some(record) => self.persist_locked(&record),
            None => Ok(()),
        }
    }

    fn reload_on_thread(&self) -> KeepsakeResult<Option<Record<D>>> {
        let _io = self.io_lock.lock();
        let record = self.load_locked()?.map(Record::new);
        *self.cached.lock() = record.clone();
        debug!(target: "keepsake::storage", service = %self.name, found = record.is_some(), "Reloaded");
        Ok(record)
    }
}
