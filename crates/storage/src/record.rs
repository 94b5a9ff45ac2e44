//! Shared handle to a cached domain object

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

/// A domain object shared between the cache and its consumers.
///
/// Cloning the handle does not clone the object. Mutations made through
/// [`Record::write`] are visible to every holder of the same record and are
/// persisted by the next save of its key.
pub struct Record<D> {
    inner: Arc<RwLock<D>>,
}

impl<D> Record<D> {
    /// Wrap a freshly loaded or created object
    pub fn new(data: D) -> Self {
        Self {
            inner: Arc::new(RwLock::new(data)),
        }
    }

    /// Shared access to the object
    pub fn read(&self) -> RwLockReadGuard<'_, D> {
        self.inner.read()
    }

    /// Exclusive access to the object
    pub fn write(&self) -> RwLockWriteGuard<'_, D> {
        self.inner.write()
    }

    /// True if both handles refer to the same object
    pub fn ptr_eq(&self, other: &Record<D>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Apply `f` to the object under its write lock
    pub fn update<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut self.inner.write())
    }
}

impl<D> Clone for Record<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: std::fmt::Debug> std::fmt::Debug for Record<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Record").field(&*self.inner.read()).finish()
    }
}
