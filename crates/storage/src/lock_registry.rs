//! Per-key read/write locks
//!
//! One lock per key, created on first use and dropped after it has been idle
//! for the registry's TTL. Readers probing the cache take the read lock; any
//! operation that touches the backend holds the write lock for the whole
//! round-trip.
//!
//! # Eviction
//!
//! A lock that is currently handed out (held, or cloned by a caller about to
//! acquire it) is never evicted. `lock_for` and eviction both run under the
//! map's shard lock, so a key never has two live locks at once.

use dashmap::DashMap;
use keepsake_core::{Error, KeepsakeResult};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared handle to one key's lock
pub type KeyLock = Arc<RwLock<()>>;

#[derive(Debug)]
struct LockSlot {
    lock: KeyLock,
    last_access: Instant,
}

/// Lazily populated, idle-evicted map from key to lock.
#[derive(Debug)]
pub struct LockRegistry<K: Eq + Hash> {
    locks: DashMap<K, LockSlot>,
    idle_ttl: Duration,
}

impl<K> LockRegistry<K>
where
    K: Clone + Eq + Hash,
{
    /// Create an empty registry whose locks expire after `idle_ttl`
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            idle_ttl,
        }
    }

    /// The lock for `key`, creating it if needed. Refreshes its idle timer.
    pub fn lock_for(&self, key: &K) -> KeyLock {
        let now = Instant::now();
        let mut slot = self.locks.entry(key.clone()).or_insert_with(|| LockSlot {
            lock: Arc::new(RwLock::new(())),
            last_access: now,
        });
        slot.last_access = now;
        Arc::clone(&slot.lock)
    }

    /// The lock for `key` if one is live, without refreshing its idle timer
    pub fn existing(&self, key: &K) -> Option<KeyLock> {
        self.locks.get(key).map(|slot| Arc::clone(&slot.lock))
    }

    /// Drop locks idle for at least the TTL as of `now`.
    ///
    /// Returns the number of locks removed.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let before = self.locks.len();
        let ttl = self.idle_ttl;
        self.locks.retain(|_, slot| {
            Arc::strong_count(&slot.lock) > 1
                || now.saturating_duration_since(slot.last_access) < ttl
        });
        before.saturating_sub(self.locks.len())
    }

    /// Drop every lock that is not currently handed out
    pub fn reset(&self) {
        self.locks.retain(|_, slot| Arc::strong_count(&slot.lock) > 1);
    }

    /// Number of live locks
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// True when no lock is live
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Acquire `lock` for reading, waiting at most `timeout` if one is set.
pub fn acquire_read<'a, K: Debug>(
    lock: &'a KeyLock,
    timeout: Option<Duration>,
    key: &K,
) -> KeepsakeResult<RwLockReadGuard<'a, ()>> {
    match timeout {
        None => Ok(lock.read()),
        Some(limit) => lock
            .try_read_for(limit)
            .ok_or_else(|| Error::LockTimeout(format!("{:?}", key))),
    }
}

/// Acquire `lock` for writing, waiting at most `timeout` if one is set.
pub fn acquire_write<'a, K: Debug>(
    lock: &'a KeyLock,
    timeout: Option<Duration>,
    key: &K,
) -> KeepsakeResult<RwLockWriteGuard<'a, ()>> {
    match timeout {
        None => Ok(lock.write()),
        Some(limit) => lock
            .try_write_for(limit)
            .ok_or_else(|| Error::LockTimeout(format!("{:?}", key))),
    }
}
