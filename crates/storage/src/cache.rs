//! Idle-TTL cache of domain objects
//!
//! At most one value per key. Every `get` refreshes the entry's idle timer.
//! Entries never expire on read: they leave the cache only through
//! invalidation or [`TtlCache::remove_if_idle`], which the owning service
//! drives so that it can flush dirty entries first.

use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    last_access: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            last_access: Instant::now(),
        }
    }

    fn is_idle(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_access) >= ttl
    }
}

/// Concurrent map from key to last-known value with idle expiry.
#[derive(Debug)]
pub struct TtlCache<K: Eq + Hash, V> {
    entries: DashMap<K, CacheEntry<V>>,
    idle_ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    /// Create an empty cache whose entries go idle after `idle_ttl`
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            idle_ttl,
        }
    }

    /// Idle TTL of this cache
    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    /// Cached value for `key`, refreshing its idle timer
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entry = self.entries.get_mut(key)?;
        entry.last_access = Instant::now();
        Some(entry.value.clone())
    }

    /// Cached value for `key` without touching its idle timer
    pub fn peek(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|e| e.value.clone())
    }

    /// True if `key` is cached
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace the value for `key`
    pub fn put(&self, key: K, value: V) {
        self.entries.insert(key, CacheEntry::new(value));
    }

    /// Remove `key`, returning its value
    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, e)| e.value)
    }

    /// Remove every entry
    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    /// Remove every entry whose key fails `keep`, returning the removed keys
    pub fn invalidate_unless(&self, keep: impl Fn(&K) -> bool) -> Vec<K> {
        let mut removed = Vec::new();
        self.entries.retain(|k, _| {
            if keep(k) {
                true
            } else {
                removed.push(k.clone());
                false
            }
        });
        removed
    }

    /// Keys idle for at least the TTL as of `now`
    pub fn idle_keys(&self, now: Instant) -> Vec<K> {
        self.entries
            .iter()
            .filter(|e| e.is_idle(now, self.idle_ttl))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Remove `key` only if it is still idle as of `now`
    pub fn remove_if_idle(&self, key: &K, now: Instant) -> Option<V> {
        let ttl = self.idle_ttl;
        self.entries
            .remove_if(key, |_, e| e.is_idle(now, ttl))
            .map(|(_, e)| e.value)
    }

    /// Snapshot of the cached keys
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    #[test]
    fn test_put_get_invalidate() {
        let cache = TtlCache::new(TTL);
        cache.put("u1", 1);
        assert_eq!(cache.get(&"u1"), Some(1));
        cache.put("u1", 2);
        assert_eq!(cache.get(&"u1"), Some(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate(&"u1"), Some(2));
        assert_eq!(cache.get(&"u1"), None);
        assert_eq!(cache.invalidate(&"u1"), None);
    }

    #[test]
    fn test_idle_keys() {
        let cache = TtlCache::new(TTL);
        cache.put("a", 1);
        cache.put("b", 2);
        assert!(cache.idle_keys(Instant::now()).is_empty());

        let later = Instant::now() + TTL;
        let mut idle = cache.idle_keys(later);
        idle.sort();
        assert_eq!(idle, vec!["a", "b"]);
    }

    #[test]
    fn test_remove_if_idle_respects_fresh_access() {
        let cache = TtlCache::new(Duration::from_millis(50));
        cache.put("a", 1);
        let now = Instant::now();
        // Entry was written at or before `now`, so it is not idle at `now`
        assert_eq!(cache.remove_if_idle(&"a", now), None);
        assert_eq!(
            cache.remove_if_idle(&"a", now + Duration::from_millis(50)),
            Some(1)
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn test_get_refreshes_but_peek_does_not() {
        let ttl = Duration::from_millis(40);
        let cache = TtlCache::new(ttl);
        cache.put("a", 1);
        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(cache.peek(&"a"), Some(1));
        assert_eq!(cache.idle_keys(Instant::now()), vec!["a"]);

        assert_eq!(cache.get(&"a"), Some(1));
        assert!(cache.idle_keys(Instant::now()).is_empty());
    }

    #[test]
    fn test_invalidate_unless() {
        let cache = TtlCache::new(TTL);
        for k in 0..5u32 {
            cache.put(k, k * 10);
        }
        let mut removed = cache.invalidate_unless(|k| *k % 2 == 0);
        removed.sort();
        assert_eq!(removed, vec![1, 3]);
        assert_eq!(cache.len(), 3);
        assert!(cache.contains(&4));
    }

    #[test]
    fn test_invalidate_all() {
        let cache = TtlCache::new(TTL);
        cache.put(1u8, "x");
        cache.put(2u8, "y");
        cache.invalidate_all();
        assert!(cache.is_empty());
        assert!(cache.keys().is_empty());
    }
}
