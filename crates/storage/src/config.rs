//! Per-service tuning

use std::time::Duration;

/// Default idle time after which cache entries and key locks are evicted
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Tuning shared by the keyed and single services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Idle TTL for cached objects and their key locks
    pub cache_ttl: Duration,
    /// Upper bound on waiting for a key lock. `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            lock_timeout: None,
        }
    }
}

impl ServiceConfig {
    /// Override the idle TTL
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Bound lock waits by `timeout`
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}
