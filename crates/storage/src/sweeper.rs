//! Idle eviction background task
//!
//! [`IdleSweeper`] wakes up periodically and asks every registered service to
//! drop cache entries and key locks that have been idle for longer than their
//! TTL. Services flush dirty entries before dropping them, so the sweeper
//! itself never touches the backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use keepsake_core::KeepsakeResult;
use tracing::debug;

use crate::keyed::EvictionReport;

/// A service holding idle-evictable state.
pub trait Evictable: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Evict everything idle as of `now`
    fn evict_idle(&self, now: Instant) -> EvictionReport;
}

/// Background idle eviction task
///
/// # Example
///
/// ```ignore
/// let sweeper = IdleSweeper::new(vec![Arc::new(users.clone())], Duration::from_secs(60));
/// let handle = sweeper.start()?;
///
/// // ... use the services ...
///
/// sweeper.shutdown();
/// handle.join().unwrap();
/// ```
pub struct IdleSweeper {
    targets: Arc<Vec<Arc<dyn Evictable>>>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl IdleSweeper {
    /// Create a sweeper over `targets` running every `interval`
    pub fn new(targets: Vec<Arc<dyn Evictable>>, interval: Duration) -> Self {
        Self {
            targets: Arc::new(targets),
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run one eviction pass over every target as of `now`.
    pub fn sweep_once(&self, now: Instant) -> EvictionReport {
        sweep(&self.targets, now)
    }

    /// Start the background thread.
    ///
    /// The thread sleeps first and runs until `shutdown()` is called.
    pub fn start(&self) -> KeepsakeResult<JoinHandle<()>> {
        let targets = Arc::clone(&self.targets);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        let handle = thread::Builder::new()
            .name("keepsake-sweeper".to_string())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    // Sleep in short steps so shutdown is noticed promptly
                    let step = Duration::from_millis(100).min(interval);
                    let mut elapsed = Duration::ZERO;

                    while elapsed < interval {
                        if shutdown.load(Ordering::Relaxed) {
                            return;
                        }
                        thread::sleep(step);
                        elapsed += step;
                    }

                    sweep(&targets, Instant::now());
                }
            })?;
        Ok(handle)
    }

    /// Signal shutdown. The thread exits within one sleep step.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Check if shutdown has been signaled
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn sweep(targets: &[Arc<dyn Evictable>], now: Instant) -> EvictionReport {
    let mut total = EvictionReport::default();
    for target in targets {
        let report = target.evict_idle(now);
        if report != EvictionReport::default() {
            debug!(target: "keepsake::sweeper", service = target.name(), ?report, "Swept idle entries");
        }
        total.evicted += report.evicted;
        total.flushed += report.flushed;
        total.retained += report.retained;
        total.locks_evicted += report.locks_evicted;
    }
    total
}
