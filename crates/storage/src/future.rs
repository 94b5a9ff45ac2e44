//! Completion handles for dispatched storage work
//!
//! A [`StorageFuture`] is completed exactly once, either inline by the
//! dispatcher or later by a worker thread. Waiting is blocking; there is no
//! async runtime involved.

use keepsake_core::{Error, KeepsakeResult};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Slot<T> {
    result: Mutex<Option<KeepsakeResult<T>>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    fn fill(&self, result: KeepsakeResult<T>) {
        let mut guard = self.result.lock();
        if guard.is_none() {
            *guard = Some(result);
        }
        self.ready.notify_all();
    }
}

/// Result of a storage operation that may still be running.
#[must_use = "a storage future does nothing unless waited on or checked"]
pub struct StorageFuture<T> {
    slot: Arc<Slot<T>>,
}

impl<T> StorageFuture<T> {
    /// An already-completed future
    pub fn ready(result: KeepsakeResult<T>) -> Self {
        Self {
            slot: Arc::new(Slot {
                result: Mutex::new(Some(result)),
                ready: Condvar::new(),
            }),
        }
    }

    /// An already-failed future
    pub fn failed(error: Error) -> Self {
        Self::ready(Err(error))
    }

    /// A pending future and the completer that resolves it
    pub(crate) fn pending() -> (Self, Completer<T>) {
        let slot = Arc::new(Slot {
            result: Mutex::new(None),
            ready: Condvar::new(),
        });
        (
            Self {
                slot: Arc::clone(&slot),
            },
            Completer {
                slot: Some(slot),
            },
        )
    }

    /// True once a result is available
    pub fn is_done(&self) -> bool {
        self.slot.result.lock().is_some()
    }

    /// Block until the result is available
    pub fn wait(self) -> KeepsakeResult<T> {
        let mut guard = self.slot.result.lock();
        loop {
            if let Some(result) = guard.take() {
                return result;
            }
            self.slot.ready.wait(&mut guard);
        }
    }

    /// Block for at most `timeout`. Gives the future back if it is still
    /// pending.
    pub fn wait_timeout(self, timeout: Duration) -> Result<KeepsakeResult<T>, Self> {
        let deadline = Instant::now() + timeout;
        {
            let mut guard = self.slot.result.lock();
            loop {
                if let Some(result) = guard.take() {
                    return Ok(result);
                }
                if self.slot.ready.wait_until(&mut guard, deadline).timed_out() {
                    if let Some(result) = guard.take() {
                        return Ok(result);
                    }
                    break;
                }
            }
        }
        Err(self)
    }

    /// Wait for every future. Returns all values, or the first error in
    /// input order once every future has finished.
    pub fn join_all(futures: impl IntoIterator<Item = StorageFuture<T>>) -> KeepsakeResult<Vec<T>> {
        let mut values = Vec::new();
        let mut first_error = None;
        for future in futures {
            match future.wait() {
                Ok(v) => values.push(v),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(values),
        }
    }
}

impl<T> std::fmt::Debug for StorageFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageFuture")
            .field("done", &self.is_done())
            .finish()
    }
}

/// Write side of a pending [`StorageFuture`].
///
/// Dropping a completer without completing it fails the future, so a task
/// that never runs cannot leave a waiter blocked forever.
pub(crate) struct Completer<T> {
    slot: Option<Arc<Slot<T>>>,
}

impl<T> Completer<T> {
    pub(crate) fn complete(mut self, result: KeepsakeResult<T>) {
        if let Some(slot) = self.slot.take() {
            slot.fill(result);
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.fill(Err(Error::Dispatch(
                "storage task dropped before completion".to_string(),
            )));
        }
    }
}
