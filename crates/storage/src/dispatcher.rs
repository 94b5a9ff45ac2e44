//! Thread-aware dispatch of storage work.
//!
//! Storage I/O must never stall the host's main thread. When the caller is
//! the designated main thread, [`Dispatcher::run`] queues the task on a fixed
//! pool of worker threads and returns a pending [`StorageFuture`]. Any other
//! caller runs the task inline and gets an already-completed future, which
//! avoids a pointless hand-off when already off the main thread.
//!
//! `run` never panics or fails synchronously: task errors, task panics and
//! rejected submissions all complete the returned future with an error.

use keepsake_core::{Error, KeepsakeResult};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use tracing::{debug, error};

use crate::future::StorageFuture;

/// Dispatcher metrics snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Number of tasks waiting in the queue.
    pub queue_depth: usize,
    /// Number of tasks currently being executed by workers.
    pub active_tasks: usize,
    /// Total number of queued tasks completed since creation.
    pub tasks_completed: u64,
    /// Tasks handed to the worker pool.
    pub offloaded: u64,
    /// Tasks executed on the calling thread.
    pub inline: u64,
    /// Number of worker threads.
    pub worker_count: usize,
}

type Task = Box<dyn FnOnce() + Send>;

struct DispatcherInner {
    queue: Mutex<VecDeque<Task>>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    queue_depth: AtomicUsize,
    active_tasks: AtomicUsize,
    max_queue_depth: usize,
    tasks_completed: AtomicU64,
}

/// Runs storage tasks inline or on a worker pool depending on the caller.
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
    main_thread: RwLock<Option<ThreadId>>,
    offloaded: AtomicU64,
    inline: AtomicU64,
}

impl Dispatcher {
    /// Create a dispatcher with `num_threads` workers (at least one) and a
    /// queue bounded at `max_queue_depth`.
    ///
    /// Workers are named `keepsake-storage-0`, `keepsake-storage-1`, etc.
    pub fn new(num_threads: usize, max_queue_depth: usize) -> KeepsakeResult<Self> {
        let num_threads = num_threads.max(1);
        let inner = Arc::new(DispatcherInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            queue_depth: AtomicUsize::new(0),
            active_tasks: AtomicUsize::new(0),
            max_queue_depth,
            tasks_completed: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            let inner_clone = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name(format!("keepsake-storage-{}", i))
                .spawn(move || worker_loop(&inner_clone))?;
            workers.push(handle);
        }

        Ok(Self {
            inner,
            workers: Mutex::new(workers),
            num_threads,
            main_thread: RwLock::new(None),
            offloaded: AtomicU64::new(0),
            inline: AtomicU64::new(0),
        })
    }

    /// Treat `thread` as the restricted main thread.
    pub fn designate_main_thread(&self, thread: ThreadId) {
        *self.main_thread.write() = Some(thread);
    }

    /// Treat the calling thread as the restricted main thread.
    pub fn designate_current_thread(&self) {
        self.designate_main_thread(std::thread::current().id());
    }

    /// Forget the main thread; every task then runs inline.
    pub fn clear_main_thread(&self) {
        *self.main_thread.write() = None;
    }

    /// True if the calling thread is the designated main thread
    pub fn is_main_thread(&self) -> bool {
        *self.main_thread.read() == Some(std::thread::current().id())
    }

    /// Run `task` under the calling-thread policy.
    pub fn run<R, F>(&self, task: F) -> StorageFuture<R>
    where
        R: Send + 'static,
        F: FnOnce() -> KeepsakeResult<R> + Send + 'static,
    {
        if !self.is_main_thread() {
            self.inline.fetch_add(1, Ordering::Relaxed);
            return StorageFuture::ready(run_guarded(task));
        }

        let (future, completer) = StorageFuture::pending();
        let submitted = self.submit(Box::new(move || {
            completer.complete(run_guarded(task));
        }));
        match submitted {
            Ok(()) => {
                self.offloaded.fetch_add(1, Ordering::Relaxed);
                future
            }
            // The rejected closure (and its completer) was dropped, which
            // already failed `future`; report the precise reason instead.
            Err(e) => StorageFuture::failed(e),
        }
    }

    fn submit(&self, work: Task) -> KeepsakeResult<()> {
        // Reject after shutdown, workers have been joined and the task would never run
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(Error::Dispatch("dispatcher has been shut down".to_string()));
        }

        if self.inner.queue_depth.load(Ordering::Acquire) >= self.inner.max_queue_depth {
            return Err(Error::Dispatch(format!(
                "storage queue is full ({} tasks)",
                self.inner.max_queue_depth
            )));
        }

        {
            let mut queue = self.inner.queue.lock();
            queue.push_back(work);
            self.inner.queue_depth.fetch_add(1, Ordering::Release);
        }

        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Block until all queued and in-flight tasks have completed.
    ///
    /// Workers remain running afterwards.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while self.inner.queue_depth.load(Ordering::Acquire) > 0
            || self.inner.active_tasks.load(Ordering::Acquire) > 0
        {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    /// Signal workers to exit and join them. Queued tasks still run first.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);

        // Lock the queue before notifying so a worker between its shutdown
        // check and its condvar wait cannot miss the wakeup.
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }

        let mut workers = self.workers.lock();
        let joined = workers.len();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        if joined > 0 {
            debug!(target: "keepsake::dispatch", workers = joined, "Dispatcher shut down");
        }
    }

    /// True once `shutdown` has been called
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Return a snapshot of dispatcher metrics.
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            queue_depth: self.inner.queue_depth.load(Ordering::Relaxed),
            active_tasks: self.inner.active_tasks.load(Ordering::Relaxed),
            tasks_completed: self.inner.tasks_completed.load(Ordering::Relaxed),
            offloaded: self.offloaded.load(Ordering::Relaxed),
            inline: self.inline.load(Ordering::Relaxed),
            worker_count: self.num_threads,
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("stats", &self.stats())
            .field("main_thread", &*self.main_thread.read())
            .finish()
    }
}

/// Run a task, turning a panic into [`Error::TaskPanicked`].
fn run_guarded<R>(task: impl FnOnce() -> KeepsakeResult<R>) -> KeepsakeResult<R> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(target: "keepsake::dispatch", panic = %message, "storage task panicked");
            Err(Error::TaskPanicked(message))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "(non-string panic)".to_string()
    }
}

/// RAII guard that decrements `active_tasks` and notifies drain waiters on drop.
struct ActiveTaskGuard<'a> {
    inner: &'a DispatcherInner,
}

impl<'a> Drop for ActiveTaskGuard<'a> {
    fn drop(&mut self) {
        let prev_active = self.inner.active_tasks.fetch_sub(1, Ordering::Release);
        self.inner.tasks_completed.fetch_add(1, Ordering::Relaxed);

        // drain() checks its condition under the queue lock, so notify under it too
        if prev_active == 1 && self.inner.queue_depth.load(Ordering::Acquire) == 0 {
            let _queue = self.inner.queue.lock();
            self.inner.drain_cond.notify_all();
        }
    }
}

fn worker_loop(inner: &DispatcherInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    inner.queue_depth.fetch_sub(1, Ordering::Release);
                    inner.active_tasks.fetch_add(1, Ordering::Release);
                    break task;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveTaskGuard { inner };

        // Tasks built by `run` already catch their own panics; this keeps the
        // worker alive for anything else.
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)).is_err() {
            error!(target: "keepsake::dispatch", "worker task panicked outside its guard");
        }
    }
}
