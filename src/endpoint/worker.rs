//! Worker thread pool
//!
//! Fixed-size pool fed by a bounded channel. When the queue is full the
//! submitting thread runs the task itself: dispatches are never dropped, and
//! the backpressure lands on the poller that produced the work.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::EndpointError;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Run a task without letting a panic take the calling thread with it.
///
/// A panic here has already been charged to one connection; the worker (or
/// the poller, on the inline path) keeps serving the rest.
fn run_contained(task: Task) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        warn!("Dispatched task panicked");
    }
}

/// Dispatch statistics
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Tasks handed to a worker thread
    dispatched: AtomicU64,
    /// Tasks run inline because the queue was full
    inline_runs: AtomicU64,
}

impl WorkerStats {
    /// Tasks handed to a worker thread
    #[must_use]
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Tasks run on the submitting thread
    #[must_use]
    pub fn inline_runs(&self) -> u64 {
        self.inline_runs.load(Ordering::Relaxed)
    }
}

/// Fixed worker pool over a bounded channel.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Task>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stats: WorkerStats,
}

impl WorkerPool {
    /// Spawn `count` workers with a queue of `queue_depth` tasks.
    ///
    /// # Errors
    ///
    /// Returns `EndpointError::ThreadSpawn` if a worker thread cannot start.
    pub fn new(count: usize, queue_depth: usize) -> Result<Self, EndpointError> {
        let (tx, rx) = bounded::<Task>(queue_depth);

        let mut handles = Vec::with_capacity(count);
        for id in 0..count {
            let rx = rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("conduit-worker-{id}"))
                .spawn(move || {
                    trace!("Worker {} started", id);
                    while let Ok(task) = rx.recv() {
                        run_contained(task);
                    }
                    trace!("Worker {} exiting", id);
                })
                .map_err(|e| EndpointError::thread_spawn("worker", e.to_string()))?;
            handles.push(handle);
        }

        debug!("Worker pool started: {} thread(s), queue depth {}", count, queue_depth);

        Ok(Self {
            sender: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
            stats: WorkerStats::default(),
        })
    }

    /// Run a task on a worker, or inline when the queue is full (or the
    /// pool is shutting down). Never drops a task.
    pub fn execute(&self, task: Task) {
        let sender = self.sender.lock().clone();
        match sender {
            Some(tx) => match tx.try_send(task) {
                Ok(()) => {
                    self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(task) | TrySendError::Disconnected(task)) => {
                    self.stats.inline_runs.fetch_add(1, Ordering::Relaxed);
                    run_contained(task);
                }
            },
            None => {
                self.stats.inline_runs.fetch_add(1, Ordering::Relaxed);
                run_contained(task);
            }
        }
    }

    /// Stop accepting tasks, finish what is queued and join the workers.
    pub fn shutdown(&self) {
        // Dropping the sender ends every worker's recv loop
        drop(self.sender.lock().take());

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.join();
        }
        debug!("Worker pool stopped");
    }

    /// Dispatch statistics
    #[must_use]
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("running", &self.sender.lock().is_some())
            .field("stats", &self.stats)
            .finish()
    }
}
