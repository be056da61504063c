// src/pool/executor.rs

//! A bounded worker pool consuming a priority queue of jobs.
//!
//! The pool differs from a conventional bounded-queue executor in one way:
//! it prefers creating a new worker over queuing. On submission, if fewer
//! than `max_size` workers are alive, a new worker is spawned and handed the
//! job directly, even if idle workers exist; only once the pool is full do
//! jobs queue. Idle workers above `core_size` retire after the keep-alive
//! timeout.

use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error};

use super::queue::QueuedJob;

/// Best-effort cancellation signal shared between a job and its handle.
///
/// Cancelling a queued job prevents it from running; a job that has already
/// started only observes the token at its next check point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a job produced no result.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("the job was cancelled before it produced a result")]
    Cancelled,

    #[error("the job panicked: {0}")]
    Panicked(String),
}

struct Slot<T> {
    result: Mutex<Option<Result<T, JobError>>>,
    done: Condvar,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn complete(&self, value: Result<T, JobError>) {
        let mut result = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        *result = Some(value);
        self.done.notify_all();
    }
}

/// Handle to a submitted job; resolves with the job's result or error.
pub struct JobHandle<T> {
    slot: Arc<Slot<T>>,
    token: CancelToken,
}

impl<T> JobHandle<T> {
    /// Block until the job completes and take its result.
    pub fn join(self) -> Result<T, JobError> {
        let mut result = self
            .slot
            .result
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while result.is_none() {
            result = self
                .slot
                .done
                .wait(result)
                .unwrap_or_else(PoisonError::into_inner);
        }
        result.take().expect("result vanished after completion")
    }

    /// Request best-effort cancellation of the job.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }
}

struct PoolState {
    queue: BinaryHeap<QueuedJob>,
    live: usize,
    shutdown: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    work_available: Condvar,
    name: String,
    core_size: usize,
    max_size: usize,
    keep_alive: Duration,
    sequence: AtomicU64,
    worker_seq: AtomicU64,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The priority worker pool. Dropping it shuts the workers down; queued jobs
/// that never ran resolve as [`JobError::Cancelled`].
pub struct PriorityPool {
    shared: Arc<PoolShared>,
}

impl PriorityPool {
    /// Create a pool whose worker threads are named `<name>-<n>`.
    pub fn new(name: &str, core_size: usize, max_size: usize, keep_alive: Duration) -> Self {
        let max_size = max_size.max(1);
        let core_size = core_size.min(max_size);

        Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    queue: BinaryHeap::new(),
                    live: 0,
                    shutdown: false,
                }),
                work_available: Condvar::new(),
                name: name.to_string(),
                core_size,
                max_size,
                keep_alive,
                sequence: AtomicU64::new(0),
                worker_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Submit a job with the declared priority.
    ///
    /// The closure receives the job's [`CancelToken`] so long-running work
    /// can poll for cancellation. Panics inside the job are caught and
    /// surfaced through the handle as [`JobError::Panicked`].
    pub fn submit<T, F>(&self, priority: i32, f: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        let token = CancelToken::default();
        let slot = Arc::new(Slot::new());
        let handle = JobHandle {
            slot: Arc::clone(&slot),
            token: token.clone(),
        };

        let job_token = token.clone();
        let job: Box<dyn FnOnce() + Send + 'static> = Box::new(move || {
            if job_token.is_cancelled() {
                slot.complete(Err(JobError::Cancelled));
                return;
            }

            match catch_unwind(AssertUnwindSafe(|| f(&job_token))) {
                Ok(value) => slot.complete(Ok(value)),
                Err(payload) => slot.complete(Err(JobError::Panicked(panic_message(&payload)))),
            }
        });

        let sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let queued = QueuedJob {
            priority,
            sequence,
            token: token.clone(),
            job,
        };

        let mut state = self.shared.lock();

        if state.shutdown {
            drop(state);
            token.cancel();
            queued.run();
            return handle;
        }

        if state.live < self.shared.max_size {
            // Prefer spawning a new worker over queuing, even if idle
            // workers exist.
            state.live += 1;
            let live = state.live;
            drop(state);
            spawn_worker(&self.shared, queued);
            debug!(live, priority, sequence, "spawned pool worker for job");
        } else {
            debug!(priority, sequence, queued = state.queue.len() + 1, "queued job");
            state.queue.push(queued);
            drop(state);
            self.shared.work_available.notify_one();
        }

        handle
    }

    /// Number of workers currently alive.
    pub fn live_workers(&self) -> usize {
        self.shared.lock().live
    }

    /// Number of jobs waiting in the queue.
    pub fn queued_jobs(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Stop accepting work and wake all workers. Jobs still in the queue are
    /// completed as cancelled without running.
    pub fn shutdown(&self) {
        let drained: Vec<QueuedJob> = {
            let mut state = self.shared.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.queue.drain().collect()
        };

        self.shared.work_available.notify_all();

        for job in drained {
            job.token.cancel();
            job.run();
        }
    }
}

impl Drop for PriorityPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(shared: &Arc<PoolShared>, first: QueuedJob) {
    let id = shared.worker_seq.fetch_add(1, Ordering::Relaxed) + 1;
    let name = format!("{}-{}", shared.name, id);
    let cloned = Arc::clone(shared);

    // The job is handed over through a slot rather than captured directly so
    // it can be recovered if the thread cannot be created.
    let handoff = Arc::new(Mutex::new(Some(first)));
    let worker_handoff = Arc::clone(&handoff);

    let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
        let first = worker_handoff
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        worker_loop(cloned, first);
    });

    if let Err(err) = spawned {
        error!(worker = %name, error = %err, "failed to spawn pool worker; requeueing job");

        let job = handoff
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let mut state = shared.lock();
        state.live -= 1;
        if let Some(job) = job {
            state.queue.push(job);
        }
        drop(state);
        shared.work_available.notify_one();
    }
}

fn worker_loop(shared: Arc<PoolShared>, first: Option<QueuedJob>) {
    debug!("pool worker started");

    if let Some(job) = first {
        job.run();
    }

    while let Some(job) = next_job(&shared) {
        job.run();
    }

    debug!("pool worker retired");
}

/// Block until a job is available. Returns `None` when the worker should
/// exit: the pool shut down, or this worker sat idle above the core size for
/// the whole keep-alive window. The live count is decremented before
/// returning `None`.
fn next_job(shared: &PoolShared) -> Option<QueuedJob> {
    let mut state = shared.lock();

    loop {
        if let Some(job) = state.queue.pop() {
            return Some(job);
        }

        if state.shutdown {
            state.live -= 1;
            return None;
        }

        if state.live > shared.core_size {
            let (guard, timeout) = shared
                .work_available
                .wait_timeout(state, shared.keep_alive)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;

            if timeout.timed_out() && state.queue.is_empty() && !state.shutdown {
                state.live -= 1;
                return None;
            }
        } else {
            state = shared
                .work_available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}
