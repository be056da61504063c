// src/task.rs

//! The task wrapper around a caller-supplied action.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, error, warn};

use crate::engine::scheduler::Shared;
use crate::errors::{ActionError, Error, Result};
use crate::tags::Tag;

/// Result of one `perform` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Disable this task and all its dependents.
    Disable,
    /// Disable this task and all its dependents for the current pass only;
    /// the task itself is re-enabled when the pass finishes.
    DisableOnce,
}

/// A caller-supplied unit of work.
///
/// Implementations are shared between the scheduler and worker threads, so
/// any internal state must be synchronised by the action itself.
pub trait Action: Send + Sync {
    /// Do the work. Failures reported as [`ActionError::Other`] are treated
    /// as [`Outcome::Failure`] and feed the retry loop; a re-raised
    /// [`ActionError::Cancelled`] aborts the pass.
    fn perform(&self) -> std::result::Result<Outcome, ActionError>;

    /// Whether a failed `perform` may be retried.
    fn can_retry(&self) -> bool {
        false
    }

    /// Human-readable name. Must not be empty.
    fn name(&self) -> String;

    /// Tags the owning task is registered under when created.
    fn tags(&self) -> Vec<Tag> {
        Vec::new()
    }

    /// The action's own enablement flag; combined with the task's flag.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Stable task identity used for equality and hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

struct TaskFlags {
    enabled: bool,
    executing: bool,
}

/// An activity: the scheduler's wrapper around an [`Action`].
///
/// Carries the enable/executing flags and the retry policy. A task is
/// created through [`crate::Scheduler::create`] and shared as `Arc<Task>`
/// between the scheduler and any callers holding on to it.
pub struct Task {
    id: TaskId,
    action: Arc<dyn Action>,
    flags: Mutex<TaskFlags>,
    exec_lock: Mutex<()>,
    max_retries: u32,
    me: Weak<Task>,
    service: Weak<Shared>,
}

impl Task {
    pub(crate) fn new(action: Arc<dyn Action>, max_retries: u32, service: Weak<Shared>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)),
            action,
            flags: Mutex::new(TaskFlags {
                enabled: true,
                executing: false,
            }),
            exec_lock: Mutex::new(()),
            max_retries,
            me: me.clone(),
            service,
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn action(&self) -> Arc<dyn Action> {
        Arc::clone(&self.action)
    }

    pub fn action_name(&self) -> String {
        self.action.name()
    }

    pub fn action_tags(&self) -> Vec<Tag> {
        self.action.tags()
    }

    pub fn is_executing(&self) -> bool {
        self.lock_flags().executing
    }

    /// True while both the task and its action are enabled.
    pub fn is_enabled(&self) -> bool {
        self.lock_flags().enabled && self.action.is_enabled()
    }

    /// Disable the task, unless it is currently executing.
    ///
    /// Returns true iff the task is disabled after the call.
    pub fn disable(&self) -> bool {
        let mut flags = self.lock_flags();

        if flags.executing {
            debug!(
                task = %self.action_name(),
                "could not disable activity because it is executing"
            );
            return false;
        }

        flags.enabled = false;
        debug!(task = %self.action_name(), "activity disabled");
        true
    }

    /// Restore the enabled flag between passes after a `DISABLE_ONCE`.
    pub(crate) fn reenable(&self) {
        self.lock_flags().enabled = true;
    }

    /// Execute the action and map its result to an [`Outcome`]. A failed
    /// execution is retried up to the configured maximum while the action
    /// reports `can_retry()`; if the final outcome is `Failure` or `Disable`
    /// the task disables itself.
    ///
    /// At most one `execute` may run at a time per task; a second concurrent
    /// call is a caller bug and fails with [`Error::AlreadyExecuting`].
    pub fn execute(&self) -> Result<Outcome> {
        let _exec = match self.exec_lock.try_lock() {
            Ok(guard) => guard,
            Err(std::sync::TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(std::sync::TryLockError::WouldBlock) => {
                error!(
                    task = %self.action_name(),
                    "refusing to execute activity because it is already executing"
                );
                return Err(Error::AlreadyExecuting(self.action_name()));
            }
        };

        let mut outcome = self.exec_once()?;

        if outcome == Outcome::Disable {
            self.disable();
            return Ok(outcome);
        }

        let mut retry_count = 0;
        while outcome == Outcome::Failure
            && self.action.can_retry()
            && retry_count < self.max_retries
        {
            retry_count += 1;
            debug!(
                task = %self.action_name(),
                attempt = retry_count,
                max = self.max_retries,
                "retrying failed activity"
            );
            outcome = self.exec_once()?;
        }

        if outcome == Outcome::Failure {
            if retry_count > 0 {
                debug!(
                    task = %self.action_name(),
                    retries = retry_count,
                    "activity continues to fail after retries; disabling it"
                );
            } else {
                debug!(
                    task = %self.action_name(),
                    "no retry attempted because the action does not allow it; disabling it"
                );
            }

            self.disable();
        }

        Ok(outcome)
    }

    /// One invocation of the action, guarded by the executing flag.
    fn exec_once(&self) -> Result<Outcome> {
        {
            let mut flags = self.lock_flags();

            if flags.executing {
                error!(
                    task = %self.action_name(),
                    "activity state is invalid: already executing"
                );
                return Err(Error::AlreadyExecuting(self.action_name()));
            }

            if !(flags.enabled && self.action.is_enabled()) {
                debug!(
                    task = %self.action_name(),
                    "activity is already disabled; dependents will be disabled too"
                );
                return Ok(Outcome::Disable);
            }

            flags.executing = true;
        }

        // The executing flag is cleared on every exit path, including a
        // panicking action.
        let guard = ClearExecuting(self);
        let result = self.action.perform();
        drop(guard);

        match result {
            Ok(outcome) => {
                debug!(task = %self.action_name(), ?outcome, "activity action returned");
                Ok(outcome)
            }
            Err(ActionError::Cancelled) => {
                debug!(
                    task = %self.action_name(),
                    "activity observed cancellation; rethrowing"
                );
                Err(Error::Cancelled)
            }
            Err(ActionError::Other(err)) => {
                warn!(
                    task = %self.action_name(),
                    error = %err,
                    "activity execution failed because the action reported an error"
                );
                Ok(Outcome::Failure)
            }
        }
    }

    /// Declare that this task runs before the given successors.
    pub fn before(&self, succeeding: &[Arc<Task>]) -> Result<()> {
        self.service()?.before(&self.arc()?, succeeding)
    }

    /// Declare that this task runs after the given predecessors.
    pub fn after(&self, preceding: &[Arc<Task>]) -> Result<()> {
        self.service()?.after(&self.arc()?, preceding)
    }

    /// Remove this task from the scheduler, re-stitching its neighbours.
    pub fn remove_all_dependencies(&self) -> Result<bool> {
        Ok(self.service()?.remove(&self.arc()?))
    }

    /// Register this task under the given tags.
    pub fn tag(&self, tags: &[Tag]) -> Result<()> {
        self.service()?.tag(&self.arc()?, tags);
        Ok(())
    }

    /// Unregister this task from the given tags.
    pub fn untag(&self, tags: &[Tag]) -> Result<()> {
        self.service()?.untag(&self.arc()?, tags);
        Ok(())
    }

    fn service(&self) -> Result<Arc<Shared>> {
        self.service.upgrade().ok_or(Error::SchedulerDropped)
    }

    fn arc(&self) -> Result<Arc<Task>> {
        self.me.upgrade().ok_or(Error::SchedulerDropped)
    }

    fn lock_flags(&self) -> std::sync::MutexGuard<'_, TaskFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct ClearExecuting<'a>(&'a Task);

impl Drop for ClearExecuting<'_> {
    fn drop(&mut self) {
        self.0.lock_flags().executing = false;
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Task {}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = self.lock_flags();
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.action.name())
            .field("enabled", &flags.enabled)
            .field("executing", &flags.executing)
            .finish()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Activity: {}", self.action_name())
    }
}
