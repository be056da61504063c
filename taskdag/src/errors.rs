// src/errors.rs

//! Crate-wide error types.

use thiserror::Error;

/// Errors surfaced by the scheduler and its collaborators.
#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot create an activity without a usable action: {0}")]
    InvalidAction(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cyclic dependency encountered in the activity execution queue: {0}")]
    CyclicDependencies(String),

    #[error("activity \"{0}\" cannot be ordered before or after itself")]
    SelfDependency(String),

    #[error("activity \"{0}\" is already executing")]
    AlreadyExecuting(String),

    #[error("activity execution was cancelled")]
    Cancelled,

    #[error("execution failed while executing activity \"{task}\"")]
    TaskFailed {
        task: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("the owning scheduler is no longer available")]
    SchedulerDropped,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors an [`crate::task::Action`] may report from `perform`.
///
/// Anything other than `Cancelled` is treated as a failed execution attempt
/// and feeds the retry loop; `Cancelled` is re-raised and aborts the pass.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("the action observed cancellation")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
