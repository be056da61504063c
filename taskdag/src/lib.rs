// src/lib.rs

//! In-process activity scheduler.
//!
//! `taskdag` builds a directed acyclic graph of caller-supplied tasks and
//! executes them, either sequentially in a topologically valid order or in
//! parallel with per-task dependency barriers on a priority-aware worker
//! pool. Tasks carry tags used as secondary lookup keys, and a failing task
//! disables its transitive dependents so a partial graph still runs to the
//! maximum safe extent.
//!
//! The building blocks:
//!
//! - [`Action`]: the caller-supplied unit of work (`perform`, `can_retry`,
//!   `name`, `tags`, `is_enabled`).
//! - [`Task`]: the scheduler's wrapper around an action; carries the
//!   enable/executing flags and the retry policy.
//! - [`Scheduler`]: owns the graph and the tag index; exposes the
//!   dependency-building API (`create`, `add`, `before`, `after`, `remove`)
//!   and the execution passes (`execute_all`, `execute_filtered`).
//! - [`Tag`] / [`TagRegistry`]: interned names used to look up groups of
//!   tasks.
//!
//! For every declared edge `u → v`, the completion of `u` happens before the
//! start of `v`, in both execution modes. In parallel mode tasks are
//! partitioned into levels by dependency depth and submitted to the pool at
//! priority `max_depth - depth`, so roots run at the highest priority.
//!
//! See [`Scheduler`] for a complete example.

pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod pool;
pub mod tags;
pub mod task;

pub use config::SchedulerConfig;
pub use engine::Scheduler;
pub use errors::{ActionError, Error, Result};
pub use tags::{Tag, TagRegistry};
pub use task::{Action, Outcome, Task, TaskId};
