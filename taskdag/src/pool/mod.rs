// src/pool/mod.rs

mod executor;
mod queue;

pub use executor::{CancelToken, JobError, JobHandle, PriorityPool};
