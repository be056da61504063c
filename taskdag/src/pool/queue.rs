// src/pool/queue.rs

//! Ordering for queued pool jobs.

use std::cmp::Ordering;

use super::executor::CancelToken;

/// A submitted job waiting for a worker.
///
/// Jobs are ordered by `(priority desc, sequence asc)`: a higher priority is
/// more urgent, and the monotonically increasing submission sequence acts as
/// a stable tiebreaker so equal-priority jobs run in FIFO order.
pub(crate) struct QueuedJob {
    pub priority: i32,
    pub sequence: u64,
    pub token: CancelToken,
    pub job: Box<dyn FnOnce() + Send + 'static>,
}

impl QueuedJob {
    pub fn run(self) {
        (self.job)();
    }
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest element: highest priority first,
        // earliest sequence first within a priority.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}
