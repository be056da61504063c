// src/engine/plan.rs

//! Planning for parallel execution passes: per-task barrier latches and the
//! depth-derived priority levels.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use indexmap::IndexMap;

use crate::task::TaskId;

/// A single-count latch: opened exactly once, awaited by any number of
/// threads. The one-shot equivalent of a countdown latch with count 1.
pub(crate) struct Latch {
    opened: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self {
            opened: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub fn open(&self) {
        let mut opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
        *opened = true;
        self.cond.notify_all();
    }

    pub fn wait(&self) {
        let mut opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
        while !*opened {
            opened = self
                .cond
                .wait(opened)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Opens a latch when dropped, so a job releases its barrier on every exit
/// path, including panics.
pub(crate) struct OpenOnDrop(pub Arc<Latch>);

impl Drop for OpenOnDrop {
    fn drop(&mut self) {
        self.0.open();
    }
}

/// Tasks sharing one pool priority; executed together under a level barrier.
pub(crate) struct Level {
    pub priority: i32,
    pub tasks: Vec<TaskId>,
}

/// Maximum dependency depth per task: 0 for tasks with no predecessors,
/// otherwise one more than the deepest predecessor. Memoised, with an
/// explicit stack so deep chains cannot overflow.
pub(crate) fn compute_depths(deps: &IndexMap<TaskId, BTreeSet<TaskId>>) -> HashMap<TaskId, usize> {
    let mut depths: HashMap<TaskId, usize> = HashMap::with_capacity(deps.len());

    for &task in deps.keys() {
        if depths.contains_key(&task) {
            continue;
        }

        let mut stack = vec![task];
        while let Some(&current) = stack.last() {
            if depths.contains_key(&current) {
                stack.pop();
                continue;
            }

            let Some(parents) = deps.get(&current) else {
                depths.insert(current, 0);
                stack.pop();
                continue;
            };

            let mut unresolved = false;
            let mut deepest: Option<usize> = None;

            for parent in parents {
                match depths.get(parent) {
                    Some(&depth) => {
                        deepest = Some(deepest.map_or(depth, |d| d.max(depth)));
                    }
                    None => {
                        stack.push(*parent);
                        unresolved = true;
                    }
                }
            }

            if !unresolved {
                let depth = deepest.map_or(0, |d| d + 1);
                depths.insert(current, depth);
                stack.pop();
            }
        }
    }

    depths
}

/// Partition tasks into levels by priority `max_depth - depth(t)`, so roots
/// get the highest priority and the deepest tasks the lowest. Levels are
/// returned in descending priority; tasks keep their order within a level.
pub(crate) fn build_levels(order: &[TaskId], depths: &HashMap<TaskId, usize>) -> Vec<Level> {
    let max_depth = depths.values().copied().max().unwrap_or(0);

    let mut by_priority: BTreeMap<i32, Vec<TaskId>> = BTreeMap::new();
    for &task in order {
        let depth = depths.get(&task).copied().unwrap_or(0);
        let priority = (max_depth - depth) as i32;
        by_priority.entry(priority).or_default().push(task);
    }

    by_priority
        .into_iter()
        .rev()
        .map(|(priority, tasks)| Level { priority, tasks })
        .collect()
}
