// src/engine/scheduler.rs

//! The activity scheduler: owns the dependency graph and the tag index,
//! exposes the dependency-building API, and runs execution passes.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::dag::{Graph, GraphError, VertexId};
use crate::engine::plan::{build_levels, compute_depths, Latch, OpenOnDrop};
use crate::errors::{Error, Result};
use crate::pool::{CancelToken, JobError, PriorityPool};
use crate::tags::{Tag, TagRegistry};
use crate::task::{Action, Outcome, Task, TaskId};

/// Scheduler state guarded by the single scheduler lock.
struct Inner {
    graph: Graph<TaskId>,
    /// Added tasks by identity; iteration order is creation order.
    tasks: BTreeMap<TaskId, Arc<Task>>,
    tasks_by_tag: HashMap<Tag, Vec<Arc<Task>>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            graph: Graph::new(),
            tasks: BTreeMap::new(),
            tasks_by_tag: HashMap::new(),
        }
    }
}

/// Shared scheduler internals. Tasks hold a `Weak` reference back to this so
/// their convenience methods can delegate.
pub(crate) struct Shared {
    inner: Mutex<Inner>,
    pool: PriorityPool,
    registry: TagRegistry,
    config: SchedulerConfig,
}

/// The activities scheduler: manages activities, executes their actions in
/// dependency order, and disables the transitive dependents of failing
/// activities so a partial graph still runs to the maximum safe extent.
///
/// All public methods take the scheduler's single lock; two concurrent
/// execution passes on the same scheduler serialise on it.
///
/// ```
/// use std::sync::Arc;
/// use taskdag::{Action, ActionError, Outcome, Scheduler, SchedulerConfig};
///
/// struct Step(&'static str);
///
/// impl Action for Step {
///     fn perform(&self) -> Result<Outcome, ActionError> {
///         Ok(Outcome::Success)
///     }
///
///     fn name(&self) -> String {
///         self.0.to_string()
///     }
/// }
///
/// # fn main() -> taskdag::Result<()> {
/// let scheduler = Scheduler::new(SchedulerConfig::default());
///
/// let fetch = scheduler.create(Arc::new(Step("fetch")))?;
/// let build = scheduler.create(Arc::new(Step("build")))?;
///
/// scheduler.add(&[fetch.clone(), build.clone()]);
/// scheduler.before(&fetch, &[build])?;
/// scheduler.execute_all(true)?;
/// # Ok(())
/// # }
/// ```
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_registry(config, TagRegistry::new())
    }

    /// Create a scheduler sharing an existing tag registry, e.g. for test
    /// isolation or to intern tags across schedulers.
    pub fn with_registry(config: SchedulerConfig, registry: TagRegistry) -> Self {
        let pool = PriorityPool::new(
            "activity-executor",
            config.core_pool_size,
            config.max_pool_size,
            config.keep_alive(),
        );

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::new()),
                pool,
                registry,
                config,
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Create an activity wrapping the action and register it under the
    /// action's tags. The activity is not part of the execution queue until
    /// [`Scheduler::add`] or a dependency declaration adds it.
    pub fn create(&self, action: Arc<dyn Action>) -> Result<Arc<Task>> {
        Shared::create(&self.shared, action)
    }

    /// Add activities to the execution queue. Adding the same activity twice
    /// has no further effect.
    pub fn add(&self, tasks: &[Arc<Task>]) {
        self.shared.add(tasks);
    }

    /// Declare that `task` executes before every activity in `succeeding`.
    pub fn before(&self, task: &Arc<Task>, succeeding: &[Arc<Task>]) -> Result<()> {
        self.shared.before(task, succeeding)
    }

    /// Declare that `task` executes after every activity in `preceding`.
    pub fn after(&self, task: &Arc<Task>, preceding: &[Arc<Task>]) -> Result<()> {
        self.shared.after(task, preceding)
    }

    /// The action of an activity, as long as the activity is in the
    /// execution queue.
    pub fn get_action(&self, task: &Arc<Task>) -> Option<Arc<dyn Action>> {
        self.shared.get_action(task)
    }

    /// Remove an activity, re-stitching edges between its predecessors and
    /// successors so transitive ordering constraints are preserved. Returns
    /// true if the activity was present.
    pub fn remove(&self, task: &Arc<Task>) -> bool {
        self.shared.remove(task)
    }

    /// Execute every queued activity, sequentially or in parallel.
    pub fn execute_all(&self, parallel: bool) -> Result<()> {
        self.shared.execute_all(parallel)
    }

    /// Execute the given activities in a topological order restricted to
    /// them; dependency edges whose other endpoint is not selected are
    /// ignored. An empty filter selects every queued activity.
    pub fn execute_filtered(&self, tasks: &[Arc<Task>], parallel: bool) -> Result<()> {
        self.shared.execute_filtered(tasks, parallel)
    }

    /// Drop every activity, dependency and tag association.
    pub fn reset(&self) {
        self.shared.reset();
    }

    /// Intern a tag by name in the scheduler's registry.
    pub fn create_tag(&self, name: &str) -> Tag {
        self.shared.registry.create(name)
    }

    /// Activities registered under the given tags, in discovery order
    /// without duplicates. With `tagged_only` false the result also includes
    /// every activity a tagged activity transitively depends on.
    pub fn get_activities(&self, tagged_only: bool, tags: &[Tag]) -> Vec<Arc<Task>> {
        self.shared.get_activities(tagged_only, tags)
    }

    /// Register an activity under the given tags.
    pub fn tag(&self, task: &Arc<Task>, tags: &[Tag]) {
        self.shared.tag(task, tags);
    }

    /// Unregister an activity from the given tags.
    pub fn untag(&self, task: &Arc<Task>, tags: &[Tag]) {
        self.shared.untag(task, tags);
    }

    /// Number of pool workers currently alive.
    pub fn live_workers(&self) -> usize {
        self.shared.pool.live_workers()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Shared {
    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn create(self: &Arc<Self>, action: Arc<dyn Action>) -> Result<Arc<Task>> {
        if action.name().trim().is_empty() {
            return Err(Error::InvalidAction(
                "the action must report a non-empty name".to_string(),
            ));
        }

        let task = Task::new(action, self.config.max_retries, Arc::downgrade(self));

        let tags = task.action_tags();
        if !tags.is_empty() {
            self.tag(&task, &tags);
        }

        debug!(task = %task.action_name(), "successfully created activity");
        Ok(task)
    }

    pub(crate) fn add(&self, tasks: &[Arc<Task>]) {
        let mut inner = self.lock_inner();

        for task in tasks {
            add_task_locked(&mut inner, task);
            debug!(
                task = %task.action_name(),
                "successfully added activity to the execution queue"
            );
        }
    }

    pub(crate) fn before(&self, task: &Arc<Task>, succeeding: &[Arc<Task>]) -> Result<()> {
        let mut inner = self.lock_inner();
        let vertex = add_task_locked(&mut inner, task);

        for successor in succeeding {
            let succeeding_vertex = add_task_locked(&mut inner, successor);
            if let Err(err) = inner.graph.before(vertex, succeeding_vertex) {
                return Err(map_graph_error(&inner, err));
            }

            debug!(
                task = %task.action_name(),
                before = %successor.action_name(),
                "added ordering constraint to the execution queue"
            );
        }

        Ok(())
    }

    pub(crate) fn after(&self, task: &Arc<Task>, preceding: &[Arc<Task>]) -> Result<()> {
        let mut inner = self.lock_inner();
        let vertex = add_task_locked(&mut inner, task);

        for predecessor in preceding {
            let preceding_vertex = add_task_locked(&mut inner, predecessor);
            if let Err(err) = inner.graph.after(vertex, preceding_vertex) {
                return Err(map_graph_error(&inner, err));
            }

            debug!(
                task = %task.action_name(),
                after = %predecessor.action_name(),
                "added ordering constraint to the execution queue"
            );
        }

        Ok(())
    }

    pub(crate) fn get_action(&self, task: &Arc<Task>) -> Option<Arc<dyn Action>> {
        let inner = self.lock_inner();
        inner.graph.contains(task.id()).then(|| task.action())
    }

    pub(crate) fn remove(&self, task: &Arc<Task>) -> bool {
        let mut inner = self.lock_inner();

        if !inner.graph.contains(task.id()) {
            return false;
        }

        let tags = task.action_tags();
        untag_locked(&mut inner, task, &tags);

        inner.graph.remove_value(task.id());
        inner.tasks.remove(&task.id());

        debug!(task = %task.action_name(), "successfully deleted activity");
        true
    }

    pub(crate) fn tag(&self, task: &Arc<Task>, tags: &[Tag]) {
        let mut inner = self.lock_inner();

        for tag in tags {
            let list = inner.tasks_by_tag.entry(tag.clone()).or_default();
            if !list.iter().any(|t| t.id() == task.id()) {
                list.push(Arc::clone(task));
            }
        }
    }

    pub(crate) fn untag(&self, task: &Arc<Task>, tags: &[Tag]) {
        let mut inner = self.lock_inner();
        untag_locked(&mut inner, task, tags);
    }

    pub(crate) fn get_activities(&self, tagged_only: bool, tags: &[Tag]) -> Vec<Arc<Task>> {
        let inner = self.lock_inner();
        let mut result = Vec::new();

        if tags.is_empty() {
            return result;
        }

        let deps = if tagged_only {
            None
        } else {
            let ids = inner.graph.vertex_ids();
            Some(inner.graph.depends_on(&ids))
        };

        for tag in tags {
            if let Some(tagged) = inner.tasks_by_tag.get(tag) {
                let tagged = tagged.clone();
                add_activities(&mut result, &tagged, deps.as_ref(), &inner);
            }
        }

        result
    }

    pub(crate) fn execute_all(&self, parallel: bool) -> Result<()> {
        let mut inner = self.lock_inner();
        let ids = inner.graph.vertex_ids();
        self.execute_pass(&mut inner, ids, parallel)
    }

    pub(crate) fn execute_filtered(&self, tasks: &[Arc<Task>], parallel: bool) -> Result<()> {
        let mut inner = self.lock_inner();

        let ids: Vec<VertexId> = if tasks.is_empty() {
            inner.graph.vertex_ids()
        } else {
            tasks
                .iter()
                .filter_map(|task| {
                    let vertex = inner.graph.vertex(task.id());
                    if vertex.is_none() {
                        warn!(
                            task = %task.action_name(),
                            "ignoring filtered activity that was never added to the execution queue"
                        );
                    }
                    vertex
                })
                .collect()
        };

        self.execute_pass(&mut inner, ids, parallel)
    }

    pub(crate) fn reset(&self) {
        let mut inner = self.lock_inner();

        debug!(
            size = inner.graph.len(),
            "resetting the activity execution queue"
        );

        inner.graph.clear();
        inner.tasks.clear();
        inner.tasks_by_tag.clear();
    }

    /// Run one execution pass over the selected vertices. Called with the
    /// scheduler lock held for the whole pass; worker jobs only touch data
    /// captured in their execution records, never this lock.
    fn execute_pass(&self, inner: &mut Inner, ids: Vec<VertexId>, parallel: bool) -> Result<()> {
        let names: HashMap<TaskId, String> = inner
            .tasks
            .iter()
            .map(|(id, task)| (*id, task.action_name()))
            .collect();

        if self.config.debug_graph {
            let dot = inner.graph.to_dot(&ids, |id| {
                names.get(&id).cloned().unwrap_or_else(|| format!("activity-{id}"))
            });
            debug!("dependencies between activities:\n\n{dot}\n");
        }

        let dependents = Arc::new(inner.graph.dependents(&ids));

        let sorted = match inner.graph.topo_sort(&ids) {
            Ok(sorted) => sorted,
            Err(err) => return Err(map_graph_error(inner, err)),
        };

        let order: Vec<Arc<Task>> = sorted
            .iter()
            .filter_map(|&vertex| inner.graph.value_of(vertex))
            .filter_map(|id| inner.tasks.get(&id).cloned())
            .collect();

        if order.is_empty() {
            debug!("there are no activities to execute");
            return Ok(());
        }

        let tasks_by_id: Arc<HashMap<TaskId, Arc<Task>>> = Arc::new(
            order.iter().map(|task| (task.id(), Arc::clone(task))).collect(),
        );

        // Tasks that returned DISABLE_ONCE; re-enabled once the pass is over.
        let disabled_once: Arc<Mutex<Vec<Arc<Task>>>> = Arc::new(Mutex::new(Vec::new()));

        let result = if parallel {
            let deps = inner.graph.depends_on(&ids);
            self.run_parallel(&order, deps, dependents, tasks_by_id, &disabled_once)
        } else {
            self.run_sequential(&order, &dependents, &tasks_by_id, &disabled_once)
        };

        let restore = {
            let mut disabled = disabled_once
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *disabled)
        };
        for task in restore {
            task.reenable();
            debug!(task = %task.action_name(), "re-enabled activity after single-pass disable");
        }

        result
    }

    fn run_sequential(
        &self,
        order: &[Arc<Task>],
        dependents: &BTreeMap<TaskId, BTreeSet<TaskId>>,
        tasks: &HashMap<TaskId, Arc<Task>>,
        disabled_once: &Mutex<Vec<Arc<Task>>>,
    ) -> Result<()> {
        let order_names: Vec<String> = order.iter().map(|t| t.action_name()).collect();
        debug!(order = ?order_names, "executing activities sequentially");

        let total = order.len();

        for (i, task) in order.iter().enumerate() {
            debug!(
                index = i + 1,
                total,
                task = %task.action_name(),
                "executing activity"
            );

            let outcome = task.execute()?;
            handle_outcome(task, outcome, dependents, tasks, disabled_once);
        }

        Ok(())
    }

    fn run_parallel(
        &self,
        order: &[Arc<Task>],
        deps: IndexMap<TaskId, BTreeSet<TaskId>>,
        dependents: Arc<BTreeMap<TaskId, BTreeSet<TaskId>>>,
        tasks_by_id: Arc<HashMap<TaskId, Arc<Task>>>,
        disabled_once: &Arc<Mutex<Vec<Arc<Task>>>>,
    ) -> Result<()> {
        let order_ids: Vec<TaskId> = order.iter().map(|t| t.id()).collect();
        let depths = compute_depths(&deps);
        let levels = build_levels(&order_ids, &depths);

        // One barrier latch per task in the pass; jobs await every
        // predecessor's latch before invoking the task.
        let latches: HashMap<TaskId, Arc<Latch>> = order_ids
            .iter()
            .map(|&id| (id, Arc::new(Latch::new())))
            .collect();

        let total = order.len();
        let mut index = 0usize;

        for level in &levels {
            let mut handles: Vec<(Arc<Task>, crate::pool::JobHandle<Result<Outcome>>)> =
                Vec::with_capacity(level.tasks.len());

            for &task_id in &level.tasks {
                index += 1;

                let task = Arc::clone(
                    tasks_by_id
                        .get(&task_id)
                        .expect("level task missing from pass"),
                );

                let record = ExecutionRecord {
                    task: Arc::clone(&task),
                    index,
                    total,
                    latch: Arc::clone(&latches[&task_id]),
                    dep_latches: deps
                        .get(&task_id)
                        .map(|set| {
                            set.iter()
                                .filter_map(|dep| latches.get(dep).cloned())
                                .collect()
                        })
                        .unwrap_or_default(),
                    dependents: Arc::clone(&dependents),
                    tasks: Arc::clone(&tasks_by_id),
                };

                let disabled_once = Arc::clone(disabled_once);
                let handle = self.pool.submit(level.priority, move |token: &CancelToken| {
                    run_job(record, token, &disabled_once)
                });

                handles.push((task, handle));
            }

            // Level-synchronous barrier: every task in the level has opened
            // its latch before results are collected.
            for task_id in &level.tasks {
                latches[task_id].wait();
            }

            let mut pending = handles.into_iter();
            let mut pass_error: Option<Error> = None;

            for (task, handle) in pending.by_ref() {
                match handle.join() {
                    Ok(Ok(_outcome)) => {}
                    Ok(Err(Error::Cancelled)) | Err(JobError::Cancelled) => {
                        pass_error = Some(Error::Cancelled);
                        break;
                    }
                    Ok(Err(err)) => {
                        pass_error = Some(Error::TaskFailed {
                            task: task.action_name(),
                            source: anyhow::Error::new(err),
                        });
                        break;
                    }
                    Err(JobError::Panicked(message)) => {
                        pass_error = Some(Error::TaskFailed {
                            task: task.action_name(),
                            source: anyhow::anyhow!(message),
                        });
                        break;
                    }
                }
            }

            if let Some(err) = pass_error {
                debug!(error = %err, "activity execution failed; cancelling remaining futures");
                for (_task, handle) in pending {
                    handle.cancel();
                }
                return Err(err);
            }
        }

        Ok(())
    }
}

/// Per-task data captured by a parallel worker job.
struct ExecutionRecord {
    task: Arc<Task>,
    /// Position in the execution queue, 1-based, for progress logging.
    index: usize,
    total: usize,
    latch: Arc<Latch>,
    dep_latches: Vec<Arc<Latch>>,
    dependents: Arc<BTreeMap<TaskId, BTreeSet<TaskId>>>,
    tasks: Arc<HashMap<TaskId, Arc<Task>>>,
}

/// Body of one parallel worker job: await every predecessor latch, execute
/// the task, and propagate disables. The job's own latch opens on every exit
/// path.
fn run_job(
    record: ExecutionRecord,
    token: &CancelToken,
    disabled_once: &Mutex<Vec<Arc<Task>>>,
) -> Result<Outcome> {
    let _open = OpenOnDrop(Arc::clone(&record.latch));

    for latch in &record.dep_latches {
        latch.wait();
    }

    if token.is_cancelled() {
        return Err(Error::Cancelled);
    }

    debug!(
        index = record.index,
        total = record.total,
        task = %record.task.action_name(),
        "executing activity"
    );

    let outcome = record.task.execute()?;
    handle_outcome(
        &record.task,
        outcome,
        &record.dependents,
        &record.tasks,
        disabled_once,
    );

    Ok(outcome)
}

/// Apply the post-execution rules: a task whose outcome was `Failure`,
/// `Disable` or `DisableOnce` ends up disabled, and its transitive
/// dependents are disabled with it before any of them gets to run.
fn handle_outcome(
    task: &Arc<Task>,
    outcome: Outcome,
    dependents: &BTreeMap<TaskId, BTreeSet<TaskId>>,
    tasks: &HashMap<TaskId, Arc<Task>>,
    disabled_once: &Mutex<Vec<Arc<Task>>>,
) {
    if !matches!(
        outcome,
        Outcome::Failure | Outcome::Disable | Outcome::DisableOnce
    ) {
        return;
    }

    if outcome == Outcome::Failure {
        warn!(
            task = %task.action_name(),
            "failed to execute activity successfully; disabling all dependent activities"
        );
    }

    if outcome == Outcome::DisableOnce {
        disabled_once
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(task));
    }

    if task.is_enabled() && !task.disable() {
        warn!(
            task = %task.action_name(),
            "could not disable failed activity; leaving its dependents enabled"
        );
        return;
    }

    disable_dependents(task, dependents, tasks);
}

/// Breadth-first walk over the dependents of a disabled task, disabling each
/// one that is still enabled. A dependent that is currently executing cannot
/// be disabled and is left alone; later levels observe `enabled == false`
/// before starting their next task.
fn disable_dependents(
    task: &Arc<Task>,
    dependents: &BTreeMap<TaskId, BTreeSet<TaskId>>,
    tasks: &HashMap<TaskId, Arc<Task>>,
) {
    if task.is_enabled() {
        return;
    }

    let mut queue: VecDeque<Arc<Task>> = VecDeque::from([Arc::clone(task)]);

    while let Some(current) = queue.pop_front() {
        let Some(children) = dependents.get(&current.id()) else {
            continue;
        };

        for child_id in children {
            let Some(child) = tasks.get(child_id) else {
                continue;
            };

            if !child.is_enabled() {
                continue;
            }

            if child.disable() {
                debug!(
                    dependent = %child.action_name(),
                    parent = %current.action_name(),
                    "successfully disabled dependent activity"
                );
                queue.push_back(Arc::clone(child));
            } else {
                debug!(
                    dependent = %child.action_name(),
                    parent = %current.action_name(),
                    "failed to disable dependent activity"
                );
            }
        }
    }
}

fn add_task_locked(inner: &mut Inner, task: &Arc<Task>) -> VertexId {
    inner
        .tasks
        .entry(task.id())
        .or_insert_with(|| Arc::clone(task));
    inner.graph.add_vertex(task.id())
}

fn untag_locked(inner: &mut Inner, task: &Arc<Task>, tags: &[Tag]) {
    for tag in tags {
        if let Some(list) = inner.tasks_by_tag.get_mut(tag) {
            list.retain(|t| t.id() != task.id());
            if list.is_empty() {
                inner.tasks_by_tag.remove(tag);
            }
        }
    }
}

fn task_name(inner: &Inner, id: TaskId) -> String {
    inner
        .tasks
        .get(&id)
        .map(|task| task.action_name())
        .unwrap_or_else(|| format!("activity-{id}"))
}

fn map_graph_error(inner: &Inner, err: GraphError<TaskId>) -> Error {
    match err {
        GraphError::Cycle(id) => Error::CyclicDependencies(format!(
            "\"{}\" still has unresolved predecessors; abandoning execution",
            task_name(inner, id)
        )),
        GraphError::SelfEdge(id) => Error::SelfDependency(task_name(inner, id)),
    }
}

/// Recursively collect activities and, when a depends-on projection is
/// supplied, everything they transitively depend on.
fn add_activities(
    result: &mut Vec<Arc<Task>>,
    to_add: &[Arc<Task>],
    deps: Option<&IndexMap<TaskId, BTreeSet<TaskId>>>,
    inner: &Inner,
) {
    for task in to_add {
        if result.iter().any(|t| t.id() == task.id()) {
            continue;
        }

        result.push(Arc::clone(task));

        if let Some(deps_map) = deps {
            if let Some(parents) = deps_map.get(&task.id()) {
                let parents: Vec<Arc<Task>> = parents
                    .iter()
                    .filter_map(|id| inner.tasks.get(id).cloned())
                    .collect();

                if !parents.is_empty() {
                    add_activities(result, &parents, deps, inner);
                }
            }
        }
    }
}
