//! The scheduler: owns the graph and tag index, exposes the programmatic
//! surface of spec.md §6, and drives sequential and parallel execution
//! passes (spec.md §4.5-4.7).
//!
//! Grounded on the teacher's `DAGSchedulerBase<T>` (`lib/src/scheduler.rs`):
//! a single owning type that holds the graph plus per-run bookkeeping and
//! exposes a handful of orchestration entry points, rather than scattering
//! that state across free functions.
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

use log::debug;

use crate::action::Outcome;
use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::graph::{Dag, VertexId};
use crate::pool::PriorityPool;
use crate::tag::{Tag, TagRegistry};
use crate::task::{TaskHandle, TaskId};

struct SchedulerState {
    dag: Dag,
    tasks: HashMap<TaskId, Arc<TaskHandle>>,
    tag_index: HashMap<Tag, HashSet<TaskId>>,
}

/// Owns the dependency graph and the tasks registered against it.
///
/// All public methods take the scheduler's single internal lock (spec.md
/// §5, "Shared resource policy"); a pass holds it for its entire duration,
/// which both serialises concurrent passes and blocks other mutators until
/// the pass completes — the graph is never mutated mid-pass.
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    tags: TagRegistry,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                dag: Dag::new(),
                tasks: HashMap::new(),
                tag_index: HashMap::new(),
            }),
            tags: TagRegistry::new(),
            config,
        }
    }

    /// Wraps `action` in a task, adds it as a vertex, and returns a shared
    /// handle. Fails `InvalidAction` for an ill-formed action — Rust's type
    /// system already rules out a null action, so "ill-formed" is defined
    /// here as an empty name (DESIGN.md).
    pub fn create(&self, action: Box<dyn crate::action::Action>) -> Result<Arc<TaskHandle>> {
        if action.name().is_empty() {
            return Err(SchedulerError::InvalidAction);
        }
        let handle = Arc::new(TaskHandle::new(action));
        let mut state = self.state.lock().unwrap();
        state.dag.add_vertex(handle.id());
        state.tasks.insert(handle.id(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Registers already-constructed tasks (idempotent per task).
    pub fn add(&self, tasks: impl IntoIterator<Item = Arc<TaskHandle>>) {
        let mut state = self.state.lock().unwrap();
        for task in tasks {
            state.dag.add_vertex(task.id());
            state.tasks.entry(task.id()).or_insert(task);
        }
    }

    /// Creates edges `t -> successor` for every successor.
    pub fn before(&self, t: &Arc<TaskHandle>, successors: impl IntoIterator<Item = Arc<TaskHandle>>) {
        let mut state = self.state.lock().unwrap();
        let v = state.dag.add_vertex(t.id());
        state.tasks.entry(t.id()).or_insert_with(|| Arc::clone(t));
        for s in successors {
            let sv = state.dag.add_vertex(s.id());
            let _ = state.dag.before(v, sv);
            state.tasks.entry(s.id()).or_insert(s);
        }
    }

    /// Creates edges `predecessor -> t` for every predecessor.
    pub fn after(&self, t: &Arc<TaskHandle>, predecessors: impl IntoIterator<Item = Arc<TaskHandle>>) {
        let mut state = self.state.lock().unwrap();
        let v = state.dag.add_vertex(t.id());
        state.tasks.entry(t.id()).or_insert_with(|| Arc::clone(t));
        for p in predecessors {
            let pv = state.dag.add_vertex(p.id());
            let _ = state.dag.before(pv, v);
            state.tasks.entry(p.id()).or_insert(p);
        }
    }

    /// Removes `task`, re-stitching its predecessors to its successors.
    /// Returns whether `task` was a member of the graph.
    pub fn remove(&self, task: &Arc<TaskHandle>) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(v) = state.dag.vertex_of(task.id()) else {
            return false;
        };
        let removed = state.dag.remove_vertex(v);
        if removed {
            state.tasks.remove(&task.id());
            for members in state.tag_index.values_mut() {
                members.remove(&task.id());
            }
        }
        removed
    }

    /// Drops every dependency edge touching `task` while leaving it (and
    /// its tags) registered with the scheduler (spec.md §6,
    /// `Task::removeAllDependencies()`) — distinct from `remove`, which
    /// deletes the task's vertex entirely and re-stitches its neighbours
    /// together.
    pub fn remove_all_dependencies(&self, task: &Arc<TaskHandle>) {
        let mut state = self.state.lock().unwrap();
        if let Some(v) = state.dag.vertex_of(task.id()) {
            state.dag.remove_all_edges(v);
        }
    }

    /// Drains the scheduler back to its initial empty state. Dropping the
    /// maps rather than calling `remove` vertex-by-vertex is the resolved
    /// Open Question (spec.md §9): same externally visible effect, no
    /// pointless re-stitching of edges about to be discarded anyway.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.dag = Dag::new();
        state.tasks.clear();
        state.tag_index.clear();
    }

    pub fn create_tag(&self, name: &str) -> Tag {
        self.tags.create(name)
    }

    pub fn tag(&self, task: &Arc<TaskHandle>, tags: impl IntoIterator<Item = Tag>) {
        let tags: Vec<Tag> = tags.into_iter().collect();
        task.tag(tags.iter().cloned());
        let mut state = self.state.lock().unwrap();
        for t in tags {
            state.tag_index.entry(t).or_default().insert(task.id());
        }
    }

    pub fn untag(&self, task: &Arc<TaskHandle>, tags: impl IntoIterator<Item = Tag>) {
        let tags: Vec<Tag> = tags.into_iter().collect();
        task.untag(tags.iter().cloned());
        let mut state = self.state.lock().unwrap();
        for t in &tags {
            if let Some(members) = state.tag_index.get_mut(t) {
                members.remove(&task.id());
            }
        }
    }

    /// Every task, optionally restricted to tasks carrying at least one of
    /// `tags`.
    pub fn get_activities(&self, tagged_only: bool, tags: &[Tag]) -> Vec<Arc<TaskHandle>> {
        let state = self.state.lock().unwrap();
        if !tagged_only {
            return state.tasks.values().cloned().collect();
        }
        let mut ids: HashSet<TaskId> = HashSet::new();
        if tags.is_empty() {
            ids.extend(state.tag_index.values().flatten().copied());
        } else {
            for t in tags {
                if let Some(members) = state.tag_index.get(t) {
                    ids.extend(members.iter().copied());
                }
            }
        }
        ids.into_iter().filter_map(|id| state.tasks.get(&id).cloned()).collect()
    }

    /// Runs every registered task.
    pub fn execute_all(&self, parallel: bool) -> Result<()> {
        let tasks = {
            let state = self.state.lock().unwrap();
            state.tasks.values().cloned().collect::<Vec<_>>()
        };
        self.run_pass(&tasks, parallel)
    }

    /// Runs only `tasks`, honouring dependency edges whose other endpoint
    /// falls outside this set by ignoring them (spec.md §4.1, filtered
    /// sort).
    pub fn execute_filtered(&self, tasks: &[Arc<TaskHandle>], parallel: bool) -> Result<()> {
        self.run_pass(tasks, parallel)
    }

    /// GraphViz/DOT description of the full dependency graph (spec.md §6).
    pub fn dump_dot(&self) -> String {
        let state = self.state.lock().unwrap();
        self.dump_dot_locked(&state)
    }

    fn dump_dot_locked(&self, state: &SchedulerState) -> String {
        let mut out = String::from("digraph Activities {\n");
        let vertices = state.dag.vertices();
        let successors = state.dag.dependents(&vertices);
        for v in &vertices {
            let id = state.dag.task_of(*v);
            let Some(task) = state.tasks.get(&id) else { continue };
            let from = normalize_dot_name(task.name());
            let Some(targets) = successors.get(&id) else { continue };
            for target_id in targets {
                let Some(target_task) = state.tasks.get(target_id) else { continue };
                out.push_str(&format!(
                    "  {} -> {};\n",
                    from,
                    normalize_dot_name(target_task.name())
                ));
            }
        }
        out.push_str("}\n");
        out
    }

    fn run_pass(&self, tasks: &[Arc<TaskHandle>], parallel: bool) -> Result<()> {
        let state = self.state.lock().unwrap();

        // A task disabled by DISABLE_ONCE in an earlier pass gets one more
        // try now, regardless of whether that earlier pass's filter
        // included it (spec.md §9, DISABLE_ONCE resolution).
        for task in state.tasks.values() {
            task.restore_after_pass();
        }

        if self.config.debug_operations_enabled {
            debug!("pass starting over {} task(s)\n{}", tasks.len(), self.dump_dot_locked(&state));
        }

        let vertices: Vec<VertexId> = tasks
            .iter()
            .map(|t| {
                state
                    .dag
                    .vertex_of(t.id())
                    .unwrap_or_else(|| panic!("task {:?} is not registered with this scheduler", t.id()))
            })
            .collect();

        let order = state
            .dag
            .topo_sort(&vertices)
            .map_err(|e| SchedulerError::CyclicDependencies { task_id: e.offending })?;

        // Dependents used by disable propagation span the whole graph, not
        // just this pass's filter: a task that fails can disable
        // dependents outside the current filter too.
        let all_vertices = state.dag.vertices();
        let dependents_map = state.dag.dependents(&all_vertices);

        if !parallel {
            for v in &order {
                let id = state.dag.task_of(*v);
                let Some(task) = state.tasks.get(&id) else { continue };
                let was_enabled = task.is_enabled();
                let outcome = task.execute(&self.config);
                if was_enabled
                    && matches!(outcome, Outcome::Failure | Outcome::Disable | Outcome::DisableOnce)
                    && !task.is_enabled()
                {
                    propagate_disable(id, &dependents_map, &state.tasks);
                }
            }
            return Ok(());
        }

        let vs_set: HashSet<VertexId> = vertices.iter().copied().collect();
        let mut depth: HashMap<VertexId, usize> = HashMap::with_capacity(order.len());
        for &v in &order {
            let preds = state.dag.predecessors_within(v, &vs_set);
            let d = preds.iter().filter_map(|p| depth.get(p)).copied().max().map(|m| m + 1).unwrap_or(0);
            depth.insert(v, d);
        }
        let max_depth = depth.values().copied().max().unwrap_or(0);

        let mut levels: BTreeMap<usize, Vec<VertexId>> = BTreeMap::new();
        for &v in &order {
            levels.entry(depth[&v]).or_default().push(v);
        }

        let preds_by_task: HashMap<TaskId, Vec<TaskId>> = order
            .iter()
            .map(|&v| {
                let id = state.dag.task_of(v);
                let preds = state
                    .dag
                    .predecessors_within(v, &vs_set)
                    .into_iter()
                    .map(|p| state.dag.task_of(p))
                    .collect();
                (id, preds)
            })
            .collect();

        let latches: HashMap<TaskId, Arc<Latch>> = order
            .iter()
            .map(|&v| (state.dag.task_of(v), Arc::new(Latch::new())))
            .collect();

        let tasks_snapshot: Arc<HashMap<TaskId, Arc<TaskHandle>>> = Arc::new(state.tasks.clone());
        let dependents_snapshot: Arc<HashMap<TaskId, HashSet<TaskId>>> = Arc::new(dependents_map);

        let pool = PriorityPool::new(self.config.max_activity_pool_size);
        let mut first_error: Option<SchedulerError> = None;

        'levels: for (&level_depth, verts) in &levels {
            let priority = (max_depth - level_depth) as i64;
            let mut handles = Vec::with_capacity(verts.len());

            for &v in verts {
                let task_id = state.dag.task_of(v);
                let Some(task) = tasks_snapshot.get(&task_id).cloned() else {
                    continue;
                };
                let my_latch = Arc::clone(&latches[&task_id]);
                let pred_latches: Vec<Arc<Latch>> = preds_by_task
                    .get(&task_id)
                    .map(|preds| preds.iter().map(|id| Arc::clone(&latches[id])).collect())
                    .unwrap_or_default();
                let dependents_snapshot = Arc::clone(&dependents_snapshot);
                let tasks_snapshot = Arc::clone(&tasks_snapshot);
                let config = self.config;

                // The latch is opened in a guaranteed-release block (via
                // `LatchGuard`'s `Drop`) so a panic unwinding through
                // `task.execute` still releases successors waiting on it,
                // even though the panic itself is caught one layer up by the
                // pool and reported as `TaskFailed` (spec.md §4.5 step 6b,
                // §7).
                let handle = pool.submit(priority, move || {
                    let _release = LatchGuard(&my_latch);
                    for pl in &pred_latches {
                        pl.wait();
                    }
                    let was_enabled = task.is_enabled();
                    let outcome = task.execute(&config);
                    if was_enabled
                        && matches!(outcome, Outcome::Failure | Outcome::Disable | Outcome::DisableOnce)
                        && !task.is_enabled()
                    {
                        propagate_disable(task.id(), &dependents_snapshot, &tasks_snapshot);
                    }
                });
                handles.push((task_id, handle));
            }

            // Collect in submission order; on the first error, cancel every
            // handle still outstanding in this level (spec.md §4.5 step 6d)
            // rather than waiting for it to run.
            for (task_id, h) in handles {
                if first_error.is_some() {
                    h.cancel();
                    continue;
                }
                match h.join() {
                    Some(Ok(())) => {}
                    Some(Err(message)) => {
                        first_error = Some(SchedulerError::TaskFailed {
                            task_id,
                            source: message.into(),
                        });
                    }
                    None => {
                        first_error = Some(SchedulerError::Cancelled);
                    }
                }
            }
            if first_error.is_some() {
                break 'levels;
            }
        }

        pool.shutdown();

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A one-shot completion signal awaited by a task's successors in the
/// current pass (spec.md §9, "Concurrency primitives").
struct Latch {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn open(&self) {
        *self.done.lock().unwrap() = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock().unwrap();
        while !*done {
            done = self.cond.wait(done).unwrap();
        }
    }
}

/// Opens its latch on drop, including on an unwinding panic, so a task that
/// panics mid-`perform` still releases successors blocked on its completion.
struct LatchGuard<'a>(&'a Latch);

impl Drop for LatchGuard<'_> {
    fn drop(&mut self) {
        self.0.open();
    }
}

/// Breadth-first walk of `start`'s dependents, disabling each reachable one
/// that is still enabled and recursing only where the disable actually
/// took effect (spec.md §4.7).
fn propagate_disable(
    start: TaskId,
    dependents: &HashMap<TaskId, HashSet<TaskId>>,
    tasks: &HashMap<TaskId, Arc<TaskHandle>>,
) {
    let mut queue: VecDeque<TaskId> = VecDeque::new();
    queue.push_back(start);
    while let Some(id) = queue.pop_front() {
        let Some(direct) = dependents.get(&id) else { continue };
        for &dependent in direct {
            let Some(handle) = tasks.get(&dependent) else { continue };
            if handle.is_enabled() && handle.disable() {
                queue.push_back(dependent);
            }
        }
    }
}

fn normalize_dot_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_separator = false;
    for c in name.chars() {
        if c.is_alphanumeric() || c == '_' {
            out.push(c);
            last_was_separator = false;
        } else if !last_was_separator {
            out.push('_');
            last_was_separator = true;
        }
    }
    out
}
