//! The DAG model (spec.md §3, §4.1).
//!
//! Vertices are addressed by `petgraph::stable_graph::NodeIndex`, which
//! (unlike a plain `petgraph::Graph`) stays valid across `remove_node` calls
//! — the stable-identifier arena design note 9 asks for, gotten for free by
//! picking the right petgraph graph type instead of hand-rolling one.
use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use petgraph::Direction::{Incoming, Outgoing};

use crate::task::TaskId;

pub type VertexId = petgraph::stable_graph::NodeIndex;

/// Attempted to create a self-edge via `before`/`after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfEdgeError;

/// Topological sort found a cycle restricted to the requested vertex set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleError {
    pub offending: TaskId,
}

/// Vertex/edge store backing the scheduler: add/remove edges, topological
/// sort, and dependent/dependency projections.
#[derive(Default)]
pub struct Dag {
    graph: StableDiGraph<TaskId, ()>,
    index: HashMap<TaskId, VertexId>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: returns the existing vertex if one is already mapped to
    /// `task`.
    pub fn add_vertex(&mut self, task: TaskId) -> VertexId {
        if let Some(&v) = self.index.get(&task) {
            return v;
        }
        let v = self.graph.add_node(task);
        self.index.insert(task, v);
        v
    }

    pub fn vertex_of(&self, task: TaskId) -> Option<VertexId> {
        self.index.get(&task).copied()
    }

    pub fn task_of(&self, v: VertexId) -> TaskId {
        self.graph[v]
    }

    pub fn contains(&self, v: VertexId) -> bool {
        self.graph.node_weight(v).is_some()
    }

    /// The source's `doesEdgeExists` also treats a vertex as connected to
    /// itself, short-circuiting the self-comparison during re-stitching so
    /// `removeVertex` never creates a self-loop (spec.md §9, Open Questions).
    fn edge_exists(&self, a: VertexId, b: VertexId) -> bool {
        a == b || self.graph.find_edge(a, b).is_some() || self.graph.find_edge(b, a).is_some()
    }

    /// Creates an edge `u -> v`. Self-edges fail. Calling this (or `after`)
    /// again for the same direction is a no-op, so `before(t, s);
    /// after(s, t)` is idempotent (spec.md §8).
    pub fn before(&mut self, u: VertexId, v: VertexId) -> Result<(), SelfEdgeError> {
        if u == v {
            return Err(SelfEdgeError);
        }
        if self.graph.find_edge(u, v).is_none() {
            self.graph.add_edge(u, v, ());
        }
        Ok(())
    }

    /// Equivalent to `before(v, u)`.
    pub fn after(&mut self, u: VertexId, v: VertexId) -> Result<(), SelfEdgeError> {
        self.before(v, u)
    }

    /// Removes `u` and re-stitches edges so that, for every predecessor `p`
    /// and every successor `s` of `u`, an edge `p -> s` is added iff no edge
    /// already exists between `p` and `s` in either direction. Returns
    /// `true` on success, `false` if `u` was not a vertex of this graph
    /// (the source always returns a fixed constant here; spec.md §9 directs
    /// implementers to return the real success/failure instead).
    pub fn remove_vertex(&mut self, u: VertexId) -> bool {
        if self.graph.node_weight(u).is_none() {
            return false;
        }
        let task = self.graph[u];
        let preds: Vec<VertexId> = self.graph.neighbors_directed(u, Incoming).collect();
        let sucs: Vec<VertexId> = self.graph.neighbors_directed(u, Outgoing).collect();

        self.graph.remove_node(u);
        self.index.remove(&task);

        for &p in &preds {
            for &s in &sucs {
                if !self.edge_exists(p, s) {
                    self.graph.add_edge(p, s, ());
                }
            }
        }
        true
    }

    /// Drops every incoming and outgoing edge of `u`, leaving the vertex
    /// itself in the graph (spec.md §6, `Task::removeAllDependencies()`) —
    /// distinct from `remove_vertex`, which deletes the vertex and
    /// re-stitches its neighbours together.
    pub fn remove_all_edges(&mut self, u: VertexId) {
        let incoming: Vec<_> = self.graph.edges_directed(u, Incoming).map(|e| e.id()).collect();
        let outgoing: Vec<_> = self.graph.edges_directed(u, Outgoing).map(|e| e.id()).collect();
        for e in incoming.into_iter().chain(outgoing) {
            self.graph.remove_edge(e);
        }
    }

    /// All vertices currently in the graph.
    pub fn vertices(&self) -> Vec<VertexId> {
        self.graph.node_indices().collect()
    }

    /// Direct predecessors of `v` that are also members of `within`. Used by
    /// the scheduler's depth computation, which must only count
    /// dependencies inside the selected task list (spec.md §4.1, "Rationale
    /// for filtered sort").
    pub fn predecessors_within(&self, v: VertexId, within: &HashSet<VertexId>) -> Vec<VertexId> {
        self.graph
            .neighbors_directed(v, Incoming)
            .filter(|p| within.contains(p))
            .collect()
    }

    /// Direct successors only.
    pub fn dependents(&self, vs: &[VertexId]) -> HashMap<TaskId, HashSet<TaskId>> {
        vs.iter()
            .map(|&v| {
                let task = self.graph[v];
                let succs = self
                    .graph
                    .neighbors_directed(v, Outgoing)
                    .map(|n| self.graph[n])
                    .collect();
                (task, succs)
            })
            .collect()
    }

    /// Ordered by ascending predecessor count, stable by task identity on
    /// ties; seeds the depth computation of spec.md §4.5.
    pub fn depends_on(&self, vs: &[VertexId]) -> Vec<(TaskId, HashSet<TaskId>)> {
        let mut result: Vec<(TaskId, HashSet<TaskId>)> = vs
            .iter()
            .map(|&v| {
                let task = self.graph[v];
                let preds = self
                    .graph
                    .neighbors_directed(v, Incoming)
                    .map(|n| self.graph[n])
                    .collect();
                (task, preds)
            })
            .collect();
        result.sort_by(|a, b| a.1.len().cmp(&b.1.len()).then_with(|| a.0.cmp(&b.0)));
        result
    }

    /// Kahn's algorithm restricted to `vs`. Edges whose other endpoint is
    /// outside `vs` are ignored for the zero-in-degree test (filtered-sort
    /// rationale, spec.md §4.1). Never mutates the graph — in-degrees are
    /// tracked in a transient counter rather than per-edge "removed" flags,
    /// which is externally equivalent to the source's flag-and-restore
    /// scheme and is recorded as an Open Question resolution in DESIGN.md.
    pub fn topo_sort(&self, vs: &[VertexId]) -> Result<Vec<VertexId>, CycleError> {
        let set: HashSet<VertexId> = vs.iter().copied().collect();
        let mut indegree: HashMap<VertexId, usize> = HashMap::with_capacity(vs.len());
        for &v in vs {
            let deg = self
                .graph
                .neighbors_directed(v, Incoming)
                .filter(|p| set.contains(p))
                .count();
            indegree.insert(v, deg);
        }

        let mut ready: Vec<VertexId> = indegree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&v, _)| v)
            .collect();
        ready.sort_by_key(|v| v.index());
        let mut queue: VecDeque<VertexId> = ready.into_iter().collect();

        let mut order = Vec::with_capacity(vs.len());
        while let Some(v) = queue.pop_front() {
            order.push(v);
            let mut newly_ready: Vec<VertexId> = Vec::new();
            for s in self.graph.neighbors_directed(v, Outgoing) {
                if let Some(d) = indegree.get_mut(&s) {
                    *d -= 1;
                    if *d == 0 {
                        newly_ready.push(s);
                    }
                }
            }
            newly_ready.sort_by_key(|v| v.index());
            queue.extend(newly_ready);
        }

        if order.len() != vs.len() {
            let offending = vs
                .iter()
                .find(|v| indegree.get(v).copied().unwrap_or(0) > 0)
                .copied()
                .expect("cycle detected but no offending vertex found");
            return Err(CycleError {
                offending: self.graph[offending],
            });
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_task() -> TaskId {
        use crate::action::{Action, Outcome};
        struct Noop;
        impl Action for Noop {
            fn perform(&self) -> Outcome {
                Outcome::Success
            }
            fn name(&self) -> &str {
                "noop"
            }
        }
        crate::task::TaskHandle::new(Box::new(Noop)).id()
    }

    #[test]
    fn test_add_vertex_idempotent() {
        let mut dag = Dag::new();
        let t = make_task();
        let v1 = dag.add_vertex(t);
        let v2 = dag.add_vertex(t);
        assert_eq!(v1, v2);
    }

    #[test]
    fn test_before_rejects_self_edge() {
        let mut dag = Dag::new();
        let v = dag.add_vertex(make_task());
        assert_eq!(dag.before(v, v), Err(SelfEdgeError));
    }

    #[test]
    fn test_before_after_idempotent() {
        let mut dag = Dag::new();
        let a = dag.add_vertex(make_task());
        let b = dag.add_vertex(make_task());
        dag.before(a, b).unwrap();
        dag.after(b, a).unwrap();
        let order = dag.topo_sort(&[a, b]).unwrap();
        assert_eq!(order, vec![a, b]);
    }

    #[test]
    fn test_topo_sort_linear_chain() {
        let mut dag = Dag::new();
        let a = dag.add_vertex(make_task());
        let b = dag.add_vertex(make_task());
        let c = dag.add_vertex(make_task());
        dag.before(a, b).unwrap();
        dag.before(b, c).unwrap();
        let order = dag.topo_sort(&[a, b, c]).unwrap();
        assert_eq!(order, vec![a, b, c]);
    }

    #[test]
    fn test_topo_sort_detects_cycle() {
        let mut dag = Dag::new();
        let a = dag.add_vertex(make_task());
        let b = dag.add_vertex(make_task());
        let c = dag.add_vertex(make_task());
        dag.before(a, b).unwrap();
        dag.before(b, c).unwrap();
        dag.before(c, a).unwrap();
        assert!(dag.topo_sort(&[a, b, c]).is_err());
    }

    #[test]
    fn test_topo_sort_filtered_ignores_outside_edges() {
        let mut dag = Dag::new();
        let a = dag.add_vertex(make_task());
        let b = dag.add_vertex(make_task());
        let c = dag.add_vertex(make_task());
        dag.before(a, b).unwrap();
        dag.before(b, c).unwrap();
        // Filtering out `a` should let `b` run first since its only
        // predecessor is outside the filter set.
        let order = dag.topo_sort(&[b, c]).unwrap();
        assert_eq!(order, vec![b, c]);
    }

    #[test]
    fn test_remove_vertex_restitches_edges() {
        let mut dag = Dag::new();
        let a = dag.add_vertex(make_task());
        let b = dag.add_vertex(make_task());
        let c = dag.add_vertex(make_task());
        dag.before(a, b).unwrap();
        dag.before(b, c).unwrap();

        assert!(dag.remove_vertex(b));
        assert!(!dag.contains(b));
        let order = dag.topo_sort(&[a, c]).unwrap();
        assert_eq!(order, vec![a, c]);
    }

    #[test]
    fn test_remove_all_edges_keeps_vertex_clears_edges() {
        let mut dag = Dag::new();
        let a = dag.add_vertex(make_task());
        let b = dag.add_vertex(make_task());
        let c = dag.add_vertex(make_task());
        dag.before(a, b).unwrap();
        dag.before(b, c).unwrap();

        dag.remove_all_edges(b);

        assert!(dag.contains(b));
        // b has no edges left in either direction; a and c are untouched
        // and unconnected to each other (no re-stitching, unlike removeVertex).
        assert_eq!(dag.graph.edges_connecting(a, b).count(), 0);
        assert_eq!(dag.graph.edges_connecting(b, c).count(), 0);
        assert_eq!(dag.graph.edges_connecting(a, c).count(), 0);
        let order = dag.topo_sort(&[a, b, c]).unwrap();
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn test_remove_vertex_unknown_returns_false() {
        let mut dag = Dag::new();
        let a = dag.add_vertex(make_task());
        dag.remove_vertex(a);
        assert!(!dag.remove_vertex(a));
    }

    #[test]
    fn test_remove_vertex_does_not_duplicate_existing_edge() {
        let mut dag = Dag::new();
        let a = dag.add_vertex(make_task());
        let b = dag.add_vertex(make_task());
        let c = dag.add_vertex(make_task());
        dag.before(a, b).unwrap();
        dag.before(b, c).unwrap();
        dag.before(a, c).unwrap(); // already connected directly

        dag.remove_vertex(b);
        // No duplicate a->c edge should have been created.
        assert_eq!(
            dag.graph
                .edges_connecting(a, c)
                .count(),
            1
        );
    }

    #[test]
    fn test_dependents_direct_successors_only() {
        let mut dag = Dag::new();
        let a = dag.add_vertex(make_task());
        let b = dag.add_vertex(make_task());
        let c = dag.add_vertex(make_task());
        dag.before(a, b).unwrap();
        dag.before(b, c).unwrap();
        let deps = dag.dependents(&[a]);
        let a_task = dag.task_of(a);
        assert_eq!(deps[&a_task].len(), 1);
        assert!(deps[&a_task].contains(&dag.task_of(b)));
    }

    #[test]
    fn test_depends_on_ordered_by_predecessor_count() {
        let mut dag = Dag::new();
        let a = dag.add_vertex(make_task());
        let b = dag.add_vertex(make_task());
        let c = dag.add_vertex(make_task());
        dag.before(a, c).unwrap();
        dag.before(b, c).unwrap();
        let deps = dag.depends_on(&[a, b, c]);
        // a and b have 0 predecessors, c has 2; c must be ordered last.
        assert_eq!(deps.last().unwrap().0, dag.task_of(c));
    }
}
