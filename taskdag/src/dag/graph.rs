// src/dag/graph.rs

//! Arena-based directed acyclic graph.
//!
//! Vertices and edges live in id-indexed arenas instead of referencing each
//! other directly, which sidesteps the reference cycles a vertex ↔ edge ↔
//! vertex object graph would otherwise create. Ids are handed out
//! monotonically and never reused, so iterating the vertex arena always
//! yields insertion order.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use thiserror::Error;

/// Stable handle to a vertex in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct EdgeId(u64);

#[derive(Debug, Error)]
pub enum GraphError<V: fmt::Debug> {
    /// A cycle was detected; carries one offending vertex.
    #[error("a cycle has been detected in the vertex dependencies at {0:?}; a complete topological sort is not possible")]
    Cycle(V),

    /// A vertex was ordered before or after itself.
    #[error("a vertex cannot be before or after itself: {0:?}")]
    SelfEdge(V),
}

#[derive(Debug)]
struct Vertex<V> {
    value: V,
    /// Edges from preceding vertices (incoming).
    preceding: Vec<EdgeId>,
    /// Edges to succeeding vertices (outgoing).
    succeeding: Vec<EdgeId>,
}

#[derive(Debug)]
struct Edge {
    source: VertexId,
    destination: VertexId,
    /// Transient mark used by [`Graph::topo_sort`]; always false between
    /// calls.
    removed: bool,
}

/// Vertex/edge store with dependency projections and topological sorting.
///
/// `V` is the payload identity stored per vertex; [`Graph::add_vertex`] is
/// idempotent per payload value.
#[derive(Debug, Default)]
pub struct Graph<V> {
    vertices: BTreeMap<VertexId, Vertex<V>>,
    edges: BTreeMap<EdgeId, Edge>,
    by_value: HashMap<V, VertexId>,
    next_vertex: u64,
    next_edge: u64,
}

impl<V> Graph<V>
where
    V: Copy + Eq + Ord + Hash + fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            vertices: BTreeMap::new(),
            edges: BTreeMap::new(),
            by_value: HashMap::new(),
            next_vertex: 0,
            next_edge: 0,
        }
    }

    /// Add a vertex for `value`, or return the existing one.
    pub fn add_vertex(&mut self, value: V) -> VertexId {
        if let Some(&id) = self.by_value.get(&value) {
            return id;
        }

        let id = VertexId(self.next_vertex);
        self.next_vertex += 1;
        self.vertices.insert(
            id,
            Vertex {
                value,
                preceding: Vec::new(),
                succeeding: Vec::new(),
            },
        );
        self.by_value.insert(value, id);
        id
    }

    /// The vertex holding `value`, if any.
    pub fn vertex(&self, value: V) -> Option<VertexId> {
        self.by_value.get(&value).copied()
    }

    pub fn contains(&self, value: V) -> bool {
        self.by_value.contains_key(&value)
    }

    /// The payload of a vertex.
    pub fn value_of(&self, id: VertexId) -> Option<V> {
        self.vertices.get(&id).map(|v| v.value)
    }

    /// All vertex ids, in insertion order.
    pub fn vertex_ids(&self) -> Vec<VertexId> {
        self.vertices.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Create an edge so that `vertex` comes before `succeeding`.
    ///
    /// Duplicate edges in the same direction are permitted; self-edges fail.
    pub fn before(&mut self, vertex: VertexId, succeeding: VertexId) -> Result<(), GraphError<V>> {
        if vertex == succeeding {
            let value = self.value_of(vertex).expect("vertex not in graph");
            return Err(GraphError::SelfEdge(value));
        }

        self.insert_edge(vertex, succeeding);
        Ok(())
    }

    /// Create an edge so that `vertex` comes after `preceding`.
    pub fn after(&mut self, vertex: VertexId, preceding: VertexId) -> Result<(), GraphError<V>> {
        self.before(preceding, vertex)
    }

    fn insert_edge(&mut self, source: VertexId, destination: VertexId) {
        let id = EdgeId(self.next_edge);
        self.next_edge += 1;
        self.edges.insert(
            id,
            Edge {
                source,
                destination,
                removed: false,
            },
        );
        self.vertex_mut(source).succeeding.push(id);
        self.vertex_mut(destination).preceding.push(id);
    }

    fn vertex_mut(&mut self, id: VertexId) -> &mut Vertex<V> {
        self.vertices.get_mut(&id).expect("vertex not in graph")
    }

    /// True if an edge connects the two vertices, in either role, in either
    /// list. Identical vertices count as connected, which short-circuits
    /// self-comparison during [`Graph::remove_vertex`] re-stitching.
    fn edge_exists(&self, a: VertexId, b: VertexId) -> bool {
        if a == b {
            return true;
        }

        if let Some(va) = self.vertices.get(&a) {
            for eid in &va.succeeding {
                let edge = &self.edges[eid];
                if edge.destination == b || edge.source == b {
                    return true;
                }
            }
        }

        if let Some(vb) = self.vertices.get(&b) {
            for eid in &vb.preceding {
                let edge = &self.edges[eid];
                if edge.source == a || edge.destination == a {
                    return true;
                }
            }
        }

        false
    }

    /// Remove the vertex holding `value`. Returns false if it was not present.
    pub fn remove_value(&mut self, value: V) -> bool {
        match self.vertex(value) {
            Some(id) => {
                self.remove_vertex(id);
                true
            }
            None => false,
        }
    }

    /// Remove a vertex while preserving ordering constraints between its
    /// neighbours: every preceding vertex is linked to every succeeding
    /// vertex, unless an edge between the two already exists in either
    /// direction.
    pub fn remove_vertex(&mut self, id: VertexId) {
        let Some(vertex) = self.vertices.get(&id) else {
            return;
        };

        let succeeding = vertex.succeeding.clone();
        let preceding = vertex.preceding.clone();

        // Link all parents of this vertex to its children.
        for &out_edge in &succeeding {
            let child = self.edges[&out_edge].destination;
            self.vertex_mut(child).preceding.retain(|e| *e != out_edge);

            for &in_edge in &preceding {
                let parent = self.edges[&in_edge].source;
                self.vertex_mut(parent).succeeding.retain(|e| *e != in_edge);

                if !self.edge_exists(parent, child) && !self.edge_exists(child, parent) {
                    self.insert_edge(parent, child);
                }
            }
        }

        // If there were no children, the parents still hold edges to this
        // vertex.
        for &in_edge in &preceding {
            let parent = self.edges[&in_edge].source;
            self.vertex_mut(parent).succeeding.retain(|e| *e != in_edge);
        }

        for edge in succeeding.iter().chain(preceding.iter()) {
            self.edges.remove(edge);
        }

        let vertex = self.vertices.remove(&id).expect("vertex disappeared");
        self.by_value.remove(&vertex.value);
    }

    /// Direct successors of each queried vertex, restricted to the queried
    /// set.
    pub fn dependents(&self, ids: &[VertexId]) -> BTreeMap<V, BTreeSet<V>> {
        let filter: HashSet<VertexId> = ids.iter().copied().collect();
        let mut map = BTreeMap::new();

        for &id in ids {
            let Some(vertex) = self.vertices.get(&id) else {
                continue;
            };

            let mut set = BTreeSet::new();
            for eid in &vertex.succeeding {
                let destination = self.edges[eid].destination;
                if filter.contains(&destination) {
                    if let Some(value) = self.value_of(destination) {
                        set.insert(value);
                    }
                }
            }

            map.insert(vertex.value, set);
        }

        map
    }

    /// Direct predecessors of each queried vertex, restricted to the queried
    /// set. Keys are ordered by ascending predecessor count, stable on ties.
    pub fn depends_on(&self, ids: &[VertexId]) -> IndexMap<V, BTreeSet<V>> {
        let filter: HashSet<VertexId> = ids.iter().copied().collect();

        let mut ordered: Vec<VertexId> = ids
            .iter()
            .copied()
            .filter(|id| self.vertices.contains_key(id))
            .collect();
        ordered.sort_by_key(|id| {
            self.vertices[id]
                .preceding
                .iter()
                .filter(|eid| filter.contains(&self.edges[*eid].source))
                .count()
        });

        let mut map = IndexMap::with_capacity(ordered.len());

        for id in ordered {
            let vertex = &self.vertices[&id];

            let mut set = BTreeSet::new();
            for eid in &vertex.preceding {
                let source = self.edges[eid].source;
                if filter.contains(&source) {
                    if let Some(value) = self.value_of(source) {
                        set.insert(value);
                    }
                }
            }

            map.insert(vertex.value, set);
        }

        map
    }

    /// Topologically sort the queried vertices using Kahn's algorithm.
    ///
    /// Edges whose other endpoint lies outside the queried set are ignored,
    /// so an arbitrary subgraph can be sorted in isolation. Edge removed
    /// marks are transient: they are cleared again before returning, on both
    /// the success and the failure path, leaving the graph reusable.
    pub fn topo_sort(&mut self, ids: &[VertexId]) -> Result<Vec<VertexId>, GraphError<V>> {
        let filter: HashSet<VertexId> = ids.iter().copied().collect();

        let mut independent: VecDeque<VertexId> = ids
            .iter()
            .copied()
            .filter(|&id| self.live_in_degree(id, &filter) == 0)
            .collect();

        let mut sorted = Vec::with_capacity(ids.len());

        while let Some(id) = independent.pop_front() {
            sorted.push(id);

            let succeeding = self.vertices[&id].succeeding.clone();
            for eid in succeeding {
                let destination = {
                    let edge = self.edges.get_mut(&eid).expect("edge disappeared");
                    edge.removed = true;
                    edge.destination
                };

                // Only tinker with vertices the caller is interested in.
                if filter.contains(&destination)
                    && self.live_in_degree(destination, &filter) == 0
                {
                    independent.push_back(destination);
                }
            }
        }

        // Any surviving in-filter predecessor edge means a cycle.
        let offending = ids
            .iter()
            .copied()
            .find(|&id| self.live_in_degree(id, &filter) > 0);

        // Reset removed marks so the graph can be sorted again.
        for &id in ids {
            let Some(vertex) = self.vertices.get(&id) else {
                continue;
            };
            let edges: Vec<EdgeId> = vertex
                .preceding
                .iter()
                .chain(vertex.succeeding.iter())
                .copied()
                .collect();
            for eid in edges {
                if let Some(edge) = self.edges.get_mut(&eid) {
                    edge.removed = false;
                }
            }
        }

        match offending {
            Some(id) => {
                let value = self.value_of(id).expect("vertex not in graph");
                Err(GraphError::Cycle(value))
            }
            None => Ok(sorted),
        }
    }

    fn live_in_degree(&self, id: VertexId, filter: &HashSet<VertexId>) -> usize {
        self.vertices[&id]
            .preceding
            .iter()
            .filter(|eid| {
                let edge = &self.edges[*eid];
                !edge.removed && filter.contains(&edge.source)
            })
            .count()
    }

    /// Drop all vertices and edges.
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.edges.clear();
        self.by_value.clear();
    }

    /// Render the queried subgraph as a GraphViz DOT digraph.
    ///
    /// Vertex names are produced by `name_of` and normalised by replacing any
    /// run of non-word characters with `_`.
    pub fn to_dot(&self, ids: &[VertexId], name_of: impl Fn(V) -> String) -> String {
        if ids.is_empty() {
            return "Cannot generate GraphViz output in DOT language because there are no vertices."
                .to_string();
        }

        let dependents = self.dependents(ids);
        let mut out = String::from("digraph Activities {");
        out.push_str("\nsize = \"50,50\";");

        for &id in ids {
            let Some(value) = self.value_of(id) else {
                continue;
            };
            let name = normalize_vertex_name(&name_of(value));
            let successors: Vec<String> = dependents
                .get(&value)
                .map(|set| set.iter().map(|&v| normalize_vertex_name(&name_of(v))).collect())
                .unwrap_or_default();

            out.push_str("\n\t");
            out.push_str(&name);

            match successors.len() {
                0 => out.push(';'),
                1 => {
                    out.push_str(" -> ");
                    out.push_str(&successors[0]);
                    out.push(';');
                }
                _ => {
                    out.push_str(" -> {");
                    for successor in &successors {
                        out.push_str(successor);
                        out.push_str(" ; ");
                    }
                    out.push('}');
                }
            }
        }

        out.push_str("\n}");
        out
    }
}

fn normalize_vertex_name(name: &str) -> String {
    static NON_WORD: OnceLock<Regex> = OnceLock::new();

    if name.is_empty() {
        return "unknown".to_string();
    }

    NON_WORD
        .get_or_init(|| Regex::new(r"\W+").expect("static pattern"))
        .replace_all(name, "_")
        .into_owned()
}
