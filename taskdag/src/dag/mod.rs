// src/dag/mod.rs

mod graph;

pub use graph::{Graph, GraphError, VertexId};
