//! Attribute decomposition
//!
//! Turns arbitrary [`Value`]s, including cyclic graphs of containers and
//! objects, into a [`DecomposedGraph`] built only from primitives, strings,
//! timestamps and generic records.

pub mod graph;
pub mod reflective;

pub use graph::{Decomposed, DecomposedAttribute, DecomposedGraph, Node, NodeId};
pub use reflective::ReflectiveDecomposer;

use crate::attributes::Value;

/// Flattens attribute values into a transport-safe form
pub trait Decomposer: Send + Sync {
    /// Must terminate on cyclic input; failures are recorded in the graph
    fn decompose(&self, value: &Value) -> DecomposedGraph;
}
