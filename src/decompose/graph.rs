use crate::attributes::Timestamp;
use crate::error::DecomposeError;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Index of a node in a [`DecomposedGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// Transport-safe leaf, or a reference to a container node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Decomposed {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(Timestamp),
    Attribute(Box<DecomposedAttribute>),
    Ref(NodeId),
}

/// Attribute holder with its decomposed value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecomposedAttribute {
    pub value: Decomposed,
    pub locked: bool,
    pub serializable: bool,
}

/// Container produced by decomposition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    List { items: Vec<Decomposed> },
    Set { items: Vec<Decomposed> },
    Map { entries: BTreeMap<String, Decomposed> },
    Array { items: Vec<Decomposed> },
    /// Generic keyed record built from an object's properties
    Record {
        type_name: String,
        fields: BTreeMap<String, Decomposed>,
    },
}

/// Result of decomposing one value
///
/// Containers live in an arena and are referenced by [`NodeId`], so cycles in
/// the input become index cycles here. Each call produces its own graph.
#[derive(Debug, Clone, Serialize)]
pub struct DecomposedGraph {
    root: Decomposed,
    nodes: Vec<Node>,
    #[serde(skip)]
    failures: Vec<DecomposeError>,
}

impl DecomposedGraph {
    pub(crate) fn new(root: Decomposed, nodes: Vec<Node>, failures: Vec<DecomposeError>) -> Self {
        Self {
            root,
            nodes,
            failures,
        }
    }

    pub fn root(&self) -> &Decomposed {
        &self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Node referenced by the root, if the root is a container
    pub fn root_node(&self) -> Option<&Node> {
        match &self.root {
            Decomposed::Ref(id) => self.node(*id),
            _ => None,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[cfg(test)]
    pub(crate) fn nodes_mut(&mut self) -> &mut Vec<Node> {
        &mut self.nodes
    }

    /// Property and inspection failures met while decomposing
    pub fn failures(&self) -> &[DecomposeError] {
        &self.failures
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    /// Content equality between two graphs, treating revisited reference pairs as equal
    pub fn same_content(&self, other: &DecomposedGraph) -> bool {
        self.same_value(&self.root, other, &other.root)
    }

    /// Content equality of `a` in this graph and `b` in `other`
    pub fn same_value(&self, a: &Decomposed, other: &DecomposedGraph, b: &Decomposed) -> bool {
        let mut seen = HashSet::new();
        Comparison {
            left: self,
            right: other,
            seen: &mut seen,
        }
        .values(a, b)
    }
}

struct Comparison<'a> {
    left: &'a DecomposedGraph,
    right: &'a DecomposedGraph,
    seen: &'a mut HashSet<(NodeId, NodeId)>,
}

impl Comparison<'_> {
    fn values(&mut self, a: &Decomposed, b: &Decomposed) -> bool {
        match (a, b) {
            (Decomposed::Ref(x), Decomposed::Ref(y)) => {
                if !self.seen.insert((*x, *y)) {
                    return true;
                }
                match (self.left.node(*x), self.right.node(*y)) {
                    (Some(n), Some(m)) => self.nodes(n, m),
                    _ => false,
                }
            }
            (Decomposed::Attribute(x), Decomposed::Attribute(y)) => {
                x.locked == y.locked
                    && x.serializable == y.serializable
                    && self.values(&x.value, &y.value)
            }
            (Decomposed::Ref(_), _) | (_, Decomposed::Ref(_)) => false,
            _ => a == b,
        }
    }

    fn sequences(&mut self, xs: &[Decomposed], ys: &[Decomposed]) -> bool {
        xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| self.values(x, y))
    }

    fn entries(
        &mut self,
        xs: &BTreeMap<String, Decomposed>,
        ys: &BTreeMap<String, Decomposed>,
    ) -> bool {
        xs.len() == ys.len()
            && xs.iter().all(|(key, x)| match ys.get(key) {
                Some(y) => self.values(x, y),
                None => false,
            })
    }

    fn nodes(&mut self, a: &Node, b: &Node) -> bool {
        match (a, b) {
            (Node::List { items: xs }, Node::List { items: ys })
            | (Node::Set { items: xs }, Node::Set { items: ys })
            | (Node::Array { items: xs }, Node::Array { items: ys }) => self.sequences(xs, ys),
            (Node::Map { entries: xs }, Node::Map { entries: ys }) => self.entries(xs, ys),
            (
                Node::Record {
                    type_name: tx,
                    fields: xs,
                },
                Node::Record {
                    type_name: ty,
                    fields: ys,
                },
            ) => tx == ty && self.entries(xs, ys),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_loop() -> DecomposedGraph {
        let mut fields = BTreeMap::new();
        fields.insert("me".to_string(), Decomposed::Ref(NodeId::new(0)));
        fields.insert("id".to_string(), Decomposed::Int(1));
        DecomposedGraph::new(
            Decomposed::Ref(NodeId::new(0)),
            vec![Node::Record {
                type_name: "Node".to_string(),
                fields,
            }],
            Vec::new(),
        )
    }

    #[test]
    fn test_same_content_on_cycles_terminates() {
        assert!(self_loop().same_content(&self_loop()));
    }

    #[test]
    fn test_same_content_detects_differences() {
        let mut other = self_loop();
        if let Node::Record { fields, .. } = &mut other.nodes[0] {
            fields.insert("id".to_string(), Decomposed::Int(2));
        }
        assert!(!self_loop().same_content(&other));
    }

    #[test]
    fn test_serialized_shape() {
        let graph = DecomposedGraph::new(
            Decomposed::Ref(NodeId::new(0)),
            vec![Node::List {
                items: vec![Decomposed::Int(1), Decomposed::Null],
            }],
            Vec::new(),
        );
        let json = graph.to_json().unwrap();
        assert_eq!(json["root"]["type"], "ref");
        assert_eq!(json["root"]["value"], 0);
        assert_eq!(json["nodes"][0]["kind"], "list");
        assert_eq!(json["nodes"][0]["items"][0]["value"], 1);
        assert_eq!(json["nodes"][0]["items"][1]["type"], "null");
    }
}
