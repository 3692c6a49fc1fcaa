//! The reference graph and the `!ref` structural-reference token.
//!
//! `spec.md` §9: "Represent the reference graph as `{node, edges}` with
//! nodes addressed by `(kind, ref)`."

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{Error, Kind};

/// A `(kind, ref)` pair: the stable identity of a resource within a
/// namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub kind: Kind,
    pub r#ref: String,
}

impl NodeId {
    pub fn new(kind: Kind, r#ref: impl Into<String>) -> Self {
        Self { kind, r#ref: r#ref.into() }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.r#ref)
    }
}

/// The carried form of a `!ref <kind>:<ref>` (or bare `!ref <ref>`) tag
/// once the Loader has parsed it. Kind may be absent when it was
/// unambiguous from document position; the Loader resolves it to a
/// concrete `NodeId` before the ResourceSet is considered valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefToken {
    pub kind: Option<Kind>,
    pub r#ref: String,
}

/// The JSON object key used to mark a `!ref` token once it has been
/// embedded inside a resource's `fields` map. Kept internal so adapters
/// and the hasher can recognize and, during planning, substitute it.
pub const REF_TOKEN_KEY: &str = "$kongctl_ref";

impl RefToken {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            REF_TOKEN_KEY: {
                "kind": self.kind,
                "ref": self.r#ref,
            }
        })
    }

    pub fn from_json(value: &serde_json::Value) -> Option<RefToken> {
        let obj = value.as_object()?.get(REF_TOKEN_KEY)?.as_object()?;
        let r#ref = obj.get("ref")?.as_str()?.to_string();
        let kind = obj
            .get("kind")
            .filter(|v| !v.is_null())
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .ok()?;
        Some(RefToken { kind, r#ref })
    }
}

/// A declared external reference (`_external` block, `spec.md` §4.1): the
/// engine must not plan the resource it is attached to, but must still be
/// able to resolve it to a remote id for other changes to consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalSpec {
    Id(String),
    Selector(serde_json::Value),
}

/// A directed graph over `(kind, ref)` nodes: parent→child edges plus
/// `!ref` structural edges. Used to detect cycles at load time and, later,
/// to derive `depends_on` ordering in the Planner.
#[derive(Debug, Default, Clone)]
pub struct ReferenceGraph {
    nodes: BTreeSet<NodeId>,
    edges: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl ReferenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: NodeId) {
        self.nodes.insert(node.clone());
        self.edges.entry(node).or_default();
    }

    /// Adds a directed edge `from -> to` (from depends on / points at to).
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        self.add_node(from.clone());
        self.add_node(to.clone());
        self.edges.entry(from).or_default().insert(to);
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter()
    }

    pub fn edges_from(&self, node: &NodeId) -> impl Iterator<Item = &NodeId> {
        self.edges.get(node).into_iter().flatten()
    }

    /// Rejects cycles, per `spec.md` §3: "Circular parent/child structures
    /// are forbidden." Returns the first cycle found, as a path of nodes.
    pub fn check_acyclic(&self) -> Result<(), Error> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: BTreeMap<NodeId, Mark> = BTreeMap::new();
        let mut stack = Vec::new();

        fn visit(
            graph: &ReferenceGraph,
            node: &NodeId,
            marks: &mut BTreeMap<NodeId, Mark>,
            stack: &mut Vec<NodeId>,
        ) -> Result<(), Error> {
            match marks.get(node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let mut cycle: Vec<String> = stack
                        .iter()
                        .skip_while(|n| *n != node)
                        .map(|n| n.to_string())
                        .collect();
                    cycle.push(node.to_string());
                    return Err(Error::CycleDetected(cycle.join(" -> ")));
                }
                None => {}
            }
            marks.insert(node.clone(), Mark::Visiting);
            stack.push(node.clone());
            for next in graph.edges_from(node) {
                visit(graph, next, marks, stack)?;
            }
            stack.pop();
            marks.insert(node.clone(), Mark::Done);
            Ok(())
        }

        for node in self.nodes() {
            visit(self, node, &mut marks, &mut stack)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(r#ref: &str) -> NodeId {
        NodeId::new(Kind::Portal, r#ref)
    }

    #[test]
    fn acyclic_graph_passes() {
        let mut g = ReferenceGraph::new();
        g.add_edge(n("a"), n("b"));
        g.add_edge(n("b"), n("c"));
        assert!(g.check_acyclic().is_ok());
    }

    #[test]
    fn direct_cycle_is_rejected() {
        let mut g = ReferenceGraph::new();
        g.add_edge(n("a"), n("b"));
        g.add_edge(n("b"), n("a"));
        assert!(g.check_acyclic().is_err());
    }

    #[test]
    fn self_cycle_is_rejected() {
        let mut g = ReferenceGraph::new();
        g.add_edge(n("a"), n("a"));
        assert!(g.check_acyclic().is_err());
    }

    #[test]
    fn ref_token_roundtrips_through_json() {
        let tok = RefToken { kind: Some(Kind::Portal), r#ref: "p1".into() };
        let json = tok.to_json();
        assert_eq!(RefToken::from_json(&json), Some(tok));
    }
}
