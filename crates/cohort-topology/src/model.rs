// Topology data model
// Nodes, edges and node lifecycle states of the simulated network

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cohort_common::NodeId;

/// Lifecycle state of a topology node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    #[default]
    Active,
    Inactive,
    Failed,
    Recovering,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Active => "ACTIVE",
            NodeState::Inactive => "INACTIVE",
            NodeState::Failed => "FAILED",
            NodeState::Recovering => "RECOVERING",
        }
    }

    /// Whether the node sends, receives and forwards traffic
    pub fn carries_traffic(&self) -> bool {
        matches!(self, NodeState::Active | NodeState::Recovering)
    }
}

impl Display for NodeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A node of the simulated network
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub address: String,
    pub state: NodeState,
    /// Ids of directly connected nodes, kept symmetric by the topology
    pub neighbors: BTreeSet<NodeId>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            state: NodeState::Active,
            neighbors: BTreeSet::new(),
        }
    }

    pub fn with_state(mut self, state: NodeState) -> Self {
        self.state = state;
        self
    }

    pub fn degree(&self) -> usize {
        self.neighbors.len()
    }
}

/// An undirected edge between two nodes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub node_a: NodeId,
    pub node_b: NodeId,
    pub latency: Duration,
}

impl Edge {
    pub fn new(node_a: impl Into<NodeId>, node_b: impl Into<NodeId>, latency: Duration) -> Self {
        Self {
            node_a: node_a.into(),
            node_b: node_b.into(),
            latency,
        }
    }

    pub fn connects(&self, node: &str) -> bool {
        self.node_a == node || self.node_b == node
    }
}

/// Canonical key for an undirected edge: endpoints in lexical order
pub(crate) fn edge_key(a: &str, b: &str) -> (NodeId, NodeId) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_state_traffic() {
        assert!(NodeState::Active.carries_traffic());
        assert!(NodeState::Recovering.carries_traffic());
        assert!(!NodeState::Failed.carries_traffic());
        assert!(!NodeState::Inactive.carries_traffic());
        assert_eq!(NodeState::Failed.to_string(), "FAILED");
    }

    #[test]
    fn test_node_builder() {
        let node = Node::new("a", "10.0.0.1:7000").with_state(NodeState::Recovering);
        assert_eq!(node.id, "a");
        assert_eq!(node.state, NodeState::Recovering);
        assert_eq!(node.degree(), 0);
    }

    #[test]
    fn test_edge_key_is_order_independent() {
        assert_eq!(edge_key("b", "a"), edge_key("a", "b"));
        let edge = Edge::new("a", "b", Duration::from_millis(3));
        assert!(edge.connects("a"));
        assert!(!edge.connects("c"));
    }
}
