//! Serializable cluster report

use serde::Serialize;

use cohort_common::NodeId;
use cohort_consistency::{NodeSnapshot, Role, Term};
use cohort_topology::HealthSnapshot;

/// Point-in-time view of every consensus node plus topology health
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Unix millis when the report was taken
    pub timestamp: i64,
    pub leader: Option<NodeId>,
    /// Highest term observed across the cluster
    pub term: Term,
    pub nodes: Vec<NodeSnapshot>,
    pub health: HealthSnapshot,
}

impl ClusterStatus {
    pub fn new(timestamp: i64, nodes: Vec<NodeSnapshot>, health: HealthSnapshot) -> Self {
        let term = nodes.iter().map(|node| node.term).max().unwrap_or(0);
        // A deposed leader in an old term may not have heard of its successor yet
        let leader = nodes
            .iter()
            .filter(|node| node.role == Role::Leader)
            .max_by_key(|node| node.term)
            .map(|node| node.id.clone());
        Self {
            timestamp,
            leader,
            term,
            nodes,
            health,
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn leader_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.role == Role::Leader)
            .count()
    }
}
