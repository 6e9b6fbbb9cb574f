//! Point-in-time health summary of the topology
//!
//! A disconnected graph is not an error: the snapshot reports an infinite
//! diameter and the availability figures let callers detect a lost quorum.

use std::collections::{BTreeSet, VecDeque};

use serde::Serialize;

use crate::model::NodeState;
use crate::topology::NetworkTopology;

/// Read-only topology/availability metrics
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub total_nodes: usize,
    pub active_nodes: usize,
    pub failed_nodes: usize,
    /// active / total, 0 for an empty topology
    pub availability: f64,
    /// Edge density |E| / (n(n-1)/2)
    pub connectivity: f64,
    /// Longest shortest hop path between traffic-carrying nodes; infinite when disconnected
    pub diameter: f64,
    /// Connected components among traffic-carrying nodes
    pub components: usize,
    pub largest_component: usize,
}

impl HealthSnapshot {
    pub fn is_connected(&self) -> bool {
        self.diameter.is_finite()
    }

    /// A strict majority of nodes is active and can talk to each other.
    ///
    /// `false` is how a lost quorum surfaces; the cluster simply stalls.
    pub fn quorum_available(&self) -> bool {
        self.total_nodes > 0
            && self.availability >= 0.5
            && self.largest_component * 2 > self.total_nodes
    }
}

impl NetworkTopology {
    pub fn health_snapshot(&self) -> HealthSnapshot {
        let total_nodes = self.len();
        let active_nodes = self
            .nodes()
            .filter(|n| n.state == NodeState::Active)
            .count();
        let failed_nodes = self
            .nodes()
            .filter(|n| n.state == NodeState::Failed)
            .count();

        let availability = if total_nodes == 0 {
            0.0
        } else {
            active_nodes as f64 / total_nodes as f64
        };

        let connectivity = if total_nodes <= 1 {
            1.0
        } else {
            let max_edges = total_nodes * (total_nodes - 1) / 2;
            self.edge_count() as f64 / max_edges as f64
        };

        let (components, largest_component) = self.components();
        let diameter = if components > 1 {
            f64::INFINITY
        } else {
            self.hop_diameter() as f64
        };

        HealthSnapshot {
            total_nodes,
            active_nodes,
            failed_nodes,
            availability,
            connectivity,
            diameter,
            components,
            largest_component,
        }
    }

    /// Count connected components among traffic-carrying nodes and the size of the largest
    fn components(&self) -> (usize, usize) {
        let mut seen = BTreeSet::new();
        let mut count = 0;
        let mut largest = 0;

        for node in self.nodes().filter(|n| n.state.carries_traffic()) {
            if seen.contains(&node.id) {
                continue;
            }
            let component = self.reachable_from(&node.id);
            largest = largest.max(component.len());
            count += 1;
            seen.extend(component);
        }
        (count, largest)
    }

    /// Maximum BFS eccentricity, assuming a single component
    fn hop_diameter(&self) -> usize {
        let mut diameter = 0;
        for start in self.nodes().filter(|n| n.state.carries_traffic()) {
            let mut depth = std::collections::HashMap::new();
            let mut queue = VecDeque::new();
            depth.insert(start.id.as_str(), 0usize);
            queue.push_back(start.id.as_str());

            while let Some(current) = queue.pop_front() {
                let d = depth[current];
                diameter = diameter.max(d);
                let Some(node) = self.node(current) else {
                    continue;
                };
                for neighbor in &node.neighbors {
                    let carries = self
                        .node(neighbor)
                        .is_some_and(|n| n.state.carries_traffic());
                    if carries && !depth.contains_key(neighbor.as_str()) {
                        depth.insert(neighbor.as_str(), d + 1);
                        queue.push_back(neighbor.as_str());
                    }
                }
            }
        }
        diameter
    }
}
