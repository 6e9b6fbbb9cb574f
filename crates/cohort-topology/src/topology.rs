// Network topology graph
// Owns node and edge lifetime; partition/heal mutate edges, failure injection mutates node state

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, VecDeque};
use std::time::Duration;

use tracing::{debug, info};

use cohort_common::{CohortError, NodeId, Result, is_valid_id};

use crate::model::{Edge, Node, NodeState, edge_key};

/// Graph of nodes and latency-weighted undirected edges
#[derive(Clone, Debug, Default)]
pub struct NetworkTopology {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<(NodeId, NodeId), Duration>,
}

impl NetworkTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fully connected topology where every edge has the same latency
    pub fn full_mesh<I, S>(ids: I, latency: Duration) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let mut topology = Self::new();
        for id in ids {
            let id = id.into();
            let address = format!("sim://{}", id);
            topology.add_node(Node::new(id, address))?;
        }

        let ids: Vec<NodeId> = topology.nodes.keys().cloned().collect();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                topology.connect(a, b, latency)?;
            }
        }
        Ok(topology)
    }

    /// Add a node. Any neighbors on the passed node are ignored; edges are created via `connect`.
    pub fn add_node(&mut self, mut node: Node) -> Result<()> {
        if !is_valid_id(&node.id) {
            return Err(CohortError::Config(format!("invalid node id '{}'", node.id)));
        }
        if self.nodes.contains_key(&node.id) {
            return Err(CohortError::DuplicateNode(node.id));
        }

        node.neighbors.clear();
        debug!("Adding node {} ({})", node.id, node.address);
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Explicitly delete a node together with all of its edges
    pub fn remove_node(&mut self, id: &str) -> Result<Node> {
        let node = self
            .nodes
            .remove(id)
            .ok_or_else(|| CohortError::UnknownNode(id.to_string()))?;

        for neighbor in &node.neighbors {
            if let Some(other) = self.nodes.get_mut(neighbor) {
                other.neighbors.remove(id);
            }
            self.edges.remove(&edge_key(id, neighbor));
        }

        info!("Removed node {} and {} edge(s)", id, node.neighbors.len());
        Ok(node)
    }

    /// Add (or update the latency of) a symmetric edge
    pub fn connect(&mut self, a: &str, b: &str, latency: Duration) -> Result<()> {
        if a == b {
            return Err(CohortError::InvalidEdge(a.to_string(), b.to_string()));
        }
        self.ensure_node(a)?;
        self.ensure_node(b)?;

        if let Some(node) = self.nodes.get_mut(a) {
            node.neighbors.insert(b.to_string());
        }
        if let Some(node) = self.nodes.get_mut(b) {
            node.neighbors.insert(a.to_string());
        }
        self.edges.insert(edge_key(a, b), latency);
        Ok(())
    }

    /// Remove a single edge; returns whether it existed
    pub fn disconnect(&mut self, a: &str, b: &str) -> bool {
        let existed = self.edges.remove(&edge_key(a, b)).is_some();
        if let Some(node) = self.nodes.get_mut(a) {
            node.neighbors.remove(b);
        }
        if let Some(node) = self.nodes.get_mut(b) {
            node.neighbors.remove(a);
        }
        existed
    }

    /// Cut every edge between `group` and the rest of the graph.
    ///
    /// Edges inside the group are preserved. Calling it twice is a no-op the second time.
    /// Returns the number of edges removed.
    pub fn partition<I, S>(&mut self, group: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let group: BTreeSet<NodeId> = group.into_iter().map(|s| s.as_ref().to_string()).collect();
        for id in &group {
            self.ensure_node(id)?;
        }

        let crossing: Vec<(NodeId, NodeId)> = self
            .edges
            .keys()
            .filter(|(a, b)| group.contains(a) != group.contains(b))
            .cloned()
            .collect();

        for (a, b) in &crossing {
            self.disconnect(a, b);
        }

        info!(
            "Partitioned {:?} from the rest of the network, {} edge(s) cut",
            group,
            crossing.len()
        );
        Ok(crossing.len())
    }

    /// Restore a specific edge removed by a partition
    pub fn heal(&mut self, a: &str, b: &str, latency: Duration) -> Result<()> {
        self.connect(a, b, latency)?;
        info!("Healed edge {} <-> {} ({:?})", a, b, latency);
        Ok(())
    }

    /// Whether `b` can be reached from `a` over current edges, O(V+E)
    pub fn reachable(&self, a: &str, b: &str) -> bool {
        match (self.nodes.get(a), self.nodes.get(b)) {
            (Some(_), Some(target)) if target.state.carries_traffic() => {
                self.reachable_from(a).contains(b)
            }
            _ => false,
        }
    }

    /// BFS closure of nodes reachable from `start`, including `start` itself.
    ///
    /// Nodes that do not carry traffic are neither endpoints nor intermediate hops.
    pub fn reachable_from(&self, start: &str) -> BTreeSet<NodeId> {
        let mut visited = BTreeSet::new();
        let Some(node) = self.nodes.get(start) else {
            return visited;
        };
        if !node.state.carries_traffic() {
            return visited;
        }

        let mut queue = VecDeque::new();
        visited.insert(start.to_string());
        queue.push_back(start.to_string());

        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            for neighbor in &node.neighbors {
                if visited.contains(neighbor) {
                    continue;
                }
                let carries = self
                    .nodes
                    .get(neighbor)
                    .is_some_and(|n| n.state.carries_traffic());
                if carries {
                    visited.insert(neighbor.clone());
                    queue.push_back(neighbor.clone());
                }
            }
        }
        visited
    }

    /// Minimum total latency between two nodes (Dijkstra), `None` when unreachable
    pub fn path_latency(&self, a: &str, b: &str) -> Option<Duration> {
        if !self.reachable(a, b) {
            return None;
        }

        let mut best: HashMap<&str, Duration> = HashMap::new();
        let mut heap = BinaryHeap::new();
        best.insert(a, Duration::ZERO);
        heap.push(Reverse((Duration::ZERO, a)));

        while let Some(Reverse((cost, current))) = heap.pop() {
            if current == b {
                return Some(cost);
            }
            if best.get(current).is_some_and(|&known| cost > known) {
                continue;
            }
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            for neighbor in &node.neighbors {
                let Some(next) = self.nodes.get(neighbor) else {
                    continue;
                };
                if !next.state.carries_traffic() {
                    continue;
                }
                let latency = self.latency(current, neighbor).unwrap_or_default();
                let candidate = cost + latency;
                let improves = best
                    .get(neighbor.as_str())
                    .is_none_or(|&known| candidate < known);
                if improves {
                    best.insert(neighbor.as_str(), candidate);
                    heap.push(Reverse((candidate, neighbor.as_str())));
                }
            }
        }
        None
    }

    /// Change a node's lifecycle state, returning the previous one
    pub fn set_node_state(&mut self, id: &str, state: NodeState) -> Result<NodeState> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| CohortError::UnknownNode(id.to_string()))?;
        let previous = node.state;
        node.state = state;
        if previous != state {
            info!("Node {} state changed: {} -> {}", id, previous, state);
        }
        Ok(previous)
    }

    pub fn mark_failed(&mut self, id: &str) -> Result<NodeState> {
        self.set_node_state(id, NodeState::Failed)
    }

    pub fn mark_recovering(&mut self, id: &str) -> Result<NodeState> {
        self.set_node_state(id, NodeState::Recovering)
    }

    pub fn mark_active(&mut self, id: &str) -> Result<NodeState> {
        self.set_node_state(id, NodeState::Active)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    pub fn edges(&self) -> Vec<Edge> {
        self.edges
            .iter()
            .map(|((a, b), latency)| Edge::new(a.clone(), b.clone(), *latency))
            .collect()
    }

    pub fn latency(&self, a: &str, b: &str) -> Option<Duration> {
        self.edges.get(&edge_key(a, b)).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    fn ensure_node(&self, id: &str) -> Result<()> {
        if self.nodes.contains_key(id) {
            Ok(())
        } else {
            Err(CohortError::UnknownNode(id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn five_nodes() -> NetworkTopology {
        NetworkTopology::full_mesh(["a", "b", "c", "d", "e"], ms(1)).unwrap()
    }

    #[test]
    fn test_add_duplicate_node() {
        let mut topology = NetworkTopology::new();
        topology.add_node(Node::new("a", "sim://a")).unwrap();
        let err = topology.add_node(Node::new("a", "sim://a2")).unwrap_err();
        assert_eq!(err, CohortError::DuplicateNode("a".to_string()));
        assert_eq!(topology.len(), 1);
    }

    #[test]
    fn test_add_node_rejects_invalid_id() {
        let mut topology = NetworkTopology::new();
        assert!(matches!(
            topology.add_node(Node::new("bad id", "x")),
            Err(CohortError::Config(_))
        ));
    }

    #[test]
    fn test_connect_unknown_node() {
        let mut topology = NetworkTopology::new();
        topology.add_node(Node::new("a", "sim://a")).unwrap();
        let err = topology.connect("a", "missing", ms(1)).unwrap_err();
        assert_eq!(err, CohortError::UnknownNode("missing".to_string()));
        assert_eq!(topology.edge_count(), 0);
        assert!(topology.node("a").unwrap().neighbors.is_empty());
    }

    #[test]
    fn test_connect_is_symmetric() {
        let mut topology = NetworkTopology::new();
        topology.add_node(Node::new("a", "sim://a")).unwrap();
        topology.add_node(Node::new("b", "sim://b")).unwrap();
        topology.connect("a", "b", ms(4)).unwrap();

        assert!(topology.node("a").unwrap().neighbors.contains("b"));
        assert!(topology.node("b").unwrap().neighbors.contains("a"));
        assert_eq!(topology.latency("b", "a"), Some(ms(4)));

        // Reconnecting updates the latency without duplicating the edge
        topology.connect("b", "a", ms(9)).unwrap();
        assert_eq!(topology.edge_count(), 1);
        assert_eq!(topology.latency("a", "b"), Some(ms(9)));
    }

    #[test]
    fn test_self_edge_rejected() {
        let mut topology = five_nodes();
        assert!(matches!(
            topology.connect("a", "a", ms(1)),
            Err(CohortError::InvalidEdge(_, _))
        ));
    }

    #[test]
    fn test_partition_cuts_only_crossing_edges() {
        let mut topology = five_nodes();
        assert_eq!(topology.edge_count(), 10);

        let removed = topology.partition(["a", "b"]).unwrap();
        assert_eq!(removed, 6);
        assert_eq!(topology.edge_count(), 4);

        assert!(topology.reachable("a", "b"));
        assert!(topology.reachable("c", "e"));
        assert!(!topology.reachable("a", "c"));
        assert!(!topology.reachable("e", "b"));
    }

    #[test]
    fn test_partition_is_idempotent() {
        let mut topology = five_nodes();
        topology.partition(["a", "b"]).unwrap();
        let edges_after_first = topology.edges();
        assert_eq!(topology.partition(["a", "b"]).unwrap(), 0);
        assert_eq!(topology.edges(), edges_after_first);
    }

    #[test]
    fn test_partition_unknown_node_does_not_mutate() {
        let mut topology = five_nodes();
        assert!(topology.partition(["a", "zz"]).is_err());
        assert_eq!(topology.edge_count(), 10);
    }

    #[test]
    fn test_heal_restores_edge() {
        let mut topology = five_nodes();
        topology.partition(["a", "b"]).unwrap();
        topology.heal("b", "c", ms(2)).unwrap();

        assert!(topology.reachable("a", "e"));
        assert_eq!(topology.latency("b", "c"), Some(ms(2)));
    }

    #[test]
    fn test_reachable_multi_hop() {
        let mut topology = NetworkTopology::new();
        for id in ["a", "b", "c"] {
            topology.add_node(Node::new(id, "sim")).unwrap();
        }
        topology.connect("a", "b", ms(1)).unwrap();
        topology.connect("b", "c", ms(1)).unwrap();

        assert!(topology.reachable("a", "c"));
        assert!(topology.reachable("a", "a"));
        assert!(!topology.reachable("a", "missing"));
    }

    #[test]
    fn test_failed_node_does_not_forward() {
        let mut topology = NetworkTopology::new();
        for id in ["a", "b", "c"] {
            topology.add_node(Node::new(id, "sim")).unwrap();
        }
        topology.connect("a", "b", ms(1)).unwrap();
        topology.connect("b", "c", ms(1)).unwrap();

        topology.mark_failed("b").unwrap();
        assert!(!topology.reachable("a", "c"));
        assert!(!topology.reachable("a", "b"));
        assert!(topology.reachable_from("b").is_empty());

        topology.mark_recovering("b").unwrap();
        assert!(topology.reachable("a", "c"));
    }

    #[test]
    fn test_remove_node_drops_edges() {
        let mut topology = five_nodes();
        let removed = topology.remove_node("c").unwrap();
        assert_eq!(removed.id, "c");
        assert_eq!(topology.edge_count(), 6);
        assert!(topology.nodes().all(|n| !n.neighbors.contains("c")));
        assert!(topology.remove_node("c").is_err());
    }

    #[test]
    fn test_path_latency_prefers_cheapest_route() {
        let mut topology = NetworkTopology::new();
        for id in ["a", "b", "c"] {
            topology.add_node(Node::new(id, "sim")).unwrap();
        }
        topology.connect("a", "c", ms(10)).unwrap();
        topology.connect("a", "b", ms(2)).unwrap();
        topology.connect("b", "c", ms(3)).unwrap();

        assert_eq!(topology.path_latency("a", "c"), Some(ms(5)));
        assert_eq!(topology.path_latency("a", "a"), Some(Duration::ZERO));

        topology.disconnect("b", "c");
        assert_eq!(topology.path_latency("a", "c"), Some(ms(10)));
        topology.disconnect("a", "c");
        assert_eq!(topology.path_latency("a", "c"), None);
    }

    #[test]
    fn test_set_state_unknown_node() {
        let mut topology = five_nodes();
        assert!(topology.mark_failed("zz").is_err());
        assert_eq!(topology.mark_failed("a").unwrap(), NodeState::Active);
        assert_eq!(topology.mark_active("a").unwrap(), NodeState::Failed);
    }

    proptest::proptest! {
        #[test]
        fn prop_partition_splits_mesh_in_two(mask in 0u8..32) {
            let ids = ["a", "b", "c", "d", "e"];
            let group: Vec<&str> = ids
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, id)| *id)
                .collect();
            let mut topology = five_nodes();
            let removed = topology.partition(&group).unwrap();
            proptest::prop_assert_eq!(removed, group.len() * (ids.len() - group.len()));

            for a in ids {
                for b in ids {
                    if a != b {
                        let same_side = group.contains(&a) == group.contains(&b);
                        proptest::prop_assert_eq!(topology.reachable(a, b), same_side);
                    }
                }
            }

            for a in &group {
                for b in ids.iter().filter(|id| !group.contains(id)) {
                    topology.heal(a, b, ms(1)).unwrap();
                }
            }
            proptest::prop_assert_eq!(topology.edge_count(), 10);
        }
    }
}
