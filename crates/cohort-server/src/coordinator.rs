//! Deterministic cluster driver
//!
//! Owns one `ConsensusNode` per topology node and moves their messages over a
//! `SimulatedBus` on a virtual clock. Delivery happens in rounds, so a run is
//! fully reproducible for a given seed. The async `actor` runtime drives the
//! same state machines on real time.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use cohort_common::{CohortError, DEFAULT_LATENCY_MS, NodeId, Result, current_millis};
use cohort_consistency::{ConsensusNode, LogEntry, LogIndex, NodeStatus, RaftConfig};
use cohort_naming::{LoadBalancer, ServiceInstance};
use cohort_topology::{NetworkTopology, NodeState, SharedTopology};

use crate::bus::{BusConfig, MessageBus, SimulatedBus};
use crate::model::ClusterStatus;

const MAX_DELIVERY_ROUNDS: usize = 10_000;
const DEFAULT_SEED: u64 = 0x5eed;

/// Instances added and removed by one `sync_instances` pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub registered: Vec<String>,
    pub deregistered: Vec<String>,
}

#[derive(Debug)]
pub struct Coordinator {
    topology: SharedTopology,
    bus: SimulatedBus,
    nodes: BTreeMap<NodeId, ConsensusNode>,
    now: Instant,
}

impl Coordinator {
    /// Fully connected cluster with the default edge latency
    pub fn new<I, S>(ids: I, raft_config: RaftConfig, bus_config: BusConfig) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let topology =
            NetworkTopology::full_mesh(ids, Duration::from_millis(DEFAULT_LATENCY_MS))?;
        Self::from_topology(topology, raft_config, bus_config)
    }

    /// Every topology node becomes a cluster member; nodes already failed start inert
    pub fn from_topology(
        topology: NetworkTopology,
        raft_config: RaftConfig,
        bus_config: BusConfig,
    ) -> Result<Self> {
        raft_config.validate()?;
        if topology.is_empty() {
            return Err(CohortError::Config("cluster has no nodes".to_string()));
        }

        let now = Instant::now();
        let ids = topology.node_ids();
        let seed = bus_config.seed.unwrap_or(DEFAULT_SEED);
        let mut nodes = BTreeMap::new();
        for (i, id) in ids.iter().enumerate() {
            let mut node = ConsensusNode::with_seed(
                id.clone(),
                ids.iter().cloned(),
                raft_config.clone(),
                now,
                seed.wrapping_add(i as u64),
            );
            if topology
                .node(id)
                .is_some_and(|n| n.state == NodeState::Failed)
            {
                node.on_node_failed();
            }
            nodes.insert(id.clone(), node);
        }

        let topology = SharedTopology::new(topology);
        let bus = SimulatedBus::new(topology.clone(), &bus_config)?;
        info!(
            "Coordinator started with {} nodes (drop rate: {}, reorder: {})",
            nodes.len(),
            bus_config.drop_rate,
            bus_config.reorder
        );
        Ok(Self {
            topology,
            bus,
            nodes,
            now,
        })
    }

    // ==================== Accessors ====================

    /// Current virtual time
    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn topology(&self) -> &SharedTopology {
        &self.topology
    }

    pub fn node(&self, id: &str) -> Option<&ConsensusNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ConsensusNode> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    pub fn leaders(&self) -> Vec<&ConsensusNode> {
        self.nodes.values().filter(|node| node.is_leader()).collect()
    }

    /// The leader of the highest term, if any node believes it leads
    pub fn leader(&self) -> Option<&ConsensusNode> {
        self.leaders()
            .into_iter()
            .max_by_key(|node| node.current_term())
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut ConsensusNode> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| CohortError::UnknownNode(id.to_string()))
    }

    // ==================== Delivery ====================

    /// One delivery round: flush outboxes, then hand every pending message to its target
    pub fn step(&mut self) -> usize {
        self.flush_outboxes();
        let now = self.now;
        let mut delivered = 0;
        for message in self.bus.drain() {
            let Some(target) = message.target().map(str::to_string) else {
                continue;
            };
            if let Some(node) = self.nodes.get_mut(&target)
                && node.handle_message(message, now)
            {
                delivered += 1;
            }
        }
        self.sync_recovered();
        delivered
    }

    /// Deliver rounds until no node has anything left to say
    pub fn run_until_idle(&mut self) -> usize {
        let mut delivered = 0;
        for _ in 0..MAX_DELIVERY_ROUNDS {
            self.flush_outboxes();
            if self.bus.is_idle() {
                self.sync_recovered();
                return delivered;
            }
            delivered += self.step();
        }
        warn!(
            "Message exchange did not settle after {} rounds",
            MAX_DELIVERY_ROUNDS
        );
        delivered
    }

    /// Move the virtual clock forward, firing every timer that falls due on the way.
    ///
    /// Every tick pushes its node's deadline past `now`, so the loop ends once
    /// no deadline is left at or before the target.
    pub fn advance(&mut self, duration: Duration) -> usize {
        let target = self.now + duration;
        let mut fired = 0;
        loop {
            let next = self
                .nodes
                .values()
                .filter_map(ConsensusNode::next_deadline)
                .min();
            let Some(deadline) = next.filter(|deadline| *deadline <= target) else {
                break;
            };
            self.now = self.now.max(deadline);
            let now = self.now;
            for node in self.nodes.values_mut() {
                if node.next_deadline().is_some_and(|at| at <= now) {
                    node.tick(now);
                    fired += 1;
                }
            }
            self.run_until_idle();
        }
        self.now = target;
        fired
    }

    /// Expire `id`'s election timer now and let the election play out
    pub fn trigger_election(&mut self, id: &str) -> Result<()> {
        let now = self.now;
        self.node_mut(id)?.on_election_timeout(now);
        self.run_until_idle();
        Ok(())
    }

    /// Submit a client command to `id`, which must be the leader
    pub fn append_command(
        &mut self,
        id: &str,
        command: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<LogIndex> {
        let index = self.node_mut(id)?.append_command(command, data)?;
        self.run_until_idle();
        Ok(index)
    }

    pub fn apply_committed(&mut self, id: &str) -> Result<Vec<LogEntry>> {
        Ok(self.node_mut(id)?.apply_committed())
    }

    fn flush_outboxes(&mut self) {
        for node in self.nodes.values_mut() {
            for message in node.take_outbox() {
                self.bus.send(message);
            }
        }
    }

    // A recovered node carries traffic again once it is back to Active
    fn sync_recovered(&self) {
        let recovered: Vec<NodeId> = {
            let topology = self.topology.read();
            self.nodes
                .values()
                .filter(|node| node.status() == NodeStatus::Active)
                .filter(|node| {
                    topology
                        .node(node.id())
                        .is_some_and(|n| n.state == NodeState::Recovering)
                })
                .map(|node| node.id().to_string())
                .collect()
        };
        for id in recovered {
            match self.topology.set_node_state(&id, NodeState::Active) {
                Ok(_) => debug!("Topology node {} is active again", id),
                Err(e) => warn!("Failed to mark topology node {} active: {}", id, e),
            }
        }
    }

    // ==================== Topology ====================

    /// Cut every edge between `group` and the remaining nodes
    pub fn partition<I, S>(&mut self, group: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let removed = self.topology.partition(group)?;
        info!("Partition removed {} edges", removed);
        Ok(removed)
    }

    pub fn heal(&mut self, a: &str, b: &str) -> Result<()> {
        self.topology
            .heal(a, b, Duration::from_millis(DEFAULT_LATENCY_MS))
    }

    /// Restore the full mesh
    pub fn heal_all(&mut self) -> Result<usize> {
        let restored = self
            .topology
            .heal_all(Duration::from_millis(DEFAULT_LATENCY_MS))?;
        info!("Healed {} edges", restored);
        Ok(restored)
    }

    // ==================== Health ====================

    /// Health verdict: `id` stops taking part until `recover_node`
    pub fn fail_node(&mut self, id: &str) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| CohortError::UnknownNode(id.to_string()))?;
        self.topology.set_node_state(id, NodeState::Failed)?;
        node.on_node_failed();
        Ok(())
    }

    pub fn recover_node(&mut self, id: &str) -> Result<()> {
        let now = self.now;
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| CohortError::UnknownNode(id.to_string()))?;
        if node.status() != NodeStatus::Failed {
            return Ok(());
        }
        self.topology.set_node_state(id, NodeState::Recovering)?;
        node.on_node_recovered(now);
        Ok(())
    }

    // ==================== Integration ====================

    /// Register one instance per non-failed topology node under `service_name`
    /// and drop instances whose node failed or left the topology.
    ///
    /// Existing instances are left untouched so their metrics survive.
    pub fn sync_instances(
        &self,
        balancer: &LoadBalancer,
        service_name: &str,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let live: BTreeSet<NodeId> = {
            let topology = self.topology.read();
            topology
                .nodes()
                .filter(|node| node.state != NodeState::Failed)
                .map(|node| node.id.clone())
                .collect()
        };

        for node_id in &live {
            let instance_id = instance_id(service_name, node_id);
            if balancer.instance(&instance_id).is_none() {
                balancer.register_instance(ServiceInstance::new(
                    instance_id.clone(),
                    node_id.clone(),
                    service_name,
                ))?;
                report.registered.push(instance_id);
            }
        }
        for instance in balancer.list_instances(service_name) {
            if !live.contains(&instance.node_id)
                && balancer.deregister_instance(&instance.instance_id).is_some()
            {
                report.deregistered.push(instance.instance_id);
            }
        }

        if !report.registered.is_empty() || !report.deregistered.is_empty() {
            info!(
                "Synced service {}: {} registered, {} deregistered",
                service_name,
                report.registered.len(),
                report.deregistered.len()
            );
        }
        Ok(report)
    }

    pub fn status(&self) -> ClusterStatus {
        ClusterStatus::new(
            current_millis(),
            self.nodes.values().map(ConsensusNode::snapshot).collect(),
            self.topology.health_snapshot(),
        )
    }
}

/// Balancer instance id for a cluster node
pub fn instance_id(service_name: &str, node_id: &str) -> String {
    format!("{}@{}", service_name, node_id)
}
