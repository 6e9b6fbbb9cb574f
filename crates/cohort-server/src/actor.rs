//! Async node runtime
//!
//! Each consensus node runs as its own tokio task owning its `ConsensusNode`.
//! Inputs arrive through an unbounded message inbox and a command channel;
//! the node's next deadline is the only timer. Nodes never share state, they
//! only exchange messages through the `ChannelBus`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use cohort_common::{CohortError, NodeId, Result, current_millis};
use cohort_consistency::{
    ConsensusNode, LogEntry, LogIndex, Message, NodeSnapshot, NodeStatus, RaftConfig, Role,
};
use cohort_topology::{NetworkTopology, NodeState, SharedTopology};

use crate::bus::{BusConfig, ChannelBus, MessageBus};
use crate::model::ClusterStatus;
use crate::startup::ShutdownSignal;

const COMMAND_CHANNEL_CAPACITY: usize = 64;
const LEADER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Requests a client or health collaborator can send to a running node
#[derive(Debug)]
pub enum NodeCommand {
    Append {
        command: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<LogIndex>>,
    },
    Snapshot {
        reply: oneshot::Sender<NodeSnapshot>,
    },
    ApplyCommitted {
        reply: oneshot::Sender<Vec<LogEntry>>,
    },
    Fail {
        reply: oneshot::Sender<()>,
    },
    Recover {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable address of a running node actor
#[derive(Clone, Debug)]
pub struct NodeHandle {
    id: NodeId,
    commands: mpsc::Sender<NodeCommand>,
}

impl NodeHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn append_command(
        &self,
        command: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<LogIndex> {
        let command = command.into();
        self.request(|reply| NodeCommand::Append {
            command,
            data,
            reply,
        })
        .await?
    }

    pub async fn snapshot(&self) -> Result<NodeSnapshot> {
        self.request(|reply| NodeCommand::Snapshot { reply }).await
    }

    pub async fn apply_committed(&self) -> Result<Vec<LogEntry>> {
        self.request(|reply| NodeCommand::ApplyCommitted { reply })
            .await
    }

    pub async fn fail(&self) -> Result<()> {
        self.request(|reply| NodeCommand::Fail { reply }).await
    }

    pub async fn recover(&self) -> Result<()> {
        self.request(|reply| NodeCommand::Recover { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> NodeCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| CohortError::NodeUnavailable(self.id.clone()))?;
        response
            .await
            .map_err(|_| CohortError::NodeUnavailable(self.id.clone()))
    }
}

struct NodeActor {
    node: ConsensusNode,
    inbox: mpsc::UnboundedReceiver<Message>,
    commands: mpsc::Receiver<NodeCommand>,
    bus: Arc<dyn MessageBus>,
    topology: SharedTopology,
    shutdown: broadcast::Receiver<()>,
}

impl NodeActor {
    async fn run(mut self) {
        info!("Node actor {} started", self.node.id());
        loop {
            let deadline = self.node.next_deadline().map(Instant::from_std);
            tokio::select! {
                _ = self.shutdown.recv() => break,
                Some(message) = self.inbox.recv() => {
                    let now = Instant::now().into_std();
                    self.node.handle_message(message, now);
                }
                Some(command) = self.commands.recv() => self.handle_command(command),
                _ = sleep_until(deadline) => {
                    let now = Instant::now().into_std();
                    self.node.tick(now);
                }
            }
            self.flush();
        }
        info!("Node actor {} stopped", self.node.id());
    }

    fn handle_command(&mut self, command: NodeCommand) {
        match command {
            NodeCommand::Append {
                command,
                data,
                reply,
            } => {
                let _ = reply.send(self.node.append_command(command, data));
            }
            NodeCommand::Snapshot { reply } => {
                let _ = reply.send(self.node.snapshot());
            }
            NodeCommand::ApplyCommitted { reply } => {
                let _ = reply.send(self.node.apply_committed());
            }
            NodeCommand::Fail { reply } => {
                self.node.on_node_failed();
                let _ = reply.send(());
            }
            NodeCommand::Recover { reply } => {
                self.node.on_node_recovered(Instant::now().into_std());
                let _ = reply.send(());
            }
        }
    }

    fn flush(&mut self) {
        for message in self.node.take_outbox() {
            self.bus.send(message);
        }
        // Back to Active after a recovery: carry traffic again
        if self.node.status() == NodeStatus::Active {
            mark_topology_active(&self.topology, self.node.id());
        }
    }
}

/// Move `id` from Recovering to Active in the topology; false when nothing changed
fn mark_topology_active(topology: &SharedTopology, id: &str) -> bool {
    let recovering = topology
        .read()
        .node(id)
        .is_some_and(|n| n.state == NodeState::Recovering);
    if !recovering {
        return false;
    }
    match topology.set_node_state(id, NodeState::Active) {
        Ok(_) => {
            debug!("Topology node {} is active again", id);
            true
        }
        Err(e) => {
            warn!("Failed to mark topology node {} active: {}", id, e);
            false
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// A cluster of node actors connected by a `ChannelBus`
pub struct ActorCluster {
    handles: BTreeMap<NodeId, NodeHandle>,
    topology: SharedTopology,
    bus: Arc<ChannelBus>,
    shutdown: ShutdownSignal,
    tasks: Vec<JoinHandle<()>>,
}

impl ActorCluster {
    /// Spawn one actor per id on the current runtime over a full mesh
    pub fn spawn<I, S>(
        ids: I,
        latency: Duration,
        raft_config: RaftConfig,
        bus_config: BusConfig,
        shutdown: ShutdownSignal,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        raft_config.validate()?;
        let topology = SharedTopology::new(NetworkTopology::full_mesh(ids, latency)?);
        let ids = topology.read().node_ids();
        if ids.is_empty() {
            return Err(CohortError::Config("cluster has no nodes".to_string()));
        }

        let bus = Arc::new(ChannelBus::new(topology.clone(), &bus_config)?);
        let now = Instant::now().into_std();
        let mut handles = BTreeMap::new();
        let mut tasks = Vec::with_capacity(ids.len());

        for (i, id) in ids.iter().enumerate() {
            let node = match bus_config.seed {
                Some(seed) => ConsensusNode::with_seed(
                    id.clone(),
                    ids.iter().cloned(),
                    raft_config.clone(),
                    now,
                    seed.wrapping_add(i as u64),
                ),
                None => ConsensusNode::new(id.clone(), ids.iter().cloned(), raft_config.clone(), now),
            };

            let (inbox_tx, inbox) = mpsc::unbounded_channel();
            let (commands_tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
            bus.register(id.clone(), inbox_tx);

            let actor = NodeActor {
                node,
                inbox,
                commands,
                bus: bus.clone(),
                topology: topology.clone(),
                shutdown: shutdown.subscribe(),
            };
            tasks.push(tokio::spawn(actor.run()));
            handles.insert(
                id.clone(),
                NodeHandle {
                    id: id.clone(),
                    commands: commands_tx,
                },
            );
        }

        info!("Spawned {} node actors", handles.len());
        Ok(Self {
            handles,
            topology,
            bus,
            shutdown,
            tasks,
        })
    }

    pub fn handle(&self, id: &str) -> Result<&NodeHandle> {
        self.handles
            .get(id)
            .ok_or_else(|| CohortError::UnknownNode(id.to_string()))
    }

    pub fn handles(&self) -> impl Iterator<Item = &NodeHandle> {
        self.handles.values()
    }

    pub fn topology(&self) -> &SharedTopology {
        &self.topology
    }

    pub async fn status(&self) -> Result<ClusterStatus> {
        let mut snapshots = Vec::with_capacity(self.handles.len());
        for handle in self.handles.values() {
            snapshots.push(handle.snapshot().await?);
        }
        Ok(ClusterStatus::new(
            current_millis(),
            snapshots,
            self.topology.health_snapshot(),
        ))
    }

    /// Poll until exactly one node leads the highest term, or `timeout` elapses
    pub async fn wait_for_leader(&self, timeout: Duration) -> Option<NodeId> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.status().await {
                Ok(status) => {
                    let leaders_in_term = status
                        .nodes
                        .iter()
                        .filter(|n| n.term == status.term && n.role == Role::Leader)
                        .count();
                    if leaders_in_term == 1 {
                        return status.leader;
                    }
                }
                Err(e) => warn!("Failed to collect cluster status: {}", e),
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(LEADER_POLL_INTERVAL).await;
        }
    }

    pub async fn fail_node(&self, id: &str) -> Result<()> {
        let handle = self.handle(id)?;
        self.topology.set_node_state(id, NodeState::Failed)?;
        handle.fail().await
    }

    pub async fn recover_node(&self, id: &str) -> Result<()> {
        let handle = self.handle(id)?;
        self.topology.set_node_state(id, NodeState::Recovering)?;
        handle.recover().await
    }

    pub fn partition<I, S>(&self, group: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.topology.partition(group)
    }

    pub fn heal_all(&self, latency: Duration) -> Result<usize> {
        self.topology.heal_all(latency)
    }

    /// Signal every actor and wait for them to exit
    pub async fn shutdown(self) {
        self.shutdown.shutdown();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Node actor ended abnormally: {}", e);
            }
        }
        for id in self.handles.keys() {
            self.bus.unregister(id);
        }
        info!("Actor cluster stopped");
    }
}
