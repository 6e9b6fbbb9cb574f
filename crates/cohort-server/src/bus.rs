//! Simulated message transport
//!
//! Consensus nodes only depend on the `MessageBus` delivery contract: messages
//! may be lost or reordered, never duplicated by the bus itself. Reachability
//! and latency come from the shared topology.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use cohort_common::{CohortError, NodeId, Result};
use cohort_consistency::Message;
use cohort_topology::SharedTopology;

/// Fire-and-forget send; never blocks waiting for delivery
pub trait MessageBus: Send + Sync {
    fn send(&self, message: Message);
}

/// Loss and ordering behaviour of a simulated bus
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BusConfig {
    /// Probability in [0, 1] that a single delivery is lost
    pub drop_rate: f64,
    /// Shuffle pending deliveries before each delivery round
    pub reorder: bool,
    /// Seed for loss/reorder decisions, random when absent
    pub seed: Option<u64>,
}

impl BusConfig {
    pub fn lossless() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.drop_rate) {
            return Err(CohortError::Config(format!(
                "drop rate {} is outside [0, 1]",
                self.drop_rate
            )));
        }
        Ok(())
    }
}

/// Expands broadcasts, applies loss and computes per-target latency
#[derive(Debug)]
pub struct Router {
    topology: SharedTopology,
    drop_rate: f64,
    rng: Mutex<StdRng>,
}

impl Router {
    pub fn new(topology: SharedTopology, config: &BusConfig) -> Result<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            topology,
            drop_rate: config.drop_rate,
            rng: Mutex::new(rng),
        })
    }

    pub fn topology(&self) -> &SharedTopology {
        &self.topology
    }

    /// One addressed copy per surviving recipient, with its path latency
    pub fn route(&self, message: Message) -> Vec<(Message, Duration)> {
        let source = message.source().to_string();
        let targets: Vec<NodeId> = match message.target() {
            Some(target) => vec![target.to_string()],
            None => self.topology.peers_reachable_from(&source),
        };

        let mut routed = Vec::with_capacity(targets.len());
        for target in targets {
            let Some(latency) = self.topology.path_latency(&source, &target) else {
                debug!(
                    "No path {} -> {}, dropping {}",
                    source,
                    target,
                    message.kind()
                );
                counter!("cohort_bus_messages_unreachable_total").increment(1);
                continue;
            };
            if self.drop_rate > 0.0 && self.rng.lock().random::<f64>() < self.drop_rate {
                debug!("Lost {} {} -> {}", message.kind(), source, target);
                counter!("cohort_bus_messages_dropped_total").increment(1);
                continue;
            }
            let copy = if message.is_broadcast() {
                message.deliver_to(&target)
            } else {
                message.clone()
            };
            routed.push((copy, latency));
        }
        routed
    }

    fn shuffle<T>(&self, items: &mut [T]) {
        items.shuffle(&mut *self.rng.lock());
    }
}

/// Queue-backed bus driven explicitly by the deterministic coordinator
#[derive(Debug)]
pub struct SimulatedBus {
    router: Router,
    reorder: bool,
    pending: Mutex<VecDeque<Message>>,
}

impl SimulatedBus {
    pub fn new(topology: SharedTopology, config: &BusConfig) -> Result<Self> {
        Ok(Self {
            router: Router::new(topology, config)?,
            reorder: config.reorder,
            pending: Mutex::new(VecDeque::new()),
        })
    }

    pub fn topology(&self) -> &SharedTopology {
        self.router.topology()
    }

    /// Take every pending delivery whose path still exists.
    ///
    /// Partitions applied while a message was queued cut it off here.
    pub fn drain(&self) -> Vec<Message> {
        let mut batch: Vec<Message> = self.pending.lock().drain(..).collect();
        if self.reorder {
            self.router.shuffle(&mut batch);
        }
        let topology = self.router.topology();
        batch.retain(|message| {
            let deliverable = message
                .target()
                .is_some_and(|target| topology.reachable(message.source(), target));
            if !deliverable {
                counter!("cohort_bus_messages_unreachable_total").increment(1);
            }
            deliverable
        });
        batch
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl MessageBus for SimulatedBus {
    fn send(&self, message: Message) {
        let routed = self.router.route(message);
        let mut pending = self.pending.lock();
        pending.extend(routed.into_iter().map(|(message, _)| message));
    }
}

/// Bus for the actor runtime: delivers into per-node inboxes after the path latency
#[derive(Debug)]
pub struct ChannelBus {
    router: Router,
    inboxes: DashMap<NodeId, UnboundedSender<Message>>,
}

impl ChannelBus {
    pub fn new(topology: SharedTopology, config: &BusConfig) -> Result<Self> {
        Ok(Self {
            router: Router::new(topology, config)?,
            inboxes: DashMap::new(),
        })
    }

    pub fn register(&self, id: impl Into<NodeId>, inbox: UnboundedSender<Message>) {
        self.inboxes.insert(id.into(), inbox);
    }

    pub fn unregister(&self, id: &str) {
        self.inboxes.remove(id);
    }

    pub fn topology(&self) -> &SharedTopology {
        self.router.topology()
    }
}

impl MessageBus for ChannelBus {
    fn send(&self, message: Message) {
        for (message, latency) in self.router.route(message) {
            let Some(target) = message.target() else {
                continue;
            };
            let Some(inbox) = self.inboxes.get(target).map(|entry| entry.value().clone()) else {
                debug!("No inbox for {}, dropping {}", target, message.kind());
                continue;
            };
            if latency.is_zero() {
                let _ = inbox.send(message);
            } else {
                tokio::spawn(async move {
                    tokio::time::sleep(latency).await;
                    let _ = inbox.send(message);
                });
            }
        }
    }
}
