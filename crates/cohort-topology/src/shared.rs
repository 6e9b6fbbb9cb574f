// Shared topology handle
// The topology is the only structure shared across node actors; every mutation takes the write lock

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use cohort_common::{NodeId, Result};

use crate::health::HealthSnapshot;
use crate::model::NodeState;
use crate::topology::NetworkTopology;

/// Cloneable, lock-guarded handle to a `NetworkTopology`
#[derive(Clone, Debug, Default)]
pub struct SharedTopology {
    inner: Arc<RwLock<NetworkTopology>>,
}

impl SharedTopology {
    pub fn new(topology: NetworkTopology) -> Self {
        Self {
            inner: Arc::new(RwLock::new(topology)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, NetworkTopology> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, NetworkTopology> {
        self.inner.write()
    }

    pub fn partition<I, S>(&self, group: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inner.write().partition(group)
    }

    pub fn heal(&self, a: &str, b: &str, latency: Duration) -> Result<()> {
        self.inner.write().heal(a, b, latency)
    }

    /// Reconnect every pair of nodes that is currently not adjacent
    pub fn heal_all(&self, latency: Duration) -> Result<usize> {
        let mut topology = self.inner.write();
        let ids = topology.node_ids();
        let mut restored = 0;
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                if topology.latency(a, b).is_none() {
                    topology.heal(a, b, latency)?;
                    restored += 1;
                }
            }
        }
        Ok(restored)
    }

    pub fn set_node_state(&self, id: &str, state: NodeState) -> Result<NodeState> {
        self.inner.write().set_node_state(id, state)
    }

    pub fn reachable(&self, a: &str, b: &str) -> bool {
        self.inner.read().reachable(a, b)
    }

    /// Nodes reachable from `source`, excluding `source` itself
    pub fn peers_reachable_from(&self, source: &str) -> Vec<NodeId> {
        self.inner
            .read()
            .reachable_from(source)
            .into_iter()
            .filter(|id| id != source)
            .collect()
    }

    pub fn path_latency(&self, a: &str, b: &str) -> Option<Duration> {
        self.inner.read().path_latency(a, b)
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        self.inner.read().health_snapshot()
    }
}
