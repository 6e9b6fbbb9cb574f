//! Partition/heal walkthrough
//!
//! Drives a `Coordinator` through election, replication, a minority partition,
//! healing and instance selection, recording the cluster status after each step.

use std::time::Duration;

use serde::Serialize;
use tracing::info;

use cohort_common::{CohortError, NodeId, Result};
use cohort_naming::LoadBalancer;

use crate::coordinator::Coordinator;
use crate::model::{ClusterStatus, Configuration};

const ELECTION_WINDOW: Duration = Duration::from_secs(2);
const SELECTION_ROUNDS: usize = 5;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioStep {
    pub description: String,
    pub status: ClusterStatus,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub steps: Vec<ScenarioStep>,
    /// Nodes cut off from the majority during the partition step
    pub minority: Vec<NodeId>,
    pub service_name: String,
    /// Instance ids returned by consecutive selections after healing
    pub selections: Vec<String>,
}

impl ScenarioReport {
    pub fn final_status(&self) -> Option<&ClusterStatus> {
        self.steps.last().map(|step| &step.status)
    }
}

struct Recorder {
    steps: Vec<ScenarioStep>,
}

impl Recorder {
    fn record(&mut self, coordinator: &Coordinator, description: impl Into<String>) {
        let description = description.into();
        info!("Scenario step: {}", description);
        self.steps.push(ScenarioStep {
            description,
            status: coordinator.status(),
        });
    }
}

fn elect(coordinator: &mut Coordinator) -> Result<NodeId> {
    coordinator.advance(ELECTION_WINDOW);
    coordinator
        .leader()
        .map(|leader| leader.id().to_string())
        .ok_or_else(|| CohortError::Protocol("no leader elected".to_string()))
}

/// Run the walkthrough with the cluster, bus and balancer settings of `configuration`
pub fn run_partition_walkthrough(configuration: &Configuration) -> Result<ScenarioReport> {
    let ids = configuration.cluster_nodes()?;
    if ids.len() < 3 {
        return Err(CohortError::Config(format!(
            "partition walkthrough needs at least 3 nodes, got {}",
            ids.len()
        )));
    }
    let mut coordinator = Coordinator::new(
        ids.iter().cloned(),
        configuration.raft_config()?,
        configuration.bus_config()?,
    )?;
    let balancer = LoadBalancer::new(configuration.balancing_algorithm()?);
    let service_name = configuration.service_name();
    let mut recorder = Recorder { steps: Vec::new() };

    let leader = elect(&mut coordinator)?;
    recorder.record(&coordinator, format!("{} elected", leader));

    coordinator.append_command(&leader, "SET x=1", Vec::new())?;
    recorder.record(&coordinator, format!("{} replicated SET x=1", leader));

    // Leader plus enough peers to stay a strict minority
    let minority_size = (ids.len() - 1) / 2;
    let mut minority = vec![leader.clone()];
    minority.extend(
        ids.iter()
            .filter(|id| **id != leader)
            .take(minority_size.saturating_sub(1))
            .cloned(),
    );
    coordinator.partition(&minority)?;
    recorder.record(&coordinator, format!("partitioned {:?}", minority));

    // Cut off from a quorum, the old leader steps down and the majority elects a new one
    coordinator.advance(ELECTION_WINDOW);
    let majority_leader = coordinator
        .nodes()
        .filter(|node| node.is_leader() && !minority.contains(&node.id().to_string()))
        .map(|node| node.id().to_string())
        .next()
        .ok_or_else(|| CohortError::Protocol("majority elected no leader".to_string()))?;
    coordinator.append_command(&majority_leader, "SET y=2", Vec::new())?;
    recorder.record(
        &coordinator,
        format!("{} elected by the majority and replicated SET y=2", majority_leader),
    );

    coordinator.heal_all()?;
    coordinator.advance(ELECTION_WINDOW);
    recorder.record(&coordinator, "healed");

    coordinator.sync_instances(&balancer, &service_name)?;
    let selections = (0..SELECTION_ROUNDS)
        .map(|_| {
            balancer
                .select_instance(&service_name)
                .map(|instance| instance.instance_id)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ScenarioReport {
        steps: recorder.steps,
        minority,
        service_name,
        selections,
    })
}
