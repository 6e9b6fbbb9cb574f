// Metrics module for observability
// Counters are emitted by the library crates; this module describes them and records cluster gauges

use metrics::{describe_counter, describe_gauge, gauge};

use crate::model::ClusterStatus;

/// Initialize all metric descriptions
/// Should be called once at application startup
pub fn init_metrics() {
    // Raft metrics
    describe_counter!(
        "cohort_raft_elections_started_total",
        "Total number of elections started by any node"
    );
    describe_counter!(
        "cohort_raft_leaders_elected_total",
        "Total number of leader elections won"
    );
    describe_counter!(
        "cohort_raft_entries_committed_total",
        "Total number of log entries committed by leaders"
    );
    describe_gauge!("cohort_raft_term", "Highest term observed in the cluster");
    describe_gauge!("cohort_raft_leaders", "Nodes currently acting as leader");

    // Bus metrics
    describe_counter!(
        "cohort_bus_messages_dropped_total",
        "Messages lost by the simulated bus"
    );
    describe_counter!(
        "cohort_bus_messages_unreachable_total",
        "Messages discarded because no path to the target existed"
    );

    // Topology metrics
    describe_gauge!(
        "cohort_cluster_availability",
        "Fraction of topology nodes that are active"
    );
    describe_gauge!(
        "cohort_cluster_components",
        "Connected components among traffic-carrying nodes"
    );

    // Naming metrics
    describe_counter!(
        "cohort_balancer_selections_total",
        "Total number of successful instance selections"
    );
    describe_counter!(
        "cohort_balancer_misses_total",
        "Selections that found no healthy instance"
    );
    describe_gauge!(
        "cohort_naming_instances_total",
        "Total number of registered instances"
    );

    tracing::info!("Metrics initialized");
}

/// Update consensus and topology gauges from a status report
pub fn record_cluster_status(status: &ClusterStatus) {
    gauge!("cohort_raft_term").set(status.term as f64);
    gauge!("cohort_raft_leaders").set(status.leader_count() as f64);
    gauge!("cohort_cluster_availability").set(status.health.availability);
    gauge!("cohort_cluster_components").set(status.health.components as f64);
}

pub fn set_instance_count(instances: usize) {
    gauge!("cohort_naming_instances_total").set(instances as f64);
}
