//! Shared helpers for cluster integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;

use cohort_common::NodeId;
use cohort_consistency::{LogEntry, LogIndex, RaftConfig, Term};
use cohort_server::{BusConfig, Coordinator};

pub const FIVE: [&str; 5] = ["A", "B", "C", "D", "E"];

pub fn cluster(ids: &[&str]) -> Coordinator {
    Coordinator::new(ids.iter().copied(), RaftConfig::default(), BusConfig::lossless())
        .expect("valid cluster")
}

pub fn seeded_cluster(ids: &[&str], seed: u64) -> Coordinator {
    let bus = BusConfig {
        seed: Some(seed),
        ..Default::default()
    };
    Coordinator::new(ids.iter().copied(), RaftConfig::default(), bus).expect("valid cluster")
}

/// Checks that accumulate over a whole run, not just the current state
#[derive(Debug, Default)]
pub struct History {
    leaders_by_term: BTreeMap<Term, NodeId>,
    commit_by_node: BTreeMap<NodeId, Option<LogIndex>>,
    /// Log of each term's leader as last seen while it led
    leader_logs: BTreeMap<Term, Vec<LogEntry>>,
}

impl History {
    pub fn observe(&mut self, cluster: &Coordinator) {
        for node in cluster.nodes() {
            if node.is_leader() {
                let leader = self
                    .leaders_by_term
                    .entry(node.current_term())
                    .or_insert_with(|| node.id().to_string());
                assert_eq!(
                    leader.as_str(),
                    node.id(),
                    "two leaders in term {}",
                    node.current_term()
                );

                // A leader only appends: whatever it held before is still a prefix
                if let Some(previous) = self.leader_logs.get(&node.current_term()) {
                    assert!(
                        node.log().starts_with(previous),
                        "leader {} rewrote its log in term {}",
                        node.id(),
                        node.current_term()
                    );
                }
                self.leader_logs
                    .insert(node.current_term(), node.log().to_vec());
            }

            let previous = self
                .commit_by_node
                .insert(node.id().to_string(), node.commit_index())
                .flatten();
            assert!(
                node.commit_index() >= previous,
                "commit index of {} went back from {:?} to {:?}",
                node.id(),
                previous,
                node.commit_index()
            );
            node.assert_invariants();
        }
        assert_log_matching(cluster);
    }
}

/// Same index and term on two logs means identical prefixes
pub fn assert_log_matching(cluster: &Coordinator) {
    let nodes: Vec<_> = cluster.nodes().collect();
    for (i, a) in nodes.iter().enumerate() {
        for b in &nodes[i + 1..] {
            let shared = a.log().len().min(b.log().len());
            let Some(last_match) = (0..shared)
                .rev()
                .find(|&index| a.log()[index].term == b.log()[index].term)
            else {
                continue;
            };
            assert_eq!(
                a.log()[..=last_match],
                b.log()[..=last_match],
                "logs of {} and {} diverge before index {}",
                a.id(),
                b.id(),
                last_match
            );
        }
    }
}
