// Core Raft types
// Roles, node status, log entries and the per-node consensus state

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use cohort_common::NodeId;

use super::log::ReplicatedLog;

/// Logical epoch; never decreases on a node
pub type Term = u64;

/// Zero-based position in the replicated log
pub type LogIndex = u64;

/// Raft role; exactly one per node at any instant
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[default]
    Follower,
    Candidate,
    Leader,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Follower => "FOLLOWER",
            Role::Candidate => "CANDIDATE",
            Role::Leader => "LEADER",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Availability verdict pushed in by the health-check collaborator
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    #[default]
    Active,
    /// Ineligible: drops every message and ignores timeouts
    Failed,
    /// Back from a failure, becomes Active on first leader contact or election timeout
    Recovering,
}

impl Display for NodeStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Active => "ACTIVE",
            NodeStatus::Failed => "FAILED",
            NodeStatus::Recovering => "RECOVERING",
        };
        write!(f, "{}", s)
    }
}

/// A replicated, opaque state-machine command
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,
    pub index: LogIndex,
    pub command: String,
    #[serde(default)]
    pub data: Vec<u8>,
}

impl LogEntry {
    pub fn new(term: Term, index: LogIndex, command: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            term,
            index,
            command: command.into(),
            data,
        }
    }
}

/// State owned exclusively by one consensus node
#[derive(Clone, Debug, Default)]
pub struct ConsensusState {
    pub(crate) current_term: Term,
    pub(crate) voted_for: Option<NodeId>,
    pub(crate) log: ReplicatedLog,
    pub(crate) commit_index: Option<LogIndex>,
    pub(crate) last_applied: Option<LogIndex>,
}

impl ConsensusState {
    pub fn current_term(&self) -> Term {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<&NodeId> {
        self.voted_for.as_ref()
    }

    pub fn log(&self) -> &ReplicatedLog {
        &self.log
    }

    pub fn commit_index(&self) -> Option<LogIndex> {
        self.commit_index
    }

    pub fn last_applied(&self) -> Option<LogIndex> {
        self.last_applied
    }
}

/// Serializable point-in-time view of a node for operational tooling
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub role: Role,
    pub status: NodeStatus,
    pub term: Term,
    pub leader_id: Option<NodeId>,
    pub log_length: u64,
    pub commit_index: Option<LogIndex>,
    pub last_applied: Option<LogIndex>,
}
