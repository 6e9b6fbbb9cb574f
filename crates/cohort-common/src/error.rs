//! Error types and error codes for Cohort
//!
//! This module defines:
//! - `CohortError`: the error taxonomy shared by every component
//! - `ErrorCode`: structured error codes for operator-facing reports

use serde::{Deserialize, Serialize};

use crate::NodeId;

/// Application-specific error types
///
/// Every expected condition is returned as a value. Invariant violations inside
/// the consensus state machine panic instead, they are never represented here.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CohortError {
    /// Stale term or malformed message; dropped by the receiver
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A client command reached a node that is not the leader
    #[error("node '{node}' is not the leader (known leader: {leader:?})")]
    NotLeader {
        node: NodeId,
        leader: Option<NodeId>,
    },

    #[error("node '{0}' not exist")]
    UnknownNode(NodeId),

    #[error("node '{0}' already exist")]
    DuplicateNode(NodeId),

    #[error("invalid edge {0} <-> {1}")]
    InvalidEdge(NodeId, NodeId),

    /// No healthy instance matched the requested service
    #[error("no available instance for service '{0}'")]
    NoAvailableInstance(String),

    #[error("invalid instance: {0}")]
    InvalidInstance(String),

    /// The node has been marked failed by the health collaborator
    #[error("node '{0}' is unavailable")]
    NodeUnavailable(NodeId),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CohortError {
    /// Map the error onto its structured code
    pub fn code(&self) -> ErrorCode<'static> {
        match self {
            CohortError::Protocol(_) => PROTOCOL_ERROR,
            CohortError::NotLeader { .. } => NOT_LEADER,
            CohortError::UnknownNode(_) => NODE_NOT_EXIST,
            CohortError::DuplicateNode(_) => NODE_ALREADY_EXIST,
            CohortError::InvalidEdge(..) => ILLEGAL_EDGE,
            CohortError::NoAvailableInstance(_) => NO_AVAILABLE_INSTANCE,
            CohortError::InvalidInstance(_) => INSTANCE_ERROR,
            CohortError::NodeUnavailable(_) => NODE_UNAVAILABLE,
            CohortError::Config(_) => CONFIG_ERROR,
        }
    }

    /// Whether retrying against another node (or later) can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CohortError::NotLeader { .. }
                | CohortError::NoAvailableInstance(_)
                | CohortError::NodeUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CohortError>;

/// Error code structure for status reports
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub const SUCCESS: ErrorCode<'static> = ErrorCode {
    code: 0,
    message: "success",
};

// Topology errors
pub const NODE_NOT_EXIST: ErrorCode<'static> = ErrorCode {
    code: 23001,
    message: "node not exist",
};

pub const NODE_ALREADY_EXIST: ErrorCode<'static> = ErrorCode {
    code: 23002,
    message: "node already exist",
};

pub const ILLEGAL_EDGE: ErrorCode<'static> = ErrorCode {
    code: 23003,
    message: "illegal edge",
};

pub const NODE_UNAVAILABLE: ErrorCode<'static> = ErrorCode {
    code: 23004,
    message: "node unavailable",
};

// Consensus errors
pub const PROTOCOL_ERROR: ErrorCode<'static> = ErrorCode {
    code: 24000,
    message: "protocol error",
};

pub const NOT_LEADER: ErrorCode<'static> = ErrorCode {
    code: 24001,
    message: "not leader",
};

// Load balancer errors
pub const NO_AVAILABLE_INSTANCE: ErrorCode<'static> = ErrorCode {
    code: 25000,
    message: "no available instance",
};

pub const INSTANCE_ERROR: ErrorCode<'static> = ErrorCode {
    code: 25001,
    message: "instance parameter error",
};

pub const CONFIG_ERROR: ErrorCode<'static> = ErrorCode {
    code: 30001,
    message: "configuration error",
};
