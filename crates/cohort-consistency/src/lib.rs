//! Cohort Consistency - Raft-inspired consensus
//!
//! This crate provides:
//! - Per-node consensus state machine (Follower/Candidate/Leader)
//! - Replicated log with conflict truncation
//! - Typed RequestVote/AppendEntries messages
//! - Randomized election timer and Raft timing configuration

#![allow(clippy::result_large_err)]

pub mod raft;

// Re-export commonly used types
pub use raft::types::*;

pub use raft::config::RaftConfig;
pub use raft::message::{
    AppendEntries, AppendResponse, Message, MessageType, RaftMessage, RequestVote, VoteResponse,
};
pub use raft::node::{ConsensusNode, ReplicationCursor};
