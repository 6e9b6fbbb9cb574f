// Raft consensus module for Cohort
// Leader election and log replication over an abstract message bus

pub mod config;
pub mod log;
pub mod message;
pub mod node;
pub mod timer;
pub mod types;

// Re-export commonly used types
pub use config::RaftConfig;
pub use log::ReplicatedLog;
pub use message::{
    AppendEntries, AppendResponse, Message, MessageType, RaftMessage, RequestVote, VoteResponse,
};
pub use node::{ConsensusNode, ReplicationCursor};
pub use timer::ElectionTimer;
pub use types::{ConsensusState, LogEntry, LogIndex, NodeSnapshot, NodeStatus, Role, Term};
