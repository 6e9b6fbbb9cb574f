//! Cohort Topology - simulated network graph
//!
//! This crate provides:
//! - Node/edge model with lifecycle states
//! - Partition and heal operations
//! - Reachability and latency queries
//! - Health snapshots (availability, connectivity, diameter)
//! - A lock-guarded shared handle for concurrent callers

pub mod health;
pub mod model;
pub mod shared;
pub mod topology;

// Re-export commonly used types
pub use health::HealthSnapshot;
pub use model::{Edge, Node, NodeState};
pub use shared::SharedTopology;
pub use topology::NetworkTopology;
