//! Cohort Server - cluster glue and runtime
//!
//! This crate provides:
//! - Simulated message buses over the shared topology
//! - A deterministic coordinator for reproducible scenarios
//! - An async actor runtime (one tokio task per node)
//! - Layered configuration, logging and metrics setup for the `cohort` binary

#![allow(clippy::result_large_err)]

pub mod actor;
pub mod bus;
pub mod coordinator;
pub mod metrics;
pub mod model;
pub mod scenario;
pub mod startup;

// Re-export commonly used types
pub use actor::{ActorCluster, NodeCommand, NodeHandle};
pub use bus::{BusConfig, ChannelBus, MessageBus, Router, SimulatedBus};
pub use coordinator::{Coordinator, SyncReport};
pub use model::{ClusterStatus, ConfigArgs, Configuration};
