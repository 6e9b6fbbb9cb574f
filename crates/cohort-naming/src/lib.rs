//! Cohort Naming - service instance registry and load balancing
//!
//! This crate provides:
//! - Service instance registry (register/deregister/metrics)
//! - Pluggable selection strategies (round robin, least load, weighted random)
//! - Heartbeat silence monitoring

pub mod balancer;
pub mod healthcheck;
pub mod model;
pub mod service;

// Re-export commonly used types
pub use balancer::{BalancingAlgorithm, LeastLoad, RoundRobin, SelectionStrategy, WeightedRandom};
pub use healthcheck::{HeartbeatConfig, HeartbeatMonitor, SweepReport};
pub use model::{HealthStatus, ServiceInstance};
pub use service::LoadBalancer;
