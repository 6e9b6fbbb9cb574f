//! Instance health collaborators

pub mod config;
pub mod heartbeat;

pub use config::HeartbeatConfig;
pub use heartbeat::{HeartbeatMonitor, SweepReport};
