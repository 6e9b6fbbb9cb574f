//! Heartbeat policy configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Silence thresholds for the heartbeat monitor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatConfig {
    /// Silence after which an instance is marked unhealthy (default: 15000ms)
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_ms: i64,

    /// Silence after which an instance is deregistered (default: 30000ms)
    #[serde(default = "default_delete_timeout")]
    pub delete_timeout_ms: i64,

    /// Sweep interval (default: 5000ms)
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,
}

fn default_heartbeat_timeout() -> i64 {
    15_000
}

fn default_delete_timeout() -> i64 {
    30_000
}

fn default_check_interval() -> u64 {
    5_000
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: default_heartbeat_timeout(),
            delete_timeout_ms: default_delete_timeout(),
            check_interval_ms: default_check_interval(),
        }
    }
}

impl HeartbeatConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }
}
