//! Service instance model
//!
//! Instances only reference a topology node by id; the balancer owns their lifetime.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use cohort_common::{CohortError, NodeId, Result, current_millis, is_valid_id};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Unhealthy,
}

impl Display for HealthStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// A routable endpoint of a service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    pub instance_id: String,
    pub node_id: NodeId,
    pub service_name: String,
    #[serde(default)]
    pub health: HealthStatus,
    /// Relative load reported by the health feed, >= 0
    #[serde(default)]
    pub load: f64,
    /// Last observed response time in milliseconds
    #[serde(default)]
    pub response_time_ms: f64,
    /// Unix millis of the last metric update
    #[serde(default)]
    pub last_heartbeat: i64,
}

impl ServiceInstance {
    pub fn new(
        instance_id: impl Into<String>,
        node_id: impl Into<NodeId>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            node_id: node_id.into(),
            service_name: service_name.into(),
            health: HealthStatus::Healthy,
            load: 0.0,
            response_time_ms: 0.0,
            last_heartbeat: current_millis(),
        }
    }

    pub fn with_load(mut self, load: f64) -> Self {
        self.load = load;
        self
    }

    pub fn with_response_time(mut self, response_time_ms: f64) -> Self {
        self.response_time_ms = response_time_ms;
        self
    }

    pub fn with_health(mut self, health: HealthStatus) -> Self {
        self.health = health;
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.health == HealthStatus::Healthy
    }

    pub fn validate(&self) -> Result<()> {
        if !is_valid_id(&self.instance_id) {
            return Err(CohortError::InvalidInstance(format!(
                "instance id '{}' is illegal",
                self.instance_id
            )));
        }
        if !is_valid_id(&self.service_name) {
            return Err(CohortError::InvalidInstance(format!(
                "service name '{}' is illegal",
                self.service_name
            )));
        }
        if !is_metric(self.load) || !is_metric(self.response_time_ms) {
            return Err(CohortError::InvalidInstance(format!(
                "instance '{}' has negative or non-finite metrics",
                self.instance_id
            )));
        }
        Ok(())
    }
}

pub(crate) fn is_metric(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}
