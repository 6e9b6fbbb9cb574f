//! Heartbeat silence monitoring
//!
//! The balancer never polls on its own. This monitor is the collaborator that
//! turns silence into health changes:
//! - instances silent longer than `heartbeat_timeout` are marked unhealthy
//! - instances silent longer than `delete_timeout` are deregistered
//! - instances it marked unhealthy become healthy again once metrics resume

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashSet;
use tracing::{debug, info};

use cohort_common::current_millis;

use super::config::HeartbeatConfig;
use crate::model::HealthStatus;
use crate::service::LoadBalancer;

/// What one sweep changed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub marked_unhealthy: Vec<String>,
    pub restored: Vec<String>,
    pub expired: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.marked_unhealthy.is_empty() && self.restored.is_empty() && self.expired.is_empty()
    }
}

pub struct HeartbeatMonitor {
    balancer: Arc<LoadBalancer>,
    config: HeartbeatConfig,
    // Instances this monitor marked unhealthy; others keep whatever health was set externally
    silenced: Arc<DashSet<String>>,
    running: Arc<AtomicBool>,
}

impl HeartbeatMonitor {
    pub fn new(balancer: Arc<LoadBalancer>, config: HeartbeatConfig) -> Self {
        Self {
            balancer,
            config,
            silenced: Arc::new(DashSet::new()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Apply the silence policy as of `now` (Unix millis)
    pub fn sweep(&self, now: i64) -> SweepReport {
        let mut report = SweepReport::default();

        for instance in self.balancer.all_instances() {
            let elapsed = now - instance.last_heartbeat;
            let id = instance.instance_id;

            if elapsed > self.config.delete_timeout_ms {
                info!(
                    "Removing instance {} after {}ms without heartbeat (timeout: {}ms)",
                    id, elapsed, self.config.delete_timeout_ms
                );
                self.balancer.deregister_instance(&id);
                self.silenced.remove(&id);
                report.expired.push(id);
            } else if elapsed > self.config.heartbeat_timeout_ms {
                if instance.health == HealthStatus::Healthy {
                    info!(
                        "Marking instance {} as unhealthy due to heartbeat timeout (elapsed: {}ms, timeout: {}ms)",
                        id, elapsed, self.config.heartbeat_timeout_ms
                    );
                    self.balancer.set_health(&id, HealthStatus::Unhealthy);
                    self.silenced.insert(id.clone());
                    report.marked_unhealthy.push(id);
                }
            } else if self.silenced.remove(&id).is_some() {
                debug!("Instance {} resumed heartbeats", id);
                self.balancer.set_health(&id, HealthStatus::Healthy);
                report.restored.push(id);
            }
        }

        if !report.is_empty() {
            info!(
                "Heartbeat sweep: {} unhealthy, {} restored, {} expired",
                report.marked_unhealthy.len(),
                report.restored.len(),
                report.expired.len()
            );
        }
        report
    }

    /// Run `sweep` on an interval until `stop` is called
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("Heartbeat monitor already running");
            return;
        }
        info!("Starting heartbeat monitor");

        let mut interval = tokio::time::interval(self.config.check_interval());
        while self.running.load(Ordering::SeqCst) {
            interval.tick().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.sweep(current_millis());
        }

        info!("Heartbeat monitor stopped");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("Stopped heartbeat monitor");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
