// Load balancer registry
// Owns every ServiceInstance; per-service access is serialized by DashMap shard locks

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::counter;
use tracing::{debug, info, warn};

use cohort_common::{CohortError, Result, current_millis};

use crate::balancer::{BalancingAlgorithm, SelectionStrategy};
use crate::model::{HealthStatus, ServiceInstance, is_metric};

/// Instances of one service in registration order, plus the strategy cursor
#[derive(Debug, Default)]
struct ServicePool {
    instances: Vec<ServiceInstance>,
    cursor: u64,
}

impl ServicePool {
    fn position(&self, instance_id: &str) -> Option<usize> {
        self.instances
            .iter()
            .position(|instance| instance.instance_id == instance_id)
    }
}

pub struct LoadBalancer {
    // Key: service name
    services: DashMap<String, ServicePool>,
    // Key: instance id, value: service name
    index: DashMap<String, String>,
    strategy: Box<dyn SelectionStrategy>,
}

impl LoadBalancer {
    pub fn new(algorithm: BalancingAlgorithm) -> Self {
        Self::with_strategy(algorithm.strategy())
    }

    /// Use a pre-built strategy, e.g. a seeded `WeightedRandom`
    pub fn with_strategy(strategy: Box<dyn SelectionStrategy>) -> Self {
        Self {
            services: DashMap::new(),
            index: DashMap::new(),
            strategy,
        }
    }

    pub fn algorithm(&self) -> BalancingAlgorithm {
        self.strategy.algorithm()
    }

    /// Register an instance. An existing id is replaced in place and keeps its
    /// rotation slot. Returns whether an instance was replaced.
    pub fn register_instance(&self, instance: ServiceInstance) -> Result<bool> {
        instance.validate()?;

        // The index entry stays locked until the pool matches it
        let mut indexed = self
            .index
            .entry(instance.instance_id.clone())
            .or_insert_with(|| instance.service_name.clone());
        if *indexed != instance.service_name {
            let previous = std::mem::replace(&mut *indexed, instance.service_name.clone());
            self.remove_from_pool(&previous, &instance.instance_id);
        }

        let mut pool = self
            .services
            .entry(instance.service_name.clone())
            .or_default();
        let replaced = match pool.position(&instance.instance_id) {
            Some(position) => {
                pool.instances[position] = instance;
                true
            }
            None => {
                info!(
                    "Registered instance {} of service {} on node {}",
                    instance.instance_id, instance.service_name, instance.node_id
                );
                pool.instances.push(instance);
                false
            }
        };
        Ok(replaced)
    }

    /// Remove an instance; unknown ids are a no-op
    pub fn deregister_instance(&self, instance_id: &str) -> Option<ServiceInstance> {
        let Entry::Occupied(indexed) = self.index.entry(instance_id.to_string()) else {
            return None;
        };
        let removed = self.remove_from_pool(indexed.get(), instance_id);
        let service_name = indexed.remove();
        if removed.is_some() {
            info!(
                "Deregistered instance {} of service {}",
                instance_id, service_name
            );
        }
        removed
    }

    fn remove_from_pool(&self, service_name: &str, instance_id: &str) -> Option<ServiceInstance> {
        let removed = {
            let mut pool = self.services.get_mut(service_name)?;
            let position = pool.position(instance_id)?;
            pool.instances.remove(position)
        };
        self.services
            .remove_if(service_name, |_, pool| pool.instances.is_empty());
        Some(removed)
    }

    /// Pick a healthy instance of `service_name`. Never blocks on or retries an empty pool.
    pub fn select_instance(&self, service_name: &str) -> Result<ServiceInstance> {
        let selected = self.services.get_mut(service_name).and_then(|mut guard| {
            let pool = &mut *guard;
            let candidates: Vec<&ServiceInstance> = pool
                .instances
                .iter()
                .filter(|instance| instance.is_healthy())
                .collect();
            self.strategy
                .select(&candidates, &mut pool.cursor)
                .cloned()
        });

        match selected {
            Some(instance) => {
                counter!("cohort_balancer_selections_total").increment(1);
                debug!(
                    "Selected instance {} for service {}",
                    instance.instance_id, service_name
                );
                Ok(instance)
            }
            None => {
                counter!("cohort_balancer_misses_total").increment(1);
                Err(CohortError::NoAvailableInstance(service_name.to_string()))
            }
        }
    }

    /// Overwrite load and response time, refreshing the heartbeat.
    /// Returns false for unknown instances or rejected metrics.
    pub fn update_metrics(&self, instance_id: &str, load: f64, response_time_ms: f64) -> bool {
        if !is_metric(load) || !is_metric(response_time_ms) {
            warn!(
                "Ignored metrics for {}: load={}, response_time={}ms",
                instance_id, load, response_time_ms
            );
            return false;
        }
        self.modify(instance_id, |instance| {
            instance.load = load;
            instance.response_time_ms = response_time_ms;
            instance.last_heartbeat = current_millis();
        })
    }

    pub fn set_health(&self, instance_id: &str, health: HealthStatus) -> bool {
        self.modify(instance_id, |instance| {
            if instance.health != health {
                info!("Instance {} is now {}", instance_id, health);
            }
            instance.health = health;
        })
    }

    fn modify<F>(&self, instance_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut ServiceInstance),
    {
        let Some(service_name) = self.index.get(instance_id).map(|entry| entry.value().clone()) else {
            return false;
        };
        let Some(mut pool) = self.services.get_mut(&service_name) else {
            return false;
        };
        match pool.position(instance_id) {
            Some(position) => {
                f(&mut pool.instances[position]);
                true
            }
            None => false,
        }
    }

    pub fn instance(&self, instance_id: &str) -> Option<ServiceInstance> {
        let service_name = self.index.get(instance_id)?.value().clone();
        let pool = self.services.get(&service_name)?;
        pool.position(instance_id)
            .map(|position| pool.instances[position].clone())
    }

    /// All instances of a service in registration order, healthy or not
    pub fn list_instances(&self, service_name: &str) -> Vec<ServiceInstance> {
        self.services
            .get(service_name)
            .map(|pool| pool.instances.clone())
            .unwrap_or_default()
    }

    pub fn healthy_count(&self, service_name: &str) -> usize {
        self.services
            .get(service_name)
            .map(|pool| pool.instances.iter().filter(|i| i.is_healthy()).count())
            .unwrap_or(0)
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Snapshot of every registered instance
    pub fn all_instances(&self) -> Vec<ServiceInstance> {
        self.services
            .iter()
            .flat_map(|entry| entry.value().instances.clone())
            .collect()
    }

    pub fn instance_count(&self) -> usize {
        self.index.len()
    }
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("algorithm", &self.algorithm())
            .field("services", &self.services.len())
            .field("instances", &self.index.len())
            .finish()
    }
}
