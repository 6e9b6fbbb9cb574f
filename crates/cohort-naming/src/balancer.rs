//! Instance selection strategies
//!
//! The algorithm is fixed at construction. Strategies only ever see the healthy
//! candidates of one service, in registration order.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use cohort_common::CohortError;

use crate::model::ServiceInstance;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BalancingAlgorithm {
    #[default]
    RoundRobin,
    LeastLoad,
    WeightedRandom,
}

impl BalancingAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalancingAlgorithm::RoundRobin => "round-robin",
            BalancingAlgorithm::LeastLoad => "least-load",
            BalancingAlgorithm::WeightedRandom => "weighted-random",
        }
    }

    /// Build the strategy implementing this algorithm
    pub fn strategy(self) -> Box<dyn SelectionStrategy> {
        match self {
            BalancingAlgorithm::RoundRobin => Box::new(RoundRobin),
            BalancingAlgorithm::LeastLoad => Box::new(LeastLoad),
            BalancingAlgorithm::WeightedRandom => Box::new(WeightedRandom::new()),
        }
    }
}

impl Display for BalancingAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BalancingAlgorithm {
    type Err = CohortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "round-robin" | "roundrobin" => Ok(BalancingAlgorithm::RoundRobin),
            "least-load" | "leastload" => Ok(BalancingAlgorithm::LeastLoad),
            "weighted-random" | "weightedrandom" => Ok(BalancingAlgorithm::WeightedRandom),
            other => Err(CohortError::Config(format!(
                "unknown balancing algorithm '{}'",
                other
            ))),
        }
    }
}

/// Picks one instance among the healthy candidates of a service.
///
/// `cursor` is per-service state owned by the registry and guarded by the same
/// lock as `candidates`.
pub trait SelectionStrategy: Send + Sync {
    fn algorithm(&self) -> BalancingAlgorithm;

    fn select<'a>(
        &self,
        candidates: &[&'a ServiceInstance],
        cursor: &mut u64,
    ) -> Option<&'a ServiceInstance>;
}

/// Rotates through candidates in registration order
#[derive(Debug, Default)]
pub struct RoundRobin;

impl SelectionStrategy for RoundRobin {
    fn algorithm(&self) -> BalancingAlgorithm {
        BalancingAlgorithm::RoundRobin
    }

    fn select<'a>(
        &self,
        candidates: &[&'a ServiceInstance],
        cursor: &mut u64,
    ) -> Option<&'a ServiceInstance> {
        if candidates.is_empty() {
            return None;
        }
        let selected = candidates[(*cursor % candidates.len() as u64) as usize];
        *cursor = cursor.wrapping_add(1);
        Some(selected)
    }
}

/// Minimum load; ties by response time, then instance id
#[derive(Debug, Default)]
pub struct LeastLoad;

impl SelectionStrategy for LeastLoad {
    fn algorithm(&self) -> BalancingAlgorithm {
        BalancingAlgorithm::LeastLoad
    }

    fn select<'a>(
        &self,
        candidates: &[&'a ServiceInstance],
        _cursor: &mut u64,
    ) -> Option<&'a ServiceInstance> {
        candidates.iter().copied().min_by(|a, b| {
            a.load
                .total_cmp(&b.load)
                .then(a.response_time_ms.total_cmp(&b.response_time_ms))
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        })
    }
}

/// Samples with weight 1/(load+1)
#[derive(Debug)]
pub struct WeightedRandom {
    rng: Mutex<StdRng>,
}

impl WeightedRandom {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for WeightedRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for WeightedRandom {
    fn algorithm(&self) -> BalancingAlgorithm {
        BalancingAlgorithm::WeightedRandom
    }

    fn select<'a>(
        &self,
        candidates: &[&'a ServiceInstance],
        _cursor: &mut u64,
    ) -> Option<&'a ServiceInstance> {
        let weights: Vec<f64> = candidates
            .iter()
            .map(|instance| 1.0 / (instance.load.max(0.0) + 1.0))
            .collect();
        let total: f64 = weights.iter().sum();
        let draw = self.rng.lock().random::<f64>() * total;

        let mut cumulative = 0.0;
        for (instance, weight) in candidates.iter().zip(&weights) {
            cumulative += weight;
            if draw < cumulative {
                return Some(*instance);
            }
        }
        // Rounding can leave the draw just above the last boundary
        candidates.last().copied()
    }
}
