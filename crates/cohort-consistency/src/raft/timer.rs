// Election timer
// Randomized deadline within the configured range; the sole timeout primitive of a node

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::config::RaftConfig;

#[derive(Debug)]
pub struct ElectionTimer {
    min_ms: u64,
    max_ms: u64,
    deadline: Instant,
    rng: StdRng,
}

impl ElectionTimer {
    pub fn new(config: &RaftConfig, now: Instant) -> Self {
        Self::with_rng(config, now, StdRng::from_os_rng())
    }

    /// Reproducible timeouts for simulations and tests
    pub fn seeded(config: &RaftConfig, now: Instant, seed: u64) -> Self {
        Self::with_rng(config, now, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &RaftConfig, now: Instant, rng: StdRng) -> Self {
        let mut timer = Self {
            min_ms: config.election_timeout_min_ms,
            max_ms: config.election_timeout_max_ms.max(config.election_timeout_min_ms),
            deadline: now,
            rng,
        };
        timer.reset(now);
        timer
    }

    /// Pick a fresh deadline in `[min, max]` from `now`
    pub fn reset(&mut self, now: Instant) {
        let timeout = self.rng.random_range(self.min_ms..=self.max_ms);
        self.deadline = now + Duration::from_millis(timeout);
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}
