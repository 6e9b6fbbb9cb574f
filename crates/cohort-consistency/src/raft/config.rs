// Raft configuration
// Provides timing and batching settings for the consensus state machine

use std::time::Duration;

use cohort_common::{CohortError, Result};

/// Configuration for the Raft consensus protocol
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RaftConfig {
    /// Lower bound of the randomized election timeout in milliseconds (default: 150ms)
    pub election_timeout_min_ms: u64,

    /// Upper bound of the randomized election timeout in milliseconds (default: 300ms)
    /// Split votes are resolved only by the spread of this range
    pub election_timeout_max_ms: u64,

    /// Heartbeat interval in milliseconds (default: 50ms)
    /// Leader sends AppendEntries to every peer at this interval
    pub heartbeat_interval_ms: u64,

    /// Maximum entries per append request (default: 300)
    pub max_payload_entries: u64,

    /// How many sequence numbers per sender are remembered for duplicate detection (default: 1024)
    pub dedupe_window: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
            max_payload_entries: 300,
            dedupe_window: 1024,
        }
    }
}

impl RaftConfig {
    /// Create a new RaftConfig with custom timings
    pub fn new(
        election_timeout_min_ms: u64,
        election_timeout_max_ms: u64,
        heartbeat_interval_ms: u64,
    ) -> Self {
        Self {
            election_timeout_min_ms,
            election_timeout_max_ms,
            heartbeat_interval_ms,
            ..Default::default()
        }
    }

    /// Check that the timing parameters can drive an election
    pub fn validate(&self) -> Result<()> {
        if self.election_timeout_min_ms == 0 {
            return Err(CohortError::Config(
                "election timeout must be positive".to_string(),
            ));
        }
        if self.election_timeout_min_ms > self.election_timeout_max_ms {
            return Err(CohortError::Config(format!(
                "election timeout range is inverted: {}ms > {}ms",
                self.election_timeout_min_ms, self.election_timeout_max_ms
            )));
        }
        if self.heartbeat_interval_ms == 0
            || self.heartbeat_interval_ms >= self.election_timeout_min_ms
        {
            return Err(CohortError::Config(format!(
                "heartbeat interval {}ms must be positive and below the election timeout {}ms",
                self.heartbeat_interval_ms, self.election_timeout_min_ms
            )));
        }
        if self.max_payload_entries == 0 {
            return Err(CohortError::Config(
                "max payload entries must be positive".to_string(),
            ));
        }
        if self.dedupe_window == 0 {
            return Err(CohortError::Config(
                "dedupe window must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the election timeout range as Durations
    pub fn election_timeout_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.election_timeout_min_ms),
            Duration::from_millis(self.election_timeout_max_ms),
        )
    }

    /// Get heartbeat interval as Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}
