//! Configuration management for the Cohort server
//!
//! Values are layered, lowest precedence first:
//! - `conf/application.yml` (optional)
//! - `COHORT`-prefixed environment variables
//! - command line flags

use std::collections::BTreeSet;

use clap::Args;
use config::{Config, Environment};

use cohort_common::{CohortError, NodeId, Result, is_valid_id};
use cohort_consistency::RaftConfig;
use cohort_naming::{BalancingAlgorithm, HeartbeatConfig};

use super::constants::{
    BALANCER_ALGORITHM, BALANCER_SERVICE_NAME, BUS_DROP_RATE, BUS_REORDER, BUS_SEED,
    CLUSTER_NODES, DEFAULT_CLUSTER_NODES, DEFAULT_CONFIG_FILE, DEFAULT_LOG_LEVEL,
    DEFAULT_SERVICE_NAME, ENV_PREFIX, HEARTBEAT_CHECK_INTERVAL, HEARTBEAT_DELETE_TIMEOUT,
    HEARTBEAT_TIMEOUT, LOG_CONSOLE, LOG_DIR, LOG_FILE, LOG_LEVEL, RAFT_ELECTION_TIMEOUT_MAX,
    RAFT_ELECTION_TIMEOUT_MIN, RAFT_HEARTBEAT_INTERVAL, RAFT_MAX_PAYLOAD_ENTRIES,
};
use crate::bus::BusConfig;

/// Command line flags that override file and environment values
#[derive(Clone, Debug, Default, Args)]
pub struct ConfigArgs {
    /// Configuration file
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: String,
    /// Comma separated cluster member ids
    #[arg(long = "nodes", env = "COHORT_NODES")]
    pub nodes: Option<String>,
    /// round-robin, least-load or weighted-random
    #[arg(long = "algorithm")]
    pub algorithm: Option<String>,
    /// Probability that the simulated bus loses a message
    #[arg(long = "drop-rate")]
    pub drop_rate: Option<f64>,
    /// Seed for election timers and message loss
    #[arg(long = "seed", env = "COHORT_SEED")]
    pub seed: Option<u64>,
    #[arg(long = "log-level", env = "COHORT_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn new(args: &ConfigArgs) -> Result<Self> {
        let mut builder = Config::builder();
        if !args.config_file.is_empty() {
            builder =
                builder.add_source(config::File::with_name(&args.config_file).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(".")
                .try_parsing(true),
        );

        if let Some(v) = &args.nodes {
            builder = builder
                .set_override(CLUSTER_NODES, v.as_str())
                .map_err(config_error)?;
        }
        if let Some(v) = &args.algorithm {
            builder = builder
                .set_override(BALANCER_ALGORITHM, v.as_str())
                .map_err(config_error)?;
        }
        if let Some(v) = args.drop_rate {
            builder = builder
                .set_override(BUS_DROP_RATE, v)
                .map_err(config_error)?;
        }
        if let Some(v) = args.seed {
            builder = builder
                .set_override(BUS_SEED, v.to_string())
                .map_err(config_error)?;
        }
        if let Some(v) = &args.log_level {
            builder = builder
                .set_override(LOG_LEVEL, v.as_str())
                .map_err(config_error)?;
        }

        let config = builder.build().map_err(config_error)?;
        Ok(Configuration { config })
    }

    /// Build directly from an in-memory source, mainly for tests
    pub fn from_config(config: Config) -> Self {
        Configuration { config }
    }

    // ========================================================================
    // Consensus
    // ========================================================================

    pub fn raft_config(&self) -> Result<RaftConfig> {
        let defaults = RaftConfig::default();
        let config = RaftConfig {
            election_timeout_min_ms: self
                .unsigned(RAFT_ELECTION_TIMEOUT_MIN)?
                .unwrap_or(defaults.election_timeout_min_ms),
            election_timeout_max_ms: self
                .unsigned(RAFT_ELECTION_TIMEOUT_MAX)?
                .unwrap_or(defaults.election_timeout_max_ms),
            heartbeat_interval_ms: self
                .unsigned(RAFT_HEARTBEAT_INTERVAL)?
                .unwrap_or(defaults.heartbeat_interval_ms),
            max_payload_entries: self
                .unsigned(RAFT_MAX_PAYLOAD_ENTRIES)?
                .unwrap_or(defaults.max_payload_entries),
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Cluster member ids; ids must be valid and unique
    pub fn cluster_nodes(&self) -> Result<Vec<NodeId>> {
        let nodes: Vec<NodeId> = match self.config.get_array(CLUSTER_NODES) {
            Ok(values) => values
                .into_iter()
                .map(|value| value.into_string().map_err(config_error))
                .collect::<Result<_>>()?,
            Err(_) => match self.config.get_string(CLUSTER_NODES) {
                Ok(list) => list
                    .split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect(),
                Err(_) => DEFAULT_CLUSTER_NODES.iter().map(|id| id.to_string()).collect(),
            },
        };

        if nodes.is_empty() {
            return Err(CohortError::Config("cluster has no nodes".to_string()));
        }
        let mut seen = BTreeSet::new();
        for id in &nodes {
            if !is_valid_id(id) {
                return Err(CohortError::Config(format!("invalid node id '{}'", id)));
            }
            if !seen.insert(id.as_str()) {
                return Err(CohortError::Config(format!("duplicate node id '{}'", id)));
            }
        }
        Ok(nodes)
    }

    // ========================================================================
    // Load balancing
    // ========================================================================

    pub fn balancing_algorithm(&self) -> Result<BalancingAlgorithm> {
        match self.config.get_string(BALANCER_ALGORITHM) {
            Ok(name) => name.parse(),
            Err(_) => Ok(BalancingAlgorithm::default()),
        }
    }

    pub fn service_name(&self) -> String {
        self.config
            .get_string(BALANCER_SERVICE_NAME)
            .unwrap_or(DEFAULT_SERVICE_NAME.to_string())
    }

    pub fn heartbeat_config(&self) -> Result<HeartbeatConfig> {
        let defaults = HeartbeatConfig::default();
        Ok(HeartbeatConfig {
            heartbeat_timeout_ms: self
                .config
                .get_int(HEARTBEAT_TIMEOUT)
                .unwrap_or(defaults.heartbeat_timeout_ms),
            delete_timeout_ms: self
                .config
                .get_int(HEARTBEAT_DELETE_TIMEOUT)
                .unwrap_or(defaults.delete_timeout_ms),
            check_interval_ms: self
                .unsigned(HEARTBEAT_CHECK_INTERVAL)?
                .unwrap_or(defaults.check_interval_ms),
        })
    }

    // ========================================================================
    // Simulated bus
    // ========================================================================

    pub fn bus_config(&self) -> Result<BusConfig> {
        let seed = match self.config.get_string(BUS_SEED) {
            Ok(seed) => Some(
                seed.trim()
                    .parse::<u64>()
                    .map_err(|e| CohortError::Config(format!("{}: {}", BUS_SEED, e)))?,
            ),
            Err(_) => None,
        };
        let config = BusConfig {
            drop_rate: self.config.get_float(BUS_DROP_RATE).unwrap_or(0.0),
            reorder: self.config.get_bool(BUS_REORDER).unwrap_or(false),
            seed,
        };
        config.validate()?;
        Ok(config)
    }

    // ========================================================================
    // Logging
    // ========================================================================

    pub fn log_level(&self) -> String {
        self.config
            .get_string(LOG_LEVEL)
            .unwrap_or(DEFAULT_LOG_LEVEL.to_string())
    }

    pub fn log_dir(&self) -> Option<String> {
        self.config.get_string(LOG_DIR).ok()
    }

    pub fn log_console(&self) -> bool {
        self.config.get_bool(LOG_CONSOLE).unwrap_or(true)
    }

    pub fn log_file(&self) -> bool {
        self.config.get_bool(LOG_FILE).unwrap_or(false)
    }

    fn unsigned(&self, key: &str) -> Result<Option<u64>> {
        match self.config.get_int(key) {
            Ok(value) => u64::try_from(value)
                .map(Some)
                .map_err(|_| CohortError::Config(format!("{} must not be negative", key))),
            Err(config::ConfigError::NotFound(_)) => Ok(None),
            Err(e) => Err(config_error(e)),
        }
    }
}

fn config_error(e: config::ConfigError) -> CohortError {
    CohortError::Config(e.to_string())
}
