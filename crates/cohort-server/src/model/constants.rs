//! Configuration keys and defaults for the Cohort server

// Raft timing
pub const RAFT_ELECTION_TIMEOUT_MIN: &str = "cohort.raft.election-timeout-min";
pub const RAFT_ELECTION_TIMEOUT_MAX: &str = "cohort.raft.election-timeout-max";
pub const RAFT_HEARTBEAT_INTERVAL: &str = "cohort.raft.heartbeat-interval";
pub const RAFT_MAX_PAYLOAD_ENTRIES: &str = "cohort.raft.max-payload-entries";

// Load balancing
pub const BALANCER_ALGORITHM: &str = "cohort.balancer.algorithm";
pub const BALANCER_SERVICE_NAME: &str = "cohort.balancer.service-name";
pub const DEFAULT_SERVICE_NAME: &str = "cohort";

// Simulated bus
pub const BUS_DROP_RATE: &str = "cohort.bus.drop-rate";
pub const BUS_REORDER: &str = "cohort.bus.reorder";
pub const BUS_SEED: &str = "cohort.bus.seed";

// Cluster membership
pub const CLUSTER_NODES: &str = "cohort.cluster.nodes";
pub const DEFAULT_CLUSTER_NODES: [&str; 5] = ["node-a", "node-b", "node-c", "node-d", "node-e"];

// Heartbeat monitor
pub const HEARTBEAT_TIMEOUT: &str = "cohort.heartbeat.timeout";
pub const HEARTBEAT_DELETE_TIMEOUT: &str = "cohort.heartbeat.delete-timeout";
pub const HEARTBEAT_CHECK_INTERVAL: &str = "cohort.heartbeat.check-interval";

// Logging
pub const LOG_LEVEL: &str = "cohort.log.level";
pub const LOG_DIR: &str = "cohort.log.dir";
pub const LOG_CONSOLE: &str = "cohort.log.console";
pub const LOG_FILE: &str = "cohort.log.file";
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const ENV_PREFIX: &str = "COHORT";
pub const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";
