//! Data models module
//!
//! - `constants` - Configuration keys and defaults
//! - `config` - Layered configuration (file, environment, command line)
//! - `status` - Serializable cluster report

pub mod config;
pub mod constants;
pub mod status;

// Re-export commonly used types at the module level
pub use config::{ConfigArgs, Configuration};
pub use constants::*;
pub use status::ClusterStatus;
