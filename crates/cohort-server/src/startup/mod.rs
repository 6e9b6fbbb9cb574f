//! Application startup utilities module.
//!
//! Logging initialization and shutdown signalling shared by the `cohort` binary
//! and the node actor runtime.

mod logging;
mod shutdown;

pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};
pub use shutdown::{ShutdownSignal, listen_for_os_signals, run_with_shutdown};
