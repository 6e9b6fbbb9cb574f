//! Cohort Common - Shared types and utilities
//!
//! This crate provides the foundational types used across all Cohort components:
//! - Error taxonomy and error codes
//! - Identifier types
//! - Utility functions

pub mod error;
pub mod utils;

// Re-exports for convenience
pub use error::{CohortError, ErrorCode, Result};
pub use utils::{current_millis, is_valid_id, quorum_size};

/// Identifier of a node in the topology and in the consensus cluster
pub type NodeId = String;

/// Default latency assigned to edges created without an explicit value (milliseconds)
pub const DEFAULT_LATENCY_MS: u64 = 1;
