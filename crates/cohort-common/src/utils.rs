//! Utility functions for Cohort
//!
//! Common helper functions used across the codebase.

use std::sync::LazyLock;

/// Regex pattern for validating identifiers (node ids, instance ids, service names)
static VALID_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new("^[a-zA-Z0-9_.:@-]+$").expect("Invalid regex pattern"));

/// Validate an identifier contains only allowed characters
///
/// Allowed characters: alphanumeric, underscore, dot, colon, at sign, hyphen.
/// Empty identifiers are rejected.
///
/// # Examples
///
/// ```
/// use cohort_common::is_valid_id;
///
/// assert!(is_valid_id("node-a"));
/// assert!(is_valid_id("orders@node-a"));
/// assert!(!is_valid_id("node a"));
/// assert!(!is_valid_id(""));
/// ```
pub fn is_valid_id(id: &str) -> bool {
    VALID_PATTERN.is_match(id)
}

/// Current wall-clock time as Unix milliseconds
pub fn current_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Quorum size for a cluster of `members` voters: floor(n/2) + 1
pub fn quorum_size(members: usize) -> usize {
    members / 2 + 1
}
