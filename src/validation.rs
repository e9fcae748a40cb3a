//! Input validation for partition-layout identifiers.
//!
//! Channel names and partition dates are embedded in filesystem paths by
//! the partition store, so they must never contain separators or traversal
//! sequences.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{PipelineError, Result};

/// Longest channel name the partition layout accepts.
pub const MAX_CHANNEL_NAME_LEN: usize = 128;

#[allow(clippy::expect_used)]
fn channel_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Letters, digits, underscores and dots, as the source platform allows
    // for public channel identities.
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.]*$").expect("channel name pattern compiles")
    })
}

#[allow(clippy::expect_used)]
fn partition_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("partition date pattern compiles"))
}

/// Validate a channel name before it is used as a path component.
pub fn validate_channel_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(PipelineError::InvalidChannel("empty name".to_string()));
    }
    if name.len() > MAX_CHANNEL_NAME_LEN {
        return Err(PipelineError::InvalidChannel(format!(
            "{name}: longer than {MAX_CHANNEL_NAME_LEN} characters"
        )));
    }
    if !channel_name_regex().is_match(name) {
        return Err(PipelineError::InvalidChannel(name.to_string()));
    }
    Ok(())
}

/// Validate a partition date string (YYYY-MM-DD).
pub fn validate_partition_date(date: &str) -> Result<()> {
    if partition_date_regex().is_match(date) {
        Ok(())
    } else {
        Err(PipelineError::InvalidPartitionDate(date.to_string()))
    }
}
