//! Shared parsing utilities for scheduler command output.
//!
//! Used by flotilla-slurm for query parsing and by flotilla-submit to
//! validate resource requests before they are rendered into scripts.

pub mod command;
pub mod memory;
pub mod time;

pub use command::{CommandError, run_command, run_command_allow_failure};
pub use memory::{MemoryFormat, format_memory_slurm, parse_memory_mb};
pub use time::{
    format_duration, format_duration_slurm, parse_duration, parse_duration_secs, parse_exit_code,
    parse_time_limit,
};

/// Filter helper for optional string fields.
/// Returns None if the string is empty or a placeholder value.
pub fn non_empty_string(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed == "-" || trimmed == "N/A" || trimmed == "Unknown" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Split a pipe-delimited line and validate field count.
pub fn split_delimited(line: &str, min_fields: usize) -> Result<Vec<&str>, String> {
    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    if fields.len() < min_fields {
        return Err(format!(
            "Expected {} fields, got {}: {}",
            min_fields,
            fields.len(),
            line
        ));
    }
    Ok(fields)
}
