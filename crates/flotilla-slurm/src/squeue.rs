//! Query the live queue via squeue.

use crate::types::{StateRow, UnitState};
use flotilla_parsers::{run_command_allow_failure, split_delimited};
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum SqueueError {
    #[error("Failed to execute squeue: {0}")]
    ExecutionError(String),
}

/// squeue output format:
/// %i - Job ID (array elements as <parent>_<index>)
/// %T - State (extended)
const SQUEUE_FORMAT: &str = "%i|%T";

/// Parse the output of a squeue query.
pub fn parse_squeue_output(stdout: &str) -> Vec<StateRow> {
    let mut rows = Vec::new();
    for line in stdout.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match split_delimited(line, 2) {
            Ok(fields) if !fields[0].is_empty() => {
                rows.push(StateRow::new(fields[0], UnitState::parse(fields[1])));
            }
            Ok(_) => tracing::warn!("Missing job id in squeue line: {}", line),
            Err(e) => tracing::warn!("Failed to parse squeue line: {}", e),
        }
    }
    rows
}

/// Query the live state of the given job ids.
///
/// Array jobs are expanded to one row per element. Jobs that already left
/// the queue make squeue exit non-zero; that is an empty answer, not an
/// error.
pub async fn query_live(ids: &[String]) -> Result<Vec<StateRow>, SqueueError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut cmd = Command::new("squeue");
    cmd.args(["-h", "-r", "-o", SQUEUE_FORMAT, "-j", &ids.join(",")]);

    let stdout = run_command_allow_failure(&mut cmd, "squeue")
        .await
        .map_err(|e| SqueueError::ExecutionError(e.to_string()))?;

    Ok(parse_squeue_output(&stdout))
}
