//! Query job accounting via sacct.
//!
//! sacct is the authoritative source for terminal states: it keeps
//! answering after a unit has left the live queue.

use crate::types::{StateRow, UnitState};
use flotilla_parsers::{parse_duration, parse_exit_code, run_command, split_delimited};
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum SacctError {
    #[error("Failed to execute sacct: {0}")]
    ExecutionError(String),
    #[error("Failed to parse sacct output: {0}")]
    ParseError(String),
}

/// sacct output format (--parsable2 uses | delimiter)
const SACCT_FORMAT: &str = "JobID,State,ExitCode,Elapsed";

/// Parse a single line of sacct output.
fn parse_sacct_line(line: &str) -> Result<StateRow, SacctError> {
    let fields = split_delimited(line, 4).map_err(SacctError::ParseError)?;
    if fields[0].is_empty() {
        return Err(SacctError::ParseError(format!("Missing job id: {}", line)));
    }

    Ok(StateRow {
        id: fields[0].to_string(),
        state: UnitState::parse(fields[1]),
        exit_code: (!fields[2].is_empty()).then(|| parse_exit_code(fields[2])),
        elapsed: parse_duration(fields[3]),
    })
}

/// Parse the full output of a sacct query, skipping malformed lines.
pub fn parse_sacct_output(stdout: &str) -> Vec<StateRow> {
    let mut rows = Vec::new();
    for line in stdout.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_sacct_line(line) {
            Ok(row) => rows.push(row),
            Err(e) => tracing::warn!("Failed to parse sacct line: {}", e),
        }
    }
    rows
}

/// Query allocation-level accounting rows for the given job ids.
///
/// Ids that are not yet visible to accounting are simply absent from
/// the result.
pub async fn query_history(ids: &[String]) -> Result<Vec<StateRow>, SacctError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut cmd = Command::new("sacct");
    cmd.args([
        "-X",
        "--parsable2",
        "--noheader",
        "--format",
        SACCT_FORMAT,
        "-j",
        &ids.join(","),
    ]);

    let stdout = run_command(&mut cmd, "sacct")
        .await
        .map_err(|e| SacctError::ExecutionError(e.to_string()))?;

    Ok(parse_sacct_output(&stdout))
}
