//! Failure analysis for units that ended in a terminal-failure state.
//!
//! Queries sacct for resource usage and turns the raw numbers into an
//! explanation plus a suggested resubmission change.

use flotilla_parsers::{
    MemoryFormat, format_duration, format_duration_slurm, parse_duration_secs, parse_memory_mb,
    run_command_allow_failure, split_delimited,
};
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum FailureError {
    #[error("Failed to execute sacct: {0}")]
    ExecutionError(String),
    #[error("Job not found: {0}")]
    NotFound(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Failure mode classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureMode {
    /// Unit ran out of memory
    OutOfMemory {
        used_mb: u64,
        requested_mb: u64,
        suggested_mb: u64,
    },
    /// Unit exceeded its time limit
    Timeout {
        elapsed_seconds: u64,
        limit_seconds: u64,
        suggested_seconds: u64,
    },
    /// Wrapped engine exited non-zero
    ExitCode { code: i32, signal: Option<i32> },
    /// Cancelled by a user or admin
    Cancelled { by_user: Option<String> },
    /// Node or boot failure
    NodeFailure { node: Option<String> },
    /// Preempted by a higher priority job
    Preempted,
    Unknown { state: String },
}

/// Detailed failure analysis result.
#[derive(Debug, Clone)]
pub struct FailureAnalysis {
    pub job_id: String,
    pub mode: FailureMode,
    /// Human-readable explanation
    pub explanation: String,
    /// Suggested fix
    pub suggestion: String,
    /// Raw sacct state string
    pub raw_state: String,
    pub max_rss_mb: Option<u64>,
    pub req_mem_mb: Option<u64>,
    pub elapsed_seconds: Option<u64>,
    pub time_limit_seconds: Option<u64>,
}

impl FailureAnalysis {
    /// Analysis without resource figures, with messages filled in.
    pub fn from_mode(job_id: &str, mode: FailureMode, raw_state: &str) -> Self {
        let (explanation, suggestion) = Self::generate_messages(&mode);
        Self {
            job_id: job_id.to_string(),
            mode,
            explanation,
            suggestion,
            raw_state: raw_state.to_string(),
            max_rss_mb: None,
            req_mem_mb: None,
            elapsed_seconds: None,
            time_limit_seconds: None,
        }
    }

    fn generate_messages(mode: &FailureMode) -> (String, String) {
        match mode {
            FailureMode::OutOfMemory {
                used_mb,
                requested_mb,
                suggested_mb,
            } => (
                format!(
                    "Unit exceeded its memory limit. Used {:.1} GB of {:.1} GB allocated.",
                    *used_mb as f64 / 1024.0,
                    *requested_mb as f64 / 1024.0
                ),
                format!(
                    "Resubmit with at least {}M in total, e.g. raise --mem-per-cpu or --cpus.",
                    suggested_mb
                ),
            ),
            FailureMode::Timeout {
                elapsed_seconds,
                limit_seconds,
                suggested_seconds,
            } => (
                format!(
                    "Unit exceeded its time limit. Ran for {} with a limit of {}.",
                    format_duration(*elapsed_seconds),
                    format_duration(*limit_seconds)
                ),
                format!(
                    "Resubmit with --time {}.",
                    format_duration_slurm(*suggested_seconds)
                ),
            ),
            FailureMode::ExitCode { code, signal } => {
                let explanation = match (*code, *signal) {
                    (_, Some(9)) => format!("Unit killed with SIGKILL. Exit code: {}", code),
                    (_, Some(11)) => format!("Unit crashed with SIGSEGV. Exit code: {}", code),
                    (_, Some(15)) => format!("Unit terminated with SIGTERM. Exit code: {}", code),
                    (_, Some(sig)) => format!("Unit exited with code {} and signal {}", code, sig),
                    (2, None) => {
                        "Runner exited with code 2: the task name could not be resolved".to_string()
                    }
                    (127, None) => "Workflow engine not found (exit code 127)".to_string(),
                    (137, None) => {
                        "Unit killed, likely by the OOM killer (exit code 137)".to_string()
                    }
                    (_, None) => format!("Workflow engine failed with exit code {}", code),
                };
                let suggestion = match *code {
                    2 => "Check that tasks.txt in the run directory has a line per array index."
                        .to_string(),
                    137 => "Try increasing --mem-per-cpu.".to_string(),
                    _ => "Check the unit's stderr log and the engine report under its work directory."
                        .to_string(),
                };
                (explanation, suggestion)
            }
            FailureMode::Cancelled { by_user } => (
                match by_user {
                    Some(user) => format!("Unit was cancelled by {}", user),
                    None => "Unit was cancelled".to_string(),
                },
                "Resubmit the task if the cancellation was not intentional.".to_string(),
            ),
            FailureMode::NodeFailure { node } => (
                match node {
                    Some(n) => format!("Unit failed due to a failure of node {}", n),
                    None => "Unit failed due to a node failure".to_string(),
                },
                "Resubmit the task. If it persists, contact the cluster admins.".to_string(),
            ),
            FailureMode::Preempted => (
                "Unit was preempted by the scheduler".to_string(),
                "Resubmit the task, or use a partition without preemption.".to_string(),
            ),
            FailureMode::Unknown { state } => (
                format!("Unit failed with state {}", state),
                "Check the SLURM logs for details.".to_string(),
            ),
        }
    }
}

/// Query detailed failure information for a job or array element.
pub async fn analyze_failure(job_id: &str) -> Result<FailureAnalysis, FailureError> {
    // Format: State, ExitCode, MaxRSS, ReqMem, Elapsed, Timelimit, NodeList
    // MaxRSS is only recorded on steps, so the allocation row comes first
    // and the batch step follows.
    let mut cmd = Command::new("sacct");
    cmd.args([
        "-j",
        job_id,
        "--parsable2",
        "--noheader",
        "--format",
        "State,ExitCode,MaxRSS,ReqMem,Elapsed,Timelimit,NodeList",
    ]);

    let stdout = run_command_allow_failure(&mut cmd, "sacct")
        .await
        .map_err(|e| FailureError::ExecutionError(e.to_string()))?;

    let mut lines = stdout.lines().filter(|l| !l.trim().is_empty());
    let line = lines
        .next()
        .ok_or_else(|| FailureError::NotFound(job_id.to_string()))?;
    let step_rss = lines
        .filter_map(|l| l.split('|').nth(2))
        .filter_map(|rss| parse_memory_mb(rss, MemoryFormat::SlurmSacct))
        .max();

    let mut analysis = parse_failure_line(job_id, line, step_rss)?;
    let (explanation, suggestion) = FailureAnalysis::generate_messages(&analysis.mode);
    analysis.explanation = explanation;
    analysis.suggestion = suggestion;
    Ok(analysis)
}

fn suggest_memory(used: u64, requested: u64) -> u64 {
    // 50% headroom over what was used, rounded up to a whole GB
    let suggested = ((used as f64 * 1.5) / 1024.0).ceil() as u64 * 1024;
    suggested.max(requested + 1024)
}

/// Parse the allocation row of sacct output.
fn parse_failure_line(
    job_id: &str,
    line: &str,
    step_rss_mb: Option<u64>,
) -> Result<FailureAnalysis, FailureError> {
    let fields = split_delimited(line, 7).map_err(FailureError::ParseError)?;

    let raw_state = fields[0].to_string();
    let (exit_code, signal) = parse_exit_code_signal(fields[1]);
    let max_rss_mb = parse_memory_mb(fields[2], MemoryFormat::SlurmSacct).or(step_rss_mb);
    let req_mem_mb = parse_memory_mb(fields[3], MemoryFormat::SlurmSacct);
    let elapsed_seconds = parse_duration_secs(fields[4]);
    let time_limit_seconds = parse_duration_secs(fields[5]);
    let node = flotilla_parsers::non_empty_string(fields[6]).filter(|n| n != "None");

    let base_state = raw_state.split_whitespace().next().unwrap_or(&raw_state);
    let mode = match base_state.to_uppercase().as_str() {
        "OUT_OF_MEMORY" => {
            let used = max_rss_mb.unwrap_or(0);
            let requested = req_mem_mb.unwrap_or(0);
            FailureMode::OutOfMemory {
                used_mb: used,
                requested_mb: requested,
                suggested_mb: suggest_memory(used, requested),
            }
        }
        "TIMEOUT" => {
            let elapsed = elapsed_seconds.unwrap_or(0);
            let limit = time_limit_seconds.unwrap_or(0);
            FailureMode::Timeout {
                elapsed_seconds: elapsed,
                limit_seconds: limit,
                suggested_seconds: ((elapsed as f64 * 1.5) as u64).max(limit + 3600),
            }
        }
        "CANCELLED" => FailureMode::Cancelled {
            by_user: raw_state
                .split_once("by ")
                .map(|(_, user)| user.trim().to_string()),
        },
        "NODE_FAIL" | "BOOT_FAIL" => FailureMode::NodeFailure { node },
        "PREEMPTED" => FailureMode::Preempted,
        "FAILED" => {
            if exit_code == 137 && max_rss_mb.is_some() {
                let used = max_rss_mb.unwrap_or(0);
                let requested = req_mem_mb.unwrap_or(0);
                FailureMode::OutOfMemory {
                    used_mb: used,
                    requested_mb: requested,
                    suggested_mb: suggest_memory(used, requested),
                }
            } else {
                FailureMode::ExitCode {
                    code: exit_code,
                    signal,
                }
            }
        }
        other => FailureMode::Unknown {
            state: other.to_string(),
        },
    };

    Ok(FailureAnalysis {
        job_id: job_id.to_string(),
        mode,
        explanation: String::new(),
        suggestion: String::new(),
        raw_state,
        max_rss_mb,
        req_mem_mb,
        elapsed_seconds,
        time_limit_seconds,
    })
}

/// Parse exit code string "code:signal" into (code, signal).
fn parse_exit_code_signal(s: &str) -> (i32, Option<i32>) {
    let mut parts = s.split(':');
    let code = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let signal = parts.next().and_then(|p| p.parse().ok()).filter(|&s| s != 0);
    (code, signal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exit_code_signal() {
        assert_eq!(parse_exit_code_signal("0:0"), (0, None));
        assert_eq!(parse_exit_code_signal("1:0"), (1, None));
        assert_eq!(parse_exit_code_signal("0:9"), (0, Some(9)));
    }

    #[test]
    fn test_timeout_suggests_more_time() {
        let analysis =
            parse_failure_line("9_1", "TIMEOUT|0:0||4000M|02:00:00|02:00:00|node3", None).unwrap();
        assert_eq!(
            analysis.mode,
            FailureMode::Timeout {
                elapsed_seconds: 7200,
                limit_seconds: 7200,
                suggested_seconds: 10800,
            }
        );
    }

    #[test]
    fn test_oom_uses_step_rss() {
        let analysis = parse_failure_line(
            "9",
            "OUT_OF_MEMORY|0:125||4096M|00:10:00|01:00:00|node1",
            Some(4000),
        )
        .unwrap();
        assert_eq!(
            analysis.mode,
            FailureMode::OutOfMemory {
                used_mb: 4000,
                requested_mb: 4096,
                suggested_mb: 6144,
            }
        );
    }

    #[test]
    fn test_unresolved_task_exit_code() {
        let analysis =
            parse_failure_line("9_4", "FAILED|2:0||1G|00:00:01|01:00:00|node1", None).unwrap();
        assert_eq!(
            analysis.mode,
            FailureMode::ExitCode {
                code: 2,
                signal: None
            }
        );
        let (explanation, _) = FailureAnalysis::generate_messages(&analysis.mode);
        assert!(explanation.contains("could not be resolved"));
    }

    #[test]
    fn test_cancelled_by_user() {
        let analysis =
            parse_failure_line("9", "CANCELLED by 1001|0:0||1G|00:00:01|01:00:00|None", None)
                .unwrap();
        assert_eq!(
            analysis.mode,
            FailureMode::Cancelled {
                by_user: Some("1001".to_string())
            }
        );
    }
}
