//! Submit batch scripts via sbatch.

use camino::Utf8Path;
use flotilla_parsers::{CommandError, run_command};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tokio::process::Command;

static JOB_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Submitted batch job (\d+)").expect("valid job id regex"));

#[derive(Error, Debug)]
pub enum SbatchError {
    #[error("sbatch failed for {script}: {source}")]
    Command {
        script: String,
        #[source]
        source: CommandError,
    },
    #[error("No job id in sbatch output for {script}: {output:?}")]
    MissingJobId { script: String, output: String },
}

/// Extract the job id from sbatch output ("Submitted batch job 12345").
pub fn parse_job_id(output: &str) -> Option<String> {
    JOB_ID_RE
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Submit a script and return its job id.
pub async fn submit_script(script: &Utf8Path) -> Result<String, SbatchError> {
    let mut cmd = Command::new("sbatch");
    cmd.arg(script.as_str());

    let stdout = run_command(&mut cmd, "sbatch")
        .await
        .map_err(|source| SbatchError::Command {
            script: script.to_string(),
            source,
        })?;

    let job_id = parse_job_id(&stdout).ok_or_else(|| SbatchError::MissingJobId {
        script: script.to_string(),
        output: stdout.trim().to_string(),
    })?;

    tracing::info!("Submitted {} as job {}", script, job_id);
    Ok(job_id)
}
