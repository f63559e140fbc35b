//! Cancel submitted jobs via scancel.

use flotilla_parsers::run_command;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum ScancelError {
    #[error("Failed to execute scancel: {0}")]
    ExecutionError(String),
}

/// Cancel every given job. Cancelling an array parent cancels all elements.
pub async fn cancel_jobs(ids: &[String]) -> Result<(), ScancelError> {
    if ids.is_empty() {
        return Ok(());
    }

    let mut cmd = Command::new("scancel");
    cmd.args(ids);

    run_command(&mut cmd, "scancel")
        .await
        .map_err(|e| ScancelError::ExecutionError(e.to_string()))?;

    tracing::info!("Cancelled jobs {}", ids.join(","));
    Ok(())
}
