//! Submission strategies.
//!
//! Each strategy turns a task list into scheduler jobs and records them in
//! the run's job registry. That record is the only thing the monitor needs.

mod array;
mod parallel;
mod sequential;

pub use array::ArrayStrategy;
pub use parallel::ParallelStrategy;
pub use sequential::SequentialStrategy;

use crate::tasks::TaskList;
use camino::{Utf8Path, Utf8PathBuf};
use flotilla_runs::{JobKind, JobRegistryRecord, RunContext, StoreError};
use flotilla_slurm::{SbatchError, UnitState};
use flotilla_state::WaitError;
use std::fmt;
use std::fs;
use std::future::Future;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sbatch(#[from] SbatchError),
    #[error("Task {task} (job {id}) ended {state}, not submitting the remaining tasks")]
    TaskFailed {
        task: String,
        id: String,
        state: UnitState,
    },
    #[error(transparent)]
    Interrupted(#[from] WaitError),
    #[error("Submission task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A submission that stopped early, with the jobs it had already
/// submitted. Those are the only jobs this run may cancel.
#[derive(Debug)]
pub struct SubmitFailure {
    pub submitted: Vec<String>,
    pub error: SubmitError,
}

impl SubmitFailure {
    pub fn new(submitted: Vec<String>, error: impl Into<SubmitError>) -> Self {
        Self {
            submitted,
            error: error.into(),
        }
    }
}

impl From<SubmitError> for SubmitFailure {
    fn from(error: SubmitError) -> Self {
        Self::new(Vec::new(), error)
    }
}

impl fmt::Display for SubmitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl std::error::Error for SubmitFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Submits a run's tasks and writes its registry record.
pub trait SubmissionStrategy: Send + Sync {
    fn submit(
        &self,
        ctx: &RunContext,
        tasks: &TaskList,
    ) -> impl Future<Output = Result<JobRegistryRecord, SubmitFailure>> + Send;
}

/// Which strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// One array job; concurrency is capped by the scheduler.
    #[default]
    Array,
    /// One job per task, submitted concurrently.
    Parallel,
    /// One job per task, submitted in order.
    Sequential,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Array => "array",
            Strategy::Parallel => "parallel",
            Strategy::Sequential => "sequential",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "array" => Ok(Strategy::Array),
            "parallel" => Ok(Strategy::Parallel),
            "sequential" => Ok(Strategy::Sequential),
            other => Err(format!(
                "unknown strategy {:?}, expected array, parallel or sequential",
                other
            )),
        }
    }
}

/// Write a generated script into the run's scripts directory.
pub(crate) fn write_script(
    ctx: &RunContext,
    stem: &str,
    content: &str,
) -> Result<Utf8PathBuf, SubmitError> {
    let path = ctx.scripts_dir().join(format!("{}.sbatch", stem));
    fs::write(&path, content).map_err(io_error(&path))?;
    tracing::debug!("Wrote {}", path);
    Ok(path)
}

pub(crate) fn prepare(ctx: &RunContext) -> Result<(), SubmitError> {
    ctx.prepare().map_err(io_error(&ctx.run_dir))
}

pub(crate) fn io_error(path: &Utf8Path) -> impl FnOnce(std::io::Error) -> SubmitError + '_ {
    move |source| SubmitError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn save_individual(ctx: &RunContext, ids: &[String]) -> Result<JobRegistryRecord, SubmitError> {
    let record = JobRegistryRecord::new(JobKind::Individual, ids.to_vec(), ctx.run_dir.clone());
    ctx.store().save_registry(&record)?;
    Ok(record)
}

/// Record the individual jobs submitted so far and report how the
/// submission ended. A run that stops early still records what it
/// submitted, and the failure carries those ids.
pub(crate) fn finish_individual(
    ctx: &RunContext,
    ids: Vec<String>,
    outcome: Result<(), SubmitError>,
) -> Result<JobRegistryRecord, SubmitFailure> {
    match outcome {
        Ok(()) => save_individual(ctx, &ids).map_err(|error| SubmitFailure::new(ids.clone(), error)),
        Err(error) => {
            if !ids.is_empty() {
                if let Err(e) = save_individual(ctx, &ids) {
                    tracing::error!("Could not record submitted jobs: {}", e);
                }
            }
            Err(SubmitFailure::new(ids, error))
        }
    }
}
