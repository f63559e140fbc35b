//! The scheduler seam used by submission and monitoring.

use crate::failure::{FailureAnalysis, FailureError, analyze_failure};
use crate::sacct::{SacctError, query_history};
use crate::sbatch::{SbatchError, submit_script};
use crate::scancel::{ScancelError, cancel_jobs};
use crate::squeue::{SqueueError, query_live};
use crate::types::StateRow;
use camino::Utf8Path;
use std::future::Future;

/// Operations flotilla needs from a batch scheduler.
///
/// Strategies and the monitor are generic over this trait so they can be
/// driven by an in-memory scheduler in tests.
pub trait Scheduler: Send + Sync {
    /// Submit a generated script, returning the scheduler's job id.
    fn submit(&self, script: &Utf8Path) -> impl Future<Output = Result<String, SbatchError>> + Send;

    /// Accounting query. Authoritative for terminal states.
    fn query_history(
        &self,
        ids: &[String],
    ) -> impl Future<Output = Result<Vec<StateRow>, SacctError>> + Send;

    /// Live queue query. Covers units accounting does not know about yet.
    fn query_live(
        &self,
        ids: &[String],
    ) -> impl Future<Output = Result<Vec<StateRow>, SqueueError>> + Send;

    fn cancel(&self, ids: &[String]) -> impl Future<Output = Result<(), ScancelError>> + Send;

    fn analyze_failure(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<FailureAnalysis, FailureError>> + Send;
}

/// `Scheduler` backed by the SLURM command line tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlurmCli;

impl Scheduler for SlurmCli {
    async fn submit(&self, script: &Utf8Path) -> Result<String, SbatchError> {
        submit_script(script).await
    }

    async fn query_history(&self, ids: &[String]) -> Result<Vec<StateRow>, SacctError> {
        query_history(ids).await
    }

    async fn query_live(&self, ids: &[String]) -> Result<Vec<StateRow>, SqueueError> {
        query_live(ids).await
    }

    async fn cancel(&self, ids: &[String]) -> Result<(), ScancelError> {
        cancel_jobs(ids).await
    }

    async fn analyze_failure(&self, id: &str) -> Result<FailureAnalysis, FailureError> {
        analyze_failure(id).await
    }
}
