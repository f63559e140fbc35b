use super::{SubmissionStrategy, SubmitError, SubmitFailure, finish_individual, prepare, write_script};
use crate::descriptor::DescriptorGenerator;
use crate::tasks::TaskList;
use camino::Utf8PathBuf;
use flotilla_runs::{JobRegistryRecord, RunContext};
use flotilla_slurm::{SbatchError, Scheduler};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

type Joined = Result<(String, Result<String, SbatchError>), JoinError>;

/// One job per task, at most `max_in_flight` sbatch calls at a time.
pub struct ParallelStrategy<S> {
    scheduler: Arc<S>,
    generator: DescriptorGenerator,
    max_in_flight: usize,
}

impl<S: Scheduler + 'static> ParallelStrategy<S> {
    pub fn new(scheduler: Arc<S>, generator: DescriptorGenerator, max_in_flight: usize) -> Self {
        Self {
            scheduler,
            generator,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Submit every script, collecting ids in completion order. The first
    /// error stops new submissions; the ones already running finish.
    async fn submit_all(
        &self,
        scripts: Vec<(String, Utf8PathBuf)>,
        ids: &mut Vec<String>,
    ) -> Result<(), SubmitError> {
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut join_set = JoinSet::new();
        let mut first_error: Option<SubmitError> = None;

        for (task, script) in scripts {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            while let Some(joined) = join_set.try_join_next() {
                collect(joined, ids, &mut first_error);
            }
            if first_error.is_some() {
                break;
            }

            let scheduler = Arc::clone(&self.scheduler);
            join_set.spawn(async move {
                let _permit = permit;
                let result = scheduler.submit(&script).await;
                (task, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            collect(joined, ids, &mut first_error);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn collect(joined: Joined, ids: &mut Vec<String>, first_error: &mut Option<SubmitError>) {
    let error = match joined {
        Ok((task, Ok(id))) => {
            tracing::info!("Submitted job {} for task {}", id, task);
            ids.push(id);
            return;
        }
        Ok((task, Err(e))) => {
            tracing::error!("Submission of task {} failed: {}", task, e);
            SubmitError::Sbatch(e)
        }
        Err(e) => SubmitError::Join(e),
    };
    if first_error.is_none() {
        *first_error = Some(error);
    }
}

impl<S: Scheduler + 'static> SubmissionStrategy for ParallelStrategy<S> {
    async fn submit(
        &self,
        ctx: &RunContext,
        tasks: &TaskList,
    ) -> Result<JobRegistryRecord, SubmitFailure> {
        prepare(ctx)?;
        let scripts = tasks
            .names()
            .iter()
            .map(|name| {
                let descriptor = self.generator.individual(name);
                let script = write_script(ctx, name, &self.generator.render(ctx, &descriptor))?;
                Ok((name.clone(), script))
            })
            .collect::<Result<Vec<_>, SubmitError>>()?;

        let mut ids = Vec::with_capacity(scripts.len());
        let outcome = self.submit_all(scripts, &mut ids).await;
        if outcome.is_ok() {
            tracing::info!("Submitted {} jobs", ids.len());
        }
        finish_individual(ctx, ids, outcome)
    }
}
