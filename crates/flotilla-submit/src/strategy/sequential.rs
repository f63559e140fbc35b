use super::{SubmissionStrategy, SubmitError, SubmitFailure, finish_individual, prepare, write_script};
use crate::descriptor::DescriptorGenerator;
use crate::tasks::TaskList;
use flotilla_runs::{JobRegistryRecord, RunContext};
use flotilla_slurm::Scheduler;
use flotilla_state::{IntervalTicker, StatePoller, Ticker};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One job per task, submitted in input order.
///
/// With `wait_each`, each job must finish before the next task is
/// submitted, and a failed job stops the run.
pub struct SequentialStrategy<S, T = IntervalTicker> {
    scheduler: Arc<S>,
    generator: DescriptorGenerator,
    wait_each: bool,
    cancel: CancellationToken,
    ticker: PhantomData<fn() -> T>,
}

impl<S: Scheduler, T: Ticker + Default> SequentialStrategy<S, T> {
    pub fn new(
        scheduler: Arc<S>,
        generator: DescriptorGenerator,
        wait_each: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scheduler,
            generator,
            wait_each,
            cancel,
            ticker: PhantomData,
        }
    }

    async fn submit_each(
        &self,
        ctx: &RunContext,
        tasks: &TaskList,
        ids: &mut Vec<String>,
    ) -> Result<(), SubmitError> {
        let poller = StatePoller::new(Arc::clone(&self.scheduler));

        for (n, task) in tasks.names().iter().enumerate() {
            let descriptor = self.generator.individual(task);
            let script = write_script(ctx, task, &self.generator.render(ctx, &descriptor))?;
            let id = self.scheduler.submit(&script).await?;
            tracing::info!("Submitted job {} for task {} ({}/{})", id, task, n + 1, tasks.len());
            ids.push(id.clone());

            if !self.wait_each {
                continue;
            }

            let mut ticker = T::default();
            let state = poller.wait_for_unit(&id, &mut ticker, &self.cancel).await?;
            if state.is_failure() {
                return Err(SubmitError::TaskFailed {
                    task: task.clone(),
                    id,
                    state,
                });
            }
        }
        Ok(())
    }
}

impl<S: Scheduler, T: Ticker + Default> SubmissionStrategy for SequentialStrategy<S, T> {
    async fn submit(
        &self,
        ctx: &RunContext,
        tasks: &TaskList,
    ) -> Result<JobRegistryRecord, SubmitFailure> {
        prepare(ctx)?;

        let mut ids = Vec::with_capacity(tasks.len());
        let outcome = self.submit_each(ctx, tasks, &mut ids).await;
        finish_individual(ctx, ids, outcome)
    }
}
