use super::{SubmissionStrategy, SubmitError, SubmitFailure, io_error, prepare, write_script};
use crate::descriptor::DescriptorGenerator;
use crate::tasks::TaskList;
use flotilla_runs::{JobKind, JobRegistryRecord, RunContext};
use flotilla_slurm::Scheduler;
use std::sync::Arc;

/// Every task as one element of a single array job.
pub struct ArrayStrategy<S> {
    scheduler: Arc<S>,
    generator: DescriptorGenerator,
    cap: Option<usize>,
}

impl<S: Scheduler> ArrayStrategy<S> {
    /// `cap` limits how many elements the scheduler runs at once.
    pub fn new(scheduler: Arc<S>, generator: DescriptorGenerator, cap: Option<usize>) -> Self {
        Self {
            scheduler,
            generator,
            cap,
        }
    }

    /// Write the artifacts and submit, returning the array job id.
    async fn submit_array(&self, ctx: &RunContext, tasks: &TaskList) -> Result<String, SubmitError> {
        prepare(ctx)?;
        let task_list = ctx.store().task_list_path();
        tasks
            .write_artifact(&task_list)
            .map_err(io_error(&task_list))?;

        let descriptor = self.generator.array(ctx, tasks, self.cap);
        let script = write_script(ctx, "array", &self.generator.render(ctx, &descriptor))?;

        let id = self.scheduler.submit(&script).await?;
        match descriptor.array_range {
            Some(range) => tracing::info!("Submitted array job {} ({} tasks, range {})", id, tasks.len(), range),
            None => tracing::info!("Submitted job {} for task {}", id, tasks.names()[0]),
        }
        Ok(id)
    }
}

impl<S: Scheduler> SubmissionStrategy for ArrayStrategy<S> {
    async fn submit(
        &self,
        ctx: &RunContext,
        tasks: &TaskList,
    ) -> Result<JobRegistryRecord, SubmitFailure> {
        let id = self.submit_array(ctx, tasks).await?;
        let record = JobRegistryRecord::new(JobKind::Array, vec![id], ctx.run_dir.clone());
        match ctx.store().save_registry(&record) {
            Ok(()) => Ok(record),
            Err(e) => Err(SubmitFailure::new(record.ids, e)),
        }
    }
}
