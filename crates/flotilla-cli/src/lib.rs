//! CLI argument parsing for flotilla.

use camino::Utf8PathBuf;
use clap::{ArgAction, Parser, Subcommand};
use flotilla_runs::{JobRegistryRecord, RegistryError, RunContext};
use flotilla_submit::{ResourceError, ResourceSpec, Strategy, TaskError, TaskList, WorkflowSpec};
use thiserror::Error;

/// Default concurrency hint for parallel submission.
pub const DEFAULT_PARALLEL_SUBMISSIONS: usize = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No tasks given: pass --tasks or set FLOTILLA_TASKS")]
    NoTasks,
    #[error(transparent)]
    Tasks(#[from] TaskError),
    #[error(transparent)]
    Resources(#[from] ResourceError),
    #[error("Nothing to monitor: pass --run-dir or --job-id")]
    NoMonitorTarget,
    #[error("Invalid job id list: {0}")]
    JobIds(#[from] RegistryError),
}

#[derive(Parser, Debug)]
#[command(name = "flotilla")]
#[command(version, about = "Submit batches of workflow runs to SLURM and watch them finish")]
pub struct Args {
    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit tasks and write the job registry
    Submit(SubmitArgs),
    /// Watch a submitted run until every job is done
    Monitor(MonitorArgs),
    /// Submit, then monitor
    Run(SubmitArgs),
}

#[derive(clap::Args, Debug)]
pub struct SubmitArgs {
    /// Comma-separated task names
    #[arg(long, env = "FLOTILLA_TASKS")]
    pub tasks: Option<String>,

    /// array, parallel or sequential
    #[arg(long, default_value = "array", env = "FLOTILLA_STRATEGY")]
    pub strategy: Strategy,

    /// Array concurrency cap, or parallel submission limit
    #[arg(long, env = "FLOTILLA_MAX_CONCURRENT")]
    pub max_concurrent: Option<usize>,

    /// Sequential: wait for each job to finish before the next
    #[arg(long)]
    pub wait_each: bool,

    /// Monitor the run after submitting
    #[arg(long)]
    pub monitor: bool,

    #[command(flatten)]
    pub resources: ResourceArgs,

    #[command(flatten)]
    pub workflow: WorkflowArgs,

    #[command(flatten)]
    pub dirs: RunDirArgs,

    #[command(flatten)]
    pub watch: WatchArgs,
}

impl SubmitArgs {
    pub fn task_list(&self) -> Result<TaskList, ConfigError> {
        let input = self.tasks.as_deref().ok_or(ConfigError::NoTasks)?;
        TaskList::parse(input).map_err(|e| match e {
            TaskError::Empty => ConfigError::NoTasks,
            other => ConfigError::Tasks(other),
        })
    }

    /// Concurrency hint for parallel submission.
    pub fn parallel_limit(&self) -> usize {
        self.max_concurrent
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_PARALLEL_SUBMISSIONS)
    }
}

#[derive(clap::Args, Debug)]
pub struct ResourceArgs {
    /// Wall time per task (D-HH:MM:SS, HH:MM:SS or minutes)
    #[arg(long, default_value = "04:00:00", env = "FLOTILLA_TIME")]
    pub time: String,

    /// CPUs per task
    #[arg(long, default_value_t = 1, env = "FLOTILLA_CPUS")]
    pub cpus: u32,

    /// Memory per CPU (e.g. 4G, 4000M)
    #[arg(long, default_value = "4G", env = "FLOTILLA_MEM_PER_CPU")]
    pub mem_per_cpu: String,

    #[arg(long, env = "FLOTILLA_PARTITION")]
    pub partition: String,

    #[arg(long, env = "FLOTILLA_ACCOUNT")]
    pub account: Option<String>,

    /// Environment module to load before the engine runs
    #[arg(long, env = "FLOTILLA_JAVA_MODULE")]
    pub java_module: Option<String>,
}

impl ResourceArgs {
    pub fn to_spec(&self) -> Result<ResourceSpec, ConfigError> {
        Ok(ResourceSpec::new(
            &self.time,
            self.cpus,
            &self.mem_per_cpu,
            &self.partition,
            self.account.clone(),
            self.java_module.clone(),
        )?)
    }
}

#[derive(clap::Args, Debug)]
pub struct WorkflowArgs {
    /// Engine command prefix
    #[arg(long, default_value = "nextflow run", env = "FLOTILLA_ENGINE")]
    pub engine: String,

    /// Pipeline the engine runs
    #[arg(long, env = "FLOTILLA_PIPELINE")]
    pub pipeline: String,

    /// Pipeline flag that receives the task name
    #[arg(long, default_value = "--sample", allow_hyphen_values = true)]
    pub task_param: String,

    /// Pipeline flag that receives the task's output directory
    #[arg(long, default_value = "--outdir", allow_hyphen_values = true)]
    pub outdir_param: String,

    /// Extra engine arguments, after `--`
    #[arg(last = true)]
    pub extra_args: Vec<String>,
}

impl WorkflowArgs {
    pub fn to_spec(&self) -> WorkflowSpec {
        WorkflowSpec {
            engine: self.engine.clone(),
            pipeline: self.pipeline.clone(),
            task_param: self.task_param.clone(),
            outdir_param: self.outdir_param.clone(),
            extra_args: self.extra_args.clone(),
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct RunDirArgs {
    /// Parent of per-run directories
    #[arg(long, default_value = "flotilla_runs", env = "FLOTILLA_RUN_BASE")]
    pub run_base: Utf8PathBuf,

    /// Parent of per-task working directories [default: RUN_DIR/work]
    #[arg(long, env = "FLOTILLA_WORK_BASE")]
    pub work_base: Option<Utf8PathBuf>,

    /// Parent of per-task output directories [default: RUN_DIR/output]
    #[arg(long, env = "FLOTILLA_OUTPUT_BASE")]
    pub output_base: Option<Utf8PathBuf>,

    /// Run identifier [default: local timestamp]
    #[arg(long, env = "FLOTILLA_RUN_ID")]
    pub run_id: Option<String>,
}

impl RunDirArgs {
    pub fn context(&self) -> RunContext {
        RunContext::new(
            &self.run_base,
            self.work_base.clone(),
            self.output_base.clone(),
            self.run_id.clone(),
        )
    }
}

#[derive(clap::Args, Debug, Clone, Copy)]
pub struct WatchArgs {
    /// Give up after this many polls
    #[arg(long)]
    pub max_cycles: Option<u32>,

    /// Cancel registered jobs if flotilla stops before they finish
    #[arg(long)]
    pub cancel_on_abort: bool,
}

#[derive(clap::Args, Debug)]
pub struct MonitorArgs {
    /// Run directory containing job_registry.txt
    #[arg(long, conflicts_with = "job_id")]
    pub run_dir: Option<Utf8PathBuf>,

    /// Existing job id, or comma-separated ids of individual jobs
    #[arg(long, env = "FLOTILLA_JOB_ID")]
    pub job_id: Option<String>,

    #[command(flatten)]
    pub watch: WatchArgs,
}

/// Where the monitor gets its registry record from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorSource {
    RunDir(Utf8PathBuf),
    Existing(JobRegistryRecord),
}

impl MonitorArgs {
    pub fn source(&self) -> Result<MonitorSource, ConfigError> {
        match (&self.run_dir, &self.job_id) {
            (Some(dir), _) => Ok(MonitorSource::RunDir(dir.clone())),
            (None, Some(ids)) => Ok(MonitorSource::Existing(JobRegistryRecord::from_existing(ids)?)),
            (None, None) => Err(ConfigError::NoMonitorTarget),
        }
    }
}
