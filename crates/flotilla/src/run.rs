//! Mode dispatch: submit, monitor, or both.

use flotilla_cli::{Args, Command, ConfigError, MonitorArgs, MonitorSource, SubmitArgs, WatchArgs};
use flotilla_runs::{JobRegistryRecord, RunStore, StoreError};
use flotilla_slurm::{Scheduler, SlurmCli};
use flotilla_state::{IntervalTicker, Monitor, MonitorError, MonitorTarget, RunSummary, Ticker, Verdict};
use flotilla_submit::{
    ArrayStrategy, DescriptorGenerator, ParallelStrategy, SequentialStrategy, Strategy,
    SubmissionStrategy, SubmitFailure,
};
use miette::Diagnostic;
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Diagnostic, Debug)]
pub enum AppError {
    #[error(transparent)]
    #[diagnostic(code(flotilla::config), help("see `flotilla --help`"))]
    Config(#[from] ConfigError),

    #[error("Could not read the job registry: {0}")]
    #[diagnostic(code(flotilla::registry), help("pass a run directory written by `flotilla submit`, or --job-id"))]
    Registry(#[source] StoreError),

    #[error(transparent)]
    #[diagnostic(code(flotilla::submit))]
    Submit(#[from] SubmitFailure),

    #[error(transparent)]
    #[diagnostic(code(flotilla::monitor), help("jobs may still be running; re-attach with `flotilla monitor`"))]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    #[diagnostic(code(flotilla::store))]
    Store(#[from] StoreError),
}

impl AppError {
    /// Configuration problems exit 2, everything else 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) | AppError::Registry(_) => 2,
            _ => 1,
        }
    }
}

pub fn verdict_exit_code(verdict: Verdict) -> ExitCode {
    match verdict {
        Verdict::Success => ExitCode::SUCCESS,
        Verdict::Failure => ExitCode::from(1),
    }
}

pub async fn run(args: Args) -> Result<Verdict, AppError> {
    let cancel = interrupt_token();
    let scheduler = Arc::new(SlurmCli);

    match args.command {
        Command::Submit(submit) => {
            let monitor = submit.monitor;
            submit_run::<_, IntervalTicker>(scheduler, submit, monitor, cancel).await
        }
        Command::Run(submit) => submit_run::<_, IntervalTicker>(scheduler, submit, true, cancel).await,
        Command::Monitor(monitor) => monitor_run::<_, IntervalTicker>(scheduler, monitor, cancel).await,
    }
}

/// Cancelled on Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let on_interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping");
            on_interrupt.cancel();
        }
    });
    token
}

async fn submit_run<S: Scheduler + 'static, T: Ticker + Default>(
    scheduler: Arc<S>,
    submit: SubmitArgs,
    then_monitor: bool,
    cancel: CancellationToken,
) -> Result<Verdict, AppError> {
    let tasks = submit.task_list()?;
    let generator = DescriptorGenerator::new(submit.resources.to_spec()?, submit.workflow.to_spec());
    let ctx = submit.dirs.context();
    tracing::info!(
        "Run {}: {} tasks, {} strategy, run directory {}",
        ctx.run_id,
        tasks.len(),
        submit.strategy,
        ctx.run_dir
    );
    if submit.wait_each && submit.strategy != Strategy::Sequential {
        tracing::warn!("--wait-each only applies to the sequential strategy, ignoring it");
    }

    let submitted = match submit.strategy {
        Strategy::Array => {
            ArrayStrategy::new(Arc::clone(&scheduler), generator, submit.max_concurrent)
                .submit(&ctx, &tasks)
                .await
        }
        Strategy::Parallel => {
            ParallelStrategy::new(Arc::clone(&scheduler), generator, submit.parallel_limit())
                .submit(&ctx, &tasks)
                .await
        }
        Strategy::Sequential => {
            SequentialStrategy::<S, T>::new(
                Arc::clone(&scheduler),
                generator,
                submit.wait_each,
                cancel.clone(),
            )
            .submit(&ctx, &tasks)
            .await
        }
    };

    let record = match submitted {
        Ok(record) => record,
        Err(failure) => {
            if submit.watch.cancel_on_abort && !failure.submitted.is_empty() {
                cancel_jobs(scheduler.as_ref(), &failure.submitted).await;
            }
            return Err(failure.into());
        }
    };

    if !then_monitor {
        println!("{}", record.encode());
        return Ok(Verdict::Success);
    }

    let target = MonitorTarget::from_record(&record, Some(tasks.len()));
    watch(
        scheduler,
        record,
        &target,
        submit.watch,
        &mut T::default(),
        &cancel,
    )
    .await
}

async fn monitor_run<S: Scheduler, T: Ticker + Default>(
    scheduler: Arc<S>,
    monitor: MonitorArgs,
    cancel: CancellationToken,
) -> Result<Verdict, AppError> {
    let (record, expected) = match monitor.source()? {
        MonitorSource::RunDir(dir) => {
            let store = RunStore::new(&dir);
            let record = store.load_registry().map_err(AppError::Registry)?;
            (record, store.load_task_count()?)
        }
        MonitorSource::Existing(record) => {
            tracing::info!("Re-attaching to {}", record);
            (record, None)
        }
    };

    let target = MonitorTarget::from_record(&record, expected);
    watch(
        scheduler,
        record,
        &target,
        monitor.watch,
        &mut T::default(),
        &cancel,
    )
    .await
}

/// Monitor a registered run to the end, then analyze failures and write
/// the summary when the run directory is known.
async fn watch<S: Scheduler, T: Ticker>(
    scheduler: Arc<S>,
    record: JobRegistryRecord,
    target: &MonitorTarget,
    options: WatchArgs,
    ticker: &mut T,
    cancel: &CancellationToken,
) -> Result<Verdict, AppError> {
    let mut monitor = Monitor::new(Arc::clone(&scheduler)).with_max_cycles(options.max_cycles);

    let outcome = match monitor.run(target, ticker, cancel).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if options.cancel_on_abort {
                cancel_jobs(scheduler.as_ref(), &record.ids).await;
            }
            return Err(e.into());
        }
    };

    let verdict = outcome.verdict();
    if verdict == Verdict::Failure {
        tracing::error!(
            "{} of {} units failed",
            outcome.snapshot.failed,
            outcome.snapshot.total
        );
        monitor.analyze_failures(&outcome).await;
    } else {
        tracing::info!("All {} units completed", outcome.snapshot.total);
    }

    if let Some(dir) = record.known_run_dir() {
        let store = RunStore::new(dir);
        store.save_summary(&RunSummary::new(record.clone(), &outcome))?;
        tracing::info!("Wrote {}", store.summary_path());
    }
    Ok(verdict)
}

async fn cancel_jobs<S: Scheduler>(scheduler: &S, ids: &[String]) {
    tracing::warn!("Cancelling jobs {}", ids.join(","));
    if let Err(e) = scheduler.cancel(ids).await {
        tracing::error!("Could not cancel jobs: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::{Utf8Path, Utf8PathBuf};
    use clap::Parser;
    use flotilla_runs::JobKind;
    use flotilla_slurm::UnitState::*;
    use flotilla_slurm::testing::FakeScheduler;
    use flotilla_state::ImmediateTicker;
    use std::fs;
    use tempfile::TempDir;

    fn submit_args(args: &[&str]) -> SubmitArgs {
        let parsed =
            Args::try_parse_from(["flotilla", "submit"].into_iter().chain(args.iter().copied()))
                .unwrap();
        let Command::Submit(submit) = parsed.command else {
            panic!("expected submit");
        };
        submit
    }

    fn run_base(temp: &TempDir) -> Utf8PathBuf {
        Utf8Path::from_path(temp.path()).unwrap().to_path_buf()
    }

    fn register(run_dir: &Utf8Path, kind: JobKind, ids: &[&str]) {
        let ids = ids.iter().map(|id| id.to_string()).collect();
        RunStore::new(run_dir)
            .save_registry(&JobRegistryRecord::new(kind, ids, run_dir.to_path_buf()))
            .unwrap();
    }

    async fn submit_with(fake: &Arc<FakeScheduler>, submit: SubmitArgs) -> Result<Verdict, AppError> {
        let then_monitor = submit.monitor;
        submit_run::<_, ImmediateTicker>(fake.clone(), submit, then_monitor, CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_submit_then_monitor_array() {
        let temp = TempDir::new().unwrap();
        let base = run_base(&temp);
        let fake = Arc::new(FakeScheduler::new().with_first_id(500));
        fake.set_history("500_1", [Completed]);
        fake.set_history("500_2", [Running, Completed]);

        let submit = submit_args(&[
            "--tasks", "a,b", "--partition", "p", "--pipeline", "main.nf", "--run-base",
            base.as_str(), "--run-id", "r1", "--monitor",
        ]);
        let verdict = submit_with(&fake, submit).await.unwrap();

        assert_eq!(verdict, Verdict::Success);
        let run_dir = base.join("r1");
        let record = RunStore::new(&run_dir).load_registry().unwrap();
        assert_eq!(record.encode(), format!("ARRAY:500:{}", run_dir));
        assert!(run_dir.join("summary.json").exists());
        assert_eq!(fake.history_calls(), 2);
    }

    #[tokio::test]
    async fn test_submit_then_monitor_reports_failed_task() {
        let temp = TempDir::new().unwrap();
        let base = run_base(&temp);
        let fake = Arc::new(FakeScheduler::new().with_first_id(500));
        fake.set_history("500_1", [Completed]);
        fake.set_history("500_2", [Running, Failed]);

        let submit = submit_args(&[
            "--tasks", "a,b", "--partition", "p", "--pipeline", "main.nf", "--run-base",
            base.as_str(), "--run-id", "r1", "--monitor",
        ]);
        let verdict = submit_with(&fake, submit).await.unwrap();

        assert_eq!(verdict, Verdict::Failure);
        assert_eq!(verdict_exit_code(verdict), ExitCode::from(1));
        let summary = fs::read_to_string(base.join("r1").join("summary.json")).unwrap();
        assert!(summary.contains("\"verdict\": \"failure\""));
    }

    #[tokio::test]
    async fn test_failed_submission_leaves_older_registry_alone() {
        let temp = TempDir::new().unwrap();
        let base = run_base(&temp);
        register(&base.join("r1"), JobKind::Array, &["999"]);
        let fake = Arc::new(FakeScheduler::new());
        fake.reject_submit("array");

        let submit = submit_args(&[
            "--tasks", "a,b", "--partition", "p", "--pipeline", "main.nf", "--run-base",
            base.as_str(), "--run-id", "r1", "--cancel-on-abort",
        ]);
        let err = submit_with(&fake, submit).await.unwrap_err();

        assert!(matches!(err, AppError::Submit(_)));
        assert_eq!(err.exit_code(), 1);
        assert!(fake.cancelled().is_empty());
    }

    #[tokio::test]
    async fn test_failed_submission_cancels_only_its_own_jobs() {
        let temp = TempDir::new().unwrap();
        let base = run_base(&temp);
        register(&base.join("r1"), JobKind::Array, &["999"]);
        let fake = Arc::new(FakeScheduler::new());
        fake.reject_submit("bad");

        let submit = submit_args(&[
            "--tasks", "good,bad", "--strategy", "parallel", "--max-concurrent", "1",
            "--partition", "p", "--pipeline", "main.nf", "--run-base", base.as_str(),
            "--run-id", "r1", "--cancel-on-abort",
        ]);
        let err = submit_with(&fake, submit).await.unwrap_err();

        match err {
            AppError::Submit(failure) => assert_eq!(failure.submitted, vec!["1000"]),
            other => panic!("expected a submission error, got {other:?}"),
        }
        assert_eq!(fake.cancelled(), vec!["1000"]);
    }

    #[tokio::test]
    async fn test_monitor_run_dir_uses_task_count() {
        let temp = TempDir::new().unwrap();
        let run_dir = run_base(&temp).join("r2");
        register(&run_dir, JobKind::Array, &["77"]);
        let store = RunStore::new(&run_dir);
        fs::write(store.task_list_path(), "a\nb\n").unwrap();
        let fake = Arc::new(FakeScheduler::new());
        fake.set_history("77_1", [Completed]);
        // Element 2 is not in accounting yet at the first poll.
        fake.set_history("77_2", [Unknown, Completed]);

        let args = Args::try_parse_from(["flotilla", "monitor", "--run-dir", run_dir.as_str()]).unwrap();
        let Command::Monitor(monitor) = args.command else {
            panic!("expected monitor");
        };
        let verdict = monitor_run::<_, ImmediateTicker>(fake, monitor, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(verdict, Verdict::Success);
        let summary = fs::read_to_string(store.summary_path()).unwrap();
        assert!(summary.contains("\"cycles\": 2"));
        assert!(summary.contains("\"total\": 2"));
    }

    #[tokio::test]
    async fn test_monitor_existing_job_id() {
        let fake = Arc::new(FakeScheduler::new());
        fake.set_history("7", [Running, Completed]);
        let args = Args::try_parse_from(["flotilla", "monitor", "--job-id", "7"]).unwrap();
        let Command::Monitor(monitor) = args.command else {
            panic!("expected monitor");
        };

        let verdict = monitor_run::<_, ImmediateTicker>(fake.clone(), monitor, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Success);
        assert_eq!(fake.history_calls(), 2);
    }

    #[tokio::test]
    async fn test_monitor_without_registry_is_config_error() {
        let temp = TempDir::new().unwrap();
        let missing = run_base(&temp).join("nope");
        let args = Args::try_parse_from(["flotilla", "monitor", "--run-dir", missing.as_str()]).unwrap();
        let Command::Monitor(monitor) = args.command else {
            panic!("expected monitor");
        };

        let err = monitor_run::<_, ImmediateTicker>(
            Arc::new(FakeScheduler::new()),
            monitor,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Registry(_)));
        assert_eq!(err.exit_code(), 2);
    }

    fn options(max_cycles: Option<u32>, cancel_on_abort: bool) -> WatchArgs {
        WatchArgs {
            max_cycles,
            cancel_on_abort,
        }
    }

    #[tokio::test]
    async fn test_failed_unit_gives_failure_and_summary() {
        let temp = TempDir::new().unwrap();
        let run_dir = Utf8Path::from_path(temp.path()).unwrap().to_path_buf();
        let fake = Arc::new(FakeScheduler::new());
        fake.set_history("101", [Running, Completed]);
        fake.set_history("102", [Pending, Running, Failed]);
        let record = JobRegistryRecord::new(
            JobKind::Individual,
            vec!["101".into(), "102".into()],
            run_dir.clone(),
        );
        let target = MonitorTarget::from_record(&record, None);

        let verdict = watch(
            fake,
            record,
            &target,
            options(None, false),
            &mut ImmediateTicker::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(verdict, Verdict::Failure);
        let summary = fs::read_to_string(run_dir.join("summary.json")).unwrap();
        assert!(summary.contains("\"verdict\": \"failure\""));
    }

    #[tokio::test]
    async fn test_timeout_cancels_when_asked() {
        let fake = Arc::new(FakeScheduler::new());
        fake.set_history("55", [Running]);
        let record = JobRegistryRecord::from_existing("55").unwrap();
        let target = MonitorTarget::from_record(&record, None);

        let err = watch(
            fake.clone(),
            record,
            &target,
            options(Some(2), true),
            &mut ImmediateTicker::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Monitor(MonitorError::Timeout { cycles: 2, .. })));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(fake.cancelled(), vec!["55"]);
    }

    #[tokio::test]
    async fn test_unknown_run_dir_writes_no_summary() {
        let fake = Arc::new(FakeScheduler::new());
        fake.set_history("7", [Completed]);
        let record = JobRegistryRecord::from_existing("7").unwrap();
        let target = MonitorTarget::from_record(&record, None);

        let verdict = watch(
            fake.clone(),
            record,
            &target,
            options(None, true),
            &mut ImmediateTicker::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(verdict, Verdict::Success);
        assert!(fake.cancelled().is_empty());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(AppError::Config(ConfigError::NoTasks).exit_code(), 2);
        assert_eq!(
            AppError::Config(ConfigError::NoMonitorTarget).exit_code(),
            2
        );
        assert_eq!(verdict_exit_code(Verdict::Success), ExitCode::SUCCESS);
    }
}
