//! In-memory `Scheduler` for tests.
//!
//! Each job id carries a scripted timeline per backend. Every query that
//! touches an id advances its timeline by one step, and the last state
//! repeats forever. `Unknown` in a timeline means the backend returns no
//! row for that id at that step.

use crate::failure::{FailureAnalysis, FailureError, FailureMode};
use crate::sacct::SacctError;
use crate::sbatch::SbatchError;
use crate::scancel::ScancelError;
use crate::scheduler::Scheduler;
use crate::squeue::SqueueError;
use crate::types::{StateRow, UnitState};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Timeline {
    states: Vec<UnitState>,
    cursor: usize,
}

impl Timeline {
    fn new(states: impl IntoIterator<Item = UnitState>) -> Self {
        Self {
            states: states.into_iter().collect(),
            cursor: 0,
        }
    }

    fn advance(&mut self) -> UnitState {
        let state = self
            .states
            .get(self.cursor.min(self.states.len().saturating_sub(1)))
            .copied()
            .unwrap_or(UnitState::Unknown);
        self.cursor += 1;
        state
    }
}

#[derive(Debug, Default)]
struct Inner {
    history: HashMap<String, Timeline>,
    live: HashMap<String, Timeline>,
    fail_queries: bool,
    submit_delays: HashMap<String, Duration>,
    submit_failures: HashSet<String>,
    script_states: HashMap<String, Vec<UnitState>>,
    failures: HashMap<String, FailureAnalysis>,
    submitted: Vec<(Utf8PathBuf, String)>,
    cancelled: Vec<String>,
    history_calls: usize,
    live_calls: usize,
}

/// Scripted scheduler. Job ids are handed out from a counter when a
/// submission completes, starting at 1000.
#[derive(Debug)]
pub struct FakeScheduler {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for FakeScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeScheduler {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU64::new(1000),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Hand out job ids starting at `first`.
    pub fn with_first_id(self, first: u64) -> Self {
        self.next_id.store(first, Ordering::SeqCst);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_history(&self, id: &str, states: impl IntoIterator<Item = UnitState>) {
        self.lock().history.insert(id.to_string(), Timeline::new(states));
    }

    pub fn set_live(&self, id: &str, states: impl IntoIterator<Item = UnitState>) {
        self.lock().live.insert(id.to_string(), Timeline::new(states));
    }

    /// Make both query backends return errors until switched off again.
    pub fn fail_queries(&self, fail: bool) {
        self.lock().fail_queries = fail;
    }

    /// Delay submissions of the script whose file stem is `stem`.
    pub fn delay_submit(&self, stem: &str, delay: Duration) {
        self.lock().submit_delays.insert(stem.to_string(), delay);
    }

    /// Reject submissions of the script whose file stem is `stem`.
    pub fn reject_submit(&self, stem: &str) {
        self.lock().submit_failures.insert(stem.to_string());
    }

    /// Once the script with file stem `stem` is submitted, its job id
    /// reports `states` from accounting.
    pub fn on_submit(&self, stem: &str, states: impl IntoIterator<Item = UnitState>) {
        self.lock()
            .script_states
            .insert(stem.to_string(), states.into_iter().collect());
    }

    pub fn set_failure(&self, id: &str, mode: FailureMode, raw_state: &str) {
        self.lock()
            .failures
            .insert(id.to_string(), FailureAnalysis::from_mode(id, mode, raw_state));
    }

    /// Submitted scripts and their ids, in completion order.
    pub fn submitted(&self) -> Vec<(Utf8PathBuf, String)> {
        self.lock().submitted.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.lock().cancelled.clone()
    }

    pub fn history_calls(&self) -> usize {
        self.lock().history_calls
    }

    pub fn live_calls(&self) -> usize {
        self.lock().live_calls
    }

    /// Highest number of submissions that were in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Rows for every timeline matching a requested id. An array parent id
/// also matches its `<parent>_<index>` elements.
fn scripted_rows(timelines: &mut HashMap<String, Timeline>, ids: &[String]) -> Vec<StateRow> {
    let mut keys: Vec<String> = timelines
        .keys()
        .filter(|key| {
            ids.iter().any(|id| {
                *key == id
                    || key
                        .strip_prefix(id.as_str())
                        .is_some_and(|rest| rest.starts_with('_'))
            })
        })
        .cloned()
        .collect();
    keys.sort();

    keys.into_iter()
        .filter_map(|key| {
            let state = timelines.get_mut(&key)?.advance();
            (state != UnitState::Unknown).then(|| StateRow::new(key, state))
        })
        .collect()
}

fn script_stem(script: &Utf8Path) -> String {
    script.file_stem().unwrap_or(script.as_str()).to_string()
}

impl Scheduler for FakeScheduler {
    async fn submit(&self, script: &Utf8Path) -> Result<String, SbatchError> {
        let stem = script_stem(script);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let (delay, reject) = {
            let inner = self.lock();
            (
                inner.submit_delays.get(&stem).copied(),
                inner.submit_failures.contains(&stem),
            )
        };
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if reject {
            return Err(SbatchError::MissingJobId {
                script: script.to_string(),
                output: "sbatch: error: Batch job submission failed".to_string(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let mut inner = self.lock();
        if let Some(states) = inner.script_states.get(&stem).cloned() {
            inner.history.insert(id.clone(), Timeline::new(states));
        }
        inner.submitted.push((script.to_path_buf(), id.clone()));
        Ok(id)
    }

    async fn query_history(&self, ids: &[String]) -> Result<Vec<StateRow>, SacctError> {
        let mut inner = self.lock();
        inner.history_calls += 1;
        if inner.fail_queries {
            return Err(SacctError::ExecutionError(
                "slurmdbd: connection refused".to_string(),
            ));
        }
        Ok(scripted_rows(&mut inner.history, ids))
    }

    async fn query_live(&self, ids: &[String]) -> Result<Vec<StateRow>, SqueueError> {
        let mut inner = self.lock();
        inner.live_calls += 1;
        if inner.fail_queries {
            return Err(SqueueError::ExecutionError(
                "slurm_load_jobs error: Unable to contact slurm controller".to_string(),
            ));
        }
        Ok(scripted_rows(&mut inner.live, ids))
    }

    async fn cancel(&self, ids: &[String]) -> Result<(), ScancelError> {
        self.lock().cancelled.extend(ids.iter().cloned());
        Ok(())
    }

    async fn analyze_failure(&self, id: &str) -> Result<FailureAnalysis, FailureError> {
        self.lock()
            .failures
            .get(id)
            .cloned()
            .ok_or_else(|| FailureError::NotFound(id.to_string()))
    }
}
