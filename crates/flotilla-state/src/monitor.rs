//! The monitor loop: poll, aggregate, wait, until every unit is terminal.

use crate::aggregate::{AggregateSnapshot, StatusAggregator, Verdict};
use crate::poller::StatePoller;
use crate::ticker::Ticker;
use crate::units::{MonitorTarget, Observation};
use chrono::{DateTime, Local};
use flotilla_runs::JobRegistryRecord;
use flotilla_slurm::{FailureAnalysis, Scheduler};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failed units analyzed in detail at the end of a run.
const MAX_ANALYZED_FAILURES: usize = 10;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MonitorError {
    #[error("Gave up after {cycles} polls with units still active ({snapshot})")]
    Timeout {
        cycles: u32,
        snapshot: AggregateSnapshot,
    },
    #[error("Monitoring interrupted after {cycles} polls ({snapshot})")]
    Cancelled {
        cycles: u32,
        snapshot: AggregateSnapshot,
    },
}

/// A run that reached a terminal state for every unit.
#[derive(Debug, Clone)]
pub struct MonitorOutcome {
    pub snapshot: AggregateSnapshot,
    pub units: Vec<Observation>,
    pub cycles: u32,
}

impl MonitorOutcome {
    pub fn verdict(&self) -> Verdict {
        self.snapshot.verdict()
    }

    pub fn failed_units(&self) -> Vec<&str> {
        self.units
            .iter()
            .filter(|o| o.state.is_failure())
            .map(|o| o.unit.as_str())
            .collect()
    }
}

pub struct Monitor<S> {
    poller: StatePoller<S>,
    aggregator: StatusAggregator,
    max_cycles: Option<u32>,
}

impl<S: Scheduler> Monitor<S> {
    pub fn new(scheduler: Arc<S>) -> Self {
        Self {
            poller: StatePoller::new(scheduler),
            aggregator: StatusAggregator::new(),
            max_cycles: None,
        }
    }

    /// Stop with `MonitorError::Timeout` after this many polls.
    pub fn with_max_cycles(mut self, max_cycles: Option<u32>) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    /// Poll `target` until every unit is terminal.
    ///
    /// The first poll happens immediately; later polls wait on `ticker`.
    /// Returns at the first cycle whose snapshot is done.
    pub async fn run<T: Ticker>(
        &mut self,
        target: &MonitorTarget,
        ticker: &mut T,
        cancel: &CancellationToken,
    ) -> Result<MonitorOutcome, MonitorError> {
        tracing::info!("Monitoring {}", target.query_ids().join(","));
        let mut cycles: u32 = 0;

        loop {
            let mut observations = self.poller.poll(target).await;
            cycles += 1;

            // An undeclared array learns its units from the rows; one that
            // stops answering is still part of the run.
            if target.expected_total().is_none() {
                self.aggregator.fill_unanswered(&mut observations);
            }
            let total = target.expected_total().unwrap_or(observations.len());
            let report = self.aggregator.observe(&observations, total);
            let snapshot = report.snapshot;
            tracing::info!("Poll {}: {}", cycles, snapshot);

            if snapshot.is_done() {
                tracing::info!(
                    "All {} units finished after {} polls: {:?}",
                    snapshot.total,
                    cycles,
                    snapshot.verdict()
                );
                return Ok(MonitorOutcome {
                    snapshot,
                    units: observations,
                    cycles,
                });
            }

            if self.max_cycles.is_some_and(|max| cycles >= max) {
                return Err(MonitorError::Timeout { cycles, snapshot });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(MonitorError::Cancelled { cycles, snapshot });
                }
                _ = ticker.tick() => {}
            }
        }
    }

    /// Explain why failed units failed. Analysis errors are logged and
    /// skipped.
    pub async fn analyze_failures(&self, outcome: &MonitorOutcome) -> Vec<FailureAnalysis> {
        let failed = outcome.failed_units();
        if failed.len() > MAX_ANALYZED_FAILURES {
            tracing::warn!(
                "{} units failed, analyzing the first {}",
                failed.len(),
                MAX_ANALYZED_FAILURES
            );
        }

        let mut analyses = Vec::new();
        for unit in failed.into_iter().take(MAX_ANALYZED_FAILURES) {
            match self.poller.scheduler().analyze_failure(unit).await {
                Ok(analysis) => {
                    tracing::warn!("{}: {}", unit, analysis.explanation);
                    tracing::info!("{}: {}", unit, analysis.suggestion);
                    analyses.push(analysis);
                }
                Err(e) => tracing::warn!("Could not analyze failure of {}: {}", unit, e),
            }
        }
        analyses
    }
}

/// End-of-run record written to `summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub record: JobRegistryRecord,
    pub verdict: Verdict,
    pub snapshot: AggregateSnapshot,
    pub units: Vec<Observation>,
    pub cycles: u32,
    pub finished_at: DateTime<Local>,
}

impl RunSummary {
    pub fn new(record: JobRegistryRecord, outcome: &MonitorOutcome) -> Self {
        Self {
            record,
            verdict: outcome.verdict(),
            snapshot: outcome.snapshot,
            units: outcome.units.clone(),
            cycles: outcome.cycles,
            finished_at: Local::now(),
        }
    }
}
