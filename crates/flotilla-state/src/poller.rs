//! Query the scheduler for the state of every monitored unit.

use crate::ticker::Ticker;
use crate::units::{MonitorTarget, Observation};
use flotilla_slurm::{Scheduler, UnitState};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WaitError {
    #[error("Interrupted while waiting for job {id} (last state {state})")]
    Cancelled { id: String, state: UnitState },
}

/// Polls accounting first and the live queue for whatever accounting
/// did not answer.
pub struct StatePoller<S> {
    scheduler: Arc<S>,
}

impl<S: Scheduler> StatePoller<S> {
    pub fn new(scheduler: Arc<S>) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Arc<S> {
        &self.scheduler
    }

    /// One poll of every unit of `target`.
    ///
    /// A failing backend is logged and treated as having no answer; the
    /// affected units read `Unknown` and are retried on the next poll.
    pub async fn poll(&self, target: &MonitorTarget) -> Vec<Observation> {
        let mut known: HashMap<String, UnitState> = HashMap::new();

        match self.scheduler.query_history(&target.query_ids()).await {
            Ok(rows) => target.absorb(&mut known, &rows),
            Err(e) => tracing::warn!("Accounting query unavailable: {}", e),
        }

        let live_ids = target.live_query_ids(&known);
        if !live_ids.is_empty() {
            match self.scheduler.query_live(&live_ids).await {
                Ok(rows) => target.absorb(&mut known, &rows),
                Err(e) => tracing::warn!("Live queue query unavailable: {}", e),
            }
        }

        target.observations(known)
    }

    /// Current state of a single job.
    pub async fn poll_unit(&self, id: &str) -> UnitState {
        self.poll(&MonitorTarget::single(id))
            .await
            .into_iter()
            .next()
            .map(|o| o.state)
            .unwrap_or(UnitState::Unknown)
    }

    /// Poll one job until it reaches a terminal state.
    pub async fn wait_for_unit<T: Ticker>(
        &self,
        id: &str,
        ticker: &mut T,
        cancel: &CancellationToken,
    ) -> Result<UnitState, WaitError> {
        let mut last: Option<UnitState> = None;
        loop {
            let state = self.poll_unit(id).await;
            if last != Some(state) {
                tracing::info!("Job {} is {}", id, state);
                last = Some(state);
            }
            if state.is_terminal() {
                return Ok(state);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(WaitError::Cancelled { id: id.to_string(), state });
                }
                _ = ticker.tick() => {}
            }
        }
    }
}
