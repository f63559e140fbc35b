//! Per-poll status aggregation and transition tracking.

use crate::units::Observation;
use flotilla_slurm::{StateClass, UnitState};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Success,
    Failure,
}

/// Counts for one poll. Rebuilt every cycle, never persisted mid-run.
///
/// `total == running + pending + completed + failed + other` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateSnapshot {
    pub total: usize,
    pub running: usize,
    /// PENDING and CONFIGURING
    pub pending: usize,
    /// Terminal success
    pub completed: usize,
    /// Terminal failure
    pub failed: usize,
    /// SUSPENDED, UNKNOWN and units not reported at all
    pub other: usize,
}

impl AggregateSnapshot {
    /// Count observations against the expected total. A total smaller
    /// than the number of observations is raised to match.
    pub fn from_observations(observations: &[Observation], total: usize) -> Self {
        let mut snapshot = AggregateSnapshot {
            total: total.max(observations.len()),
            ..Default::default()
        };
        for obs in observations {
            match (obs.state.class(), obs.state) {
                (StateClass::TerminalSuccess, _) => snapshot.completed += 1,
                (StateClass::TerminalFailure, _) => snapshot.failed += 1,
                (StateClass::NonTerminal, UnitState::Running) => snapshot.running += 1,
                (StateClass::NonTerminal, UnitState::Pending | UnitState::Configuring) => {
                    snapshot.pending += 1
                }
                (StateClass::NonTerminal, _) => {}
            }
        }
        snapshot.other = snapshot.total
            - (snapshot.running + snapshot.pending + snapshot.completed + snapshot.failed);
        snapshot
    }

    /// Every unit has reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.total > 0 && self.completed + self.failed == self.total
    }

    pub fn verdict(&self) -> Verdict {
        if self.failed > 0 {
            Verdict::Failure
        } else {
            Verdict::Success
        }
    }
}

impl fmt::Display for AggregateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} total: {} running, {} pending, {} completed, {} failed",
            self.total, self.running, self.pending, self.completed, self.failed
        )?;
        if self.other > 0 {
            write!(f, ", {} other", self.other)?;
        }
        Ok(())
    }
}

/// A unit changed state between two polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub unit: String,
    pub from: UnitState,
    pub to: UnitState,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.unit, self.from, self.to)
    }
}

/// Result of one aggregation cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub snapshot: AggregateSnapshot,
    pub transitions: Vec<Transition>,
}

/// Remembers each unit's last state so only changes are reported.
#[derive(Debug, Default)]
pub struct StatusAggregator {
    last_seen: HashMap<String, UnitState>,
}

impl StatusAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one poll's observations in.
    ///
    /// A unit's first sighting is not a transition. The last-seen map
    /// only drives logging; termination is decided from the snapshot.
    pub fn observe(&mut self, observations: &[Observation], total: usize) -> CycleReport {
        let mut transitions = Vec::new();
        for obs in observations {
            match self.last_seen.insert(obs.unit.clone(), obs.state) {
                Some(previous) if previous != obs.state => {
                    let transition = Transition {
                        unit: obs.unit.clone(),
                        from: previous,
                        to: obs.state,
                    };
                    if obs.state.is_failure() {
                        tracing::warn!("{}", transition);
                    } else {
                        tracing::info!("{}", transition);
                    }
                    transitions.push(transition);
                }
                _ => {}
            }
        }

        CycleReport {
            snapshot: AggregateSnapshot::from_observations(observations, total),
            transitions,
        }
    }

    /// Add every unit seen in an earlier cycle but missing from this
    /// poll as `Unknown`. The unit set of a run never shrinks.
    pub fn fill_unanswered(&self, observations: &mut Vec<Observation>) {
        let mut missing: Vec<String> = {
            let present: HashSet<&str> = observations.iter().map(|o| o.unit.as_str()).collect();
            self.last_seen
                .keys()
                .filter(|unit| !present.contains(unit.as_str()))
                .cloned()
                .collect()
        };
        missing.sort();
        observations.extend(
            missing
                .into_iter()
                .map(|unit| Observation::new(unit, UnitState::Unknown)),
        );
    }

    pub fn last_seen(&self, unit: &str) -> Option<UnitState> {
        self.last_seen.get(unit).copied()
    }
}
