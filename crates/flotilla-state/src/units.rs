//! Mapping scheduler rows onto monitored units.

use flotilla_runs::{JobKind, JobRegistryRecord};
use flotilla_slurm::{StateRow, UnitState};
use serde::Serialize;
use std::collections::HashMap;

/// The state of one unit at one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub unit: String,
    pub state: UnitState,
}

impl Observation {
    pub fn new(unit: impl Into<String>, state: UnitState) -> Self {
        Self {
            unit: unit.into(),
            state,
        }
    }
}

/// What the monitor watches, derived from a registry record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorTarget {
    /// One array job. Elements are `<parent>_<index>`, discovered each
    /// poll. `expected` is the declared array size when known.
    Array {
        parent: String,
        expected: Option<usize>,
    },
    /// One job per task.
    Individual { ids: Vec<String> },
}

impl MonitorTarget {
    /// `expected` is the task count from the run's task list, if any.
    pub fn from_record(record: &JobRegistryRecord, expected: Option<usize>) -> Self {
        match record.kind {
            JobKind::Array => MonitorTarget::Array {
                parent: record.ids.first().cloned().unwrap_or_default(),
                expected: expected.filter(|&n| n > 0),
            },
            JobKind::Individual => MonitorTarget::Individual {
                ids: record.ids.clone(),
            },
        }
    }

    pub fn single(id: impl Into<String>) -> Self {
        MonitorTarget::Individual {
            ids: vec![id.into()],
        }
    }

    /// Ids to hand to the historical backend.
    pub fn query_ids(&self) -> Vec<String> {
        match self {
            MonitorTarget::Array { parent, .. } => vec![parent.clone()],
            MonitorTarget::Individual { ids } => ids.clone(),
        }
    }

    /// Units known up front. None when an array's size is unknown.
    pub fn expected_units(&self) -> Option<Vec<String>> {
        match self {
            MonitorTarget::Array {
                parent,
                expected: Some(1),
            } => Some(vec![parent.clone()]),
            MonitorTarget::Array {
                parent,
                expected: Some(n),
            } => Some((1..=*n).map(|i| format!("{}_{}", parent, i)).collect()),
            MonitorTarget::Array { expected: None, .. } => None,
            MonitorTarget::Individual { ids } => Some(ids.clone()),
        }
    }

    /// Map a scheduler row onto the units it describes.
    ///
    /// Pending array elements are reported as one aggregate row such as
    /// `123_[4-9%2]`; those expand to every index they cover.
    pub fn units_for_row(&self, row_id: &str) -> Vec<String> {
        match self {
            MonitorTarget::Individual { ids } => ids
                .iter()
                .filter(|id| id.as_str() == row_id)
                .cloned()
                .collect(),
            MonitorTarget::Array { parent, expected } => {
                if row_id == parent {
                    return if matches!(expected, None | Some(1)) {
                        vec![parent.clone()]
                    } else {
                        Vec::new()
                    };
                }
                let Some(rest) = row_id
                    .strip_prefix(parent.as_str())
                    .and_then(|r| r.strip_prefix('_'))
                else {
                    return Vec::new();
                };
                if *expected == Some(1) {
                    return Vec::new();
                }
                expand_indices(rest, *expected)
                    .into_iter()
                    .map(|i| format!("{}_{}", parent, i))
                    .collect()
            }
        }
    }

    /// Fold rows into a unit map. Existing entries are kept, so callers
    /// merge the authoritative backend first.
    pub fn absorb(&self, known: &mut HashMap<String, UnitState>, rows: &[StateRow]) {
        for row in rows {
            for unit in self.units_for_row(&row.id) {
                known.entry(unit).or_insert(row.state);
            }
        }
    }

    /// Ids the live backend should be asked about, given what accounting
    /// already answered.
    pub fn live_query_ids(&self, known: &HashMap<String, UnitState>) -> Vec<String> {
        match self {
            MonitorTarget::Individual { ids } => ids
                .iter()
                .filter(|id| !known.contains_key(*id))
                .cloned()
                .collect(),
            MonitorTarget::Array { parent, .. } => {
                let complete = self
                    .expected_units()
                    .is_some_and(|units| units.iter().all(|u| known.contains_key(u)));
                if complete {
                    Vec::new()
                } else {
                    vec![parent.clone()]
                }
            }
        }
    }

    /// Turn a unit map into this poll's observations. Expected units that
    /// no backend answered for are `Unknown`.
    pub fn observations(&self, mut known: HashMap<String, UnitState>) -> Vec<Observation> {
        match self.expected_units() {
            Some(units) => units
                .into_iter()
                .map(|unit| {
                    let state = known.remove(&unit).unwrap_or(UnitState::Unknown);
                    Observation::new(unit, state)
                })
                .collect(),
            None => {
                let mut observations: Vec<Observation> = known
                    .into_iter()
                    .map(|(unit, state)| Observation::new(unit, state))
                    .collect();
                observations.sort_by_key(|o| array_index(&o.unit));
                observations
            }
        }
    }

    /// Number of units the run is complete at, when known up front.
    pub fn expected_total(&self) -> Option<usize> {
        match self {
            MonitorTarget::Array { expected, .. } => *expected,
            MonitorTarget::Individual { ids } => Some(ids.len()),
        }
    }
}

fn array_index(unit: &str) -> u64 {
    unit.rsplit_once('_')
        .and_then(|(_, idx)| idx.parse().ok())
        .unwrap_or(0)
}

/// Expand `4`, `[4-9%2]` or `[1,3,5-7]` into array indices, bounded by
/// the declared size when known.
fn expand_indices(text: &str, expected: Option<usize>) -> Vec<usize> {
    let in_bounds = |i: &usize| *i >= 1 && expected.is_none_or(|n| *i <= n);

    if let Ok(index) = text.parse::<usize>() {
        return Some(index).filter(in_bounds).into_iter().collect();
    }

    let Some(inner) = text.strip_prefix('[').and_then(|s| s.strip_suffix(']')) else {
        return Vec::new();
    };
    let inner = inner.split('%').next().unwrap_or(inner);

    let mut indices = Vec::new();
    for part in inner.split(',') {
        let (start, end) = match part.split_once('-') {
            Some((a, b)) => (a.parse::<usize>(), b.parse::<usize>()),
            None => (part.parse::<usize>(), part.parse::<usize>()),
        };
        let (Ok(start), Ok(end)) = (start, end) else {
            tracing::warn!("Unparsable array index range {:?}", part);
            continue;
        };
        let end = match expected {
            Some(n) => end.min(n),
            None => end,
        };
        indices.extend((start..=end).filter(in_bounds));
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(parent: &str, expected: Option<usize>) -> MonitorTarget {
        MonitorTarget::Array {
            parent: parent.to_string(),
            expected,
        }
    }

    #[test]
    fn test_from_record() {
        let record: JobRegistryRecord = "ARRAY:55:unknown".parse().unwrap();
        assert_eq!(MonitorTarget::from_record(&record, None), array("55", None));

        let record: JobRegistryRecord = "INDIVIDUAL:101,102:/r".parse().unwrap();
        assert_eq!(
            MonitorTarget::from_record(&record, Some(7)),
            MonitorTarget::Individual {
                ids: vec!["101".into(), "102".into()]
            }
        );
    }

    #[test]
    fn test_expand_indices() {
        assert_eq!(expand_indices("4", None), vec![4]);
        assert_eq!(expand_indices("[2-5%2]", None), vec![2, 3, 4, 5]);
        assert_eq!(expand_indices("[1,3,5-6]", None), vec![1, 3, 5, 6]);
        assert_eq!(expand_indices("[2-9]", Some(4)), vec![2, 3, 4]);
        assert_eq!(expand_indices("7", Some(4)), Vec::<usize>::new());
        assert_eq!(expand_indices("0", None), Vec::<usize>::new());
        assert_eq!(expand_indices("4.batch", None), Vec::<usize>::new());
    }

    #[test]
    fn test_units_for_array_rows() {
        let target = array("100", Some(3));
        assert_eq!(target.units_for_row("100_2"), vec!["100_2"]);
        assert_eq!(target.units_for_row("100_[2-3]"), vec!["100_2", "100_3"]);
        assert!(target.units_for_row("100").is_empty());
        assert!(target.units_for_row("1000_2").is_empty());
        assert!(target.units_for_row("100_4").is_empty());
    }

    #[test]
    fn test_degenerate_array_is_parent() {
        let target = array("55", Some(1));
        assert_eq!(target.expected_units(), Some(vec!["55".to_string()]));
        assert_eq!(target.units_for_row("55"), vec!["55"]);

        // Re-attached without a task list: a plain job still resolves.
        assert_eq!(array("55", None).units_for_row("55"), vec!["55"]);
    }

    #[test]
    fn test_history_wins_over_live() {
        let target = array("100", Some(2));
        let mut known = HashMap::new();
        target.absorb(&mut known, &[StateRow::new("100_1", UnitState::Completed)]);
        assert_eq!(target.live_query_ids(&known), vec!["100"]);

        target.absorb(
            &mut known,
            &[
                StateRow::new("100_1", UnitState::Running),
                StateRow::new("100_2", UnitState::Running),
            ],
        );
        assert_eq!(
            target.observations(known),
            vec![
                Observation::new("100_1", UnitState::Completed),
                Observation::new("100_2", UnitState::Running),
            ]
        );
    }

    #[test]
    fn test_individual_unanswered_is_unknown() {
        let target = MonitorTarget::Individual {
            ids: vec!["1".into(), "2".into()],
        };
        let mut known = HashMap::new();
        target.absorb(&mut known, &[StateRow::new("2", UnitState::Pending)]);
        assert_eq!(target.live_query_ids(&known), vec!["1"]);
        assert_eq!(
            target.observations(known),
            vec![
                Observation::new("1", UnitState::Unknown),
                Observation::new("2", UnitState::Pending),
            ]
        );
    }

    #[test]
    fn test_undeclared_array_discovers_units_in_index_order() {
        let target = array("9", None);
        let mut known = HashMap::new();
        target.absorb(
            &mut known,
            &[
                StateRow::new("9_10", UnitState::Pending),
                StateRow::new("9_2", UnitState::Running),
            ],
        );
        let units: Vec<_> = target.observations(known).into_iter().map(|o| o.unit).collect();
        assert_eq!(units, vec!["9_2", "9_10"]);
        assert_eq!(target.expected_total(), None);
    }
}
