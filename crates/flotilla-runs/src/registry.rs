//! The job registry record handed from submission to monitoring.
//!
//! Serialized as a single line, `KIND:ID[,ID...]:RUN_DIR`.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Run dir recorded when monitoring jobs that flotilla did not submit.
pub const UNKNOWN_RUN_DIR: &str = "unknown";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Malformed job registry record {record:?}: {reason}")]
    Malformed { record: String, reason: String },
}

/// How the registered job ids map onto tasks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    /// One array job; its elements are the units
    Array,
    /// One job per task
    Individual,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Array => "ARRAY",
            JobKind::Individual => "INDIVIDUAL",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ARRAY" => Ok(JobKind::Array),
            "INDIVIDUAL" => Ok(JobKind::Individual),
            other => Err(format!("unknown job kind {:?}", other)),
        }
    }
}

/// What was submitted for a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobRegistryRecord {
    pub kind: JobKind,

    /// Scheduler job ids. Submission order for sequential runs, completion
    /// order for parallel runs, a single parent id for arrays.
    pub ids: Vec<String>,

    /// Run directory, or `unknown` for re-attached jobs.
    pub run_dir: Utf8PathBuf,
}

fn is_valid_job_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_digit() || c == '_')
}

impl JobRegistryRecord {
    pub fn new(kind: JobKind, ids: Vec<String>, run_dir: Utf8PathBuf) -> Self {
        Self { kind, ids, run_dir }
    }

    /// Build a record for jobs submitted outside this run.
    ///
    /// A comma separated list is taken as individual jobs, a single id as
    /// an array job. A plain job monitored as an array still resolves to
    /// one unit.
    pub fn from_existing(job_ids: &str) -> Result<Self, RegistryError> {
        let job_ids = job_ids.trim();
        let kind = if job_ids.contains(',') {
            JobKind::Individual
        } else {
            JobKind::Array
        };
        let ids = parse_ids(job_ids, job_ids)?;
        Ok(Self::new(kind, ids, Utf8PathBuf::from(UNKNOWN_RUN_DIR)))
    }

    /// Run dir if this record came from a flotilla submission.
    pub fn known_run_dir(&self) -> Option<&Utf8Path> {
        (self.run_dir.as_str() != UNKNOWN_RUN_DIR).then_some(self.run_dir.as_path())
    }

    pub fn encode(&self) -> String {
        format!("{}:{}:{}", self.kind, self.ids.join(","), self.run_dir)
    }
}

fn parse_ids(ids: &str, record: &str) -> Result<Vec<String>, RegistryError> {
    let ids: Vec<String> = ids.split(',').map(|id| id.trim().to_string()).collect();
    if let Some(bad) = ids.iter().find(|id| !is_valid_job_id(id)) {
        return Err(RegistryError::Malformed {
            record: record.to_string(),
            reason: format!("invalid job id {:?}", bad),
        });
    }
    let mut seen = HashSet::new();
    if let Some(dup) = ids.iter().find(|id| !seen.insert(*id)) {
        return Err(RegistryError::Malformed {
            record: record.to_string(),
            reason: format!("job id {:?} listed twice", dup),
        });
    }
    Ok(ids)
}

impl fmt::Display for JobRegistryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for JobRegistryRecord {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim_end_matches(['\r', '\n']);
        let malformed = |reason: String| RegistryError::Malformed {
            record: line.to_string(),
            reason,
        };

        // The run dir is everything after the second colon and may contain colons.
        let mut parts = line.splitn(3, ':');
        let (Some(kind), Some(ids), Some(run_dir)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed("expected KIND:IDS:RUN_DIR".to_string()));
        };

        let kind = kind.trim().parse::<JobKind>().map_err(malformed)?;
        let ids = parse_ids(ids, line)?;
        if kind == JobKind::Array && ids.len() != 1 {
            return Err(malformed(format!(
                "ARRAY records carry exactly one id, got {}",
                ids.len()
            )));
        }
        if run_dir.trim().is_empty() {
            return Err(malformed("empty run dir".to_string()));
        }

        Ok(Self::new(kind, ids, Utf8PathBuf::from(run_dir)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_array() {
        let record =
            JobRegistryRecord::new(JobKind::Array, vec!["4242".into()], "/scratch/runs/r1".into());
        assert_eq!(record.encode(), "ARRAY:4242:/scratch/runs/r1");
        assert_eq!(record.encode().parse::<JobRegistryRecord>().unwrap(), record);
    }

    #[test]
    fn test_round_trip_individual_multi_id() {
        let record = JobRegistryRecord::new(
            JobKind::Individual,
            vec!["102".into(), "101".into(), "105".into()],
            "runs/20240101_120000".into(),
        );
        assert_eq!(record.encode(), "INDIVIDUAL:102,101,105:runs/20240101_120000");
        assert_eq!(record.encode().parse::<JobRegistryRecord>().unwrap(), record);
    }

    #[test]
    fn test_round_trip_run_dir_with_colon() {
        let record = JobRegistryRecord::new(JobKind::Individual, vec!["1".into()], "/data/a:b".into());
        assert_eq!(record.encode().parse::<JobRegistryRecord>().unwrap(), record);
    }

    #[test]
    fn test_decode_tolerates_trailing_newline() {
        let record: JobRegistryRecord = "ARRAY:55:/tmp/run\n".parse().unwrap();
        assert_eq!(record.run_dir, "/tmp/run");
    }

    #[test]
    fn test_decode_rejects_malformed() {
        for bad in [
            "",
            "ARRAY",
            "ARRAY:55",
            "BATCH:55:/tmp",
            "ARRAY::/tmp",
            "INDIVIDUAL:1,,2:/tmp",
            "ARRAY:1,2:/tmp",
            "INDIVIDUAL:7,7:/r",
            "INDIVIDUAL:7,8,7:/r",
            "ARRAY:55:",
            "ARRAY:5x:/tmp",
        ] {
            assert!(
                matches!(bad.parse::<JobRegistryRecord>(), Err(RegistryError::Malformed { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_from_existing_single_id_is_array() {
        let record = JobRegistryRecord::from_existing("55").unwrap();
        assert_eq!(record.encode(), "ARRAY:55:unknown");
        assert!(record.known_run_dir().is_none());
    }

    #[test]
    fn test_from_existing_list_is_individual() {
        let record = JobRegistryRecord::from_existing("55, 56").unwrap();
        assert_eq!(record.kind, JobKind::Individual);
        assert_eq!(record.ids, vec!["55", "56"]);
        assert_eq!(record.encode(), "INDIVIDUAL:55,56:unknown");
    }

    #[test]
    fn test_from_existing_rejects_empty() {
        assert!(JobRegistryRecord::from_existing("").is_err());
        assert!(JobRegistryRecord::from_existing("55,").is_err());
        assert!(JobRegistryRecord::from_existing("7,7").is_err());
    }
}
