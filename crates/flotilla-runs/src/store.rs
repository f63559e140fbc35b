use crate::registry::{JobRegistryRecord, RegistryError};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::fs;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

fn io_error(path: &Utf8Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Files flotilla keeps in a run directory.
pub struct RunStore {
    run_dir: Utf8PathBuf,
}

impl RunStore {
    pub fn new(run_dir: &Utf8Path) -> Self {
        Self {
            run_dir: run_dir.to_path_buf(),
        }
    }

    pub fn run_dir(&self) -> &Utf8Path {
        &self.run_dir
    }

    /// Single-line registry record.
    pub fn registry_path(&self) -> Utf8PathBuf {
        self.run_dir.join("job_registry.txt")
    }

    /// Newline-delimited task names, line N is array index N.
    pub fn task_list_path(&self) -> Utf8PathBuf {
        self.run_dir.join("tasks.txt")
    }

    pub fn summary_path(&self) -> Utf8PathBuf {
        self.run_dir.join("summary.json")
    }

    /// Write the registry record.
    ///
    /// Creates the run directory if needed.
    pub fn save_registry(&self, record: &JobRegistryRecord) -> Result<(), StoreError> {
        fs::create_dir_all(&self.run_dir).map_err(io_error(&self.run_dir))?;
        let path = self.registry_path();
        fs::write(&path, format!("{}\n", record.encode())).map_err(io_error(&path))?;
        tracing::info!("Wrote job registry {}: {}", path, record);
        Ok(())
    }

    /// Read and validate the registry record.
    pub fn load_registry(&self) -> Result<JobRegistryRecord, StoreError> {
        let path = self.registry_path();
        let content = fs::read_to_string(&path).map_err(io_error(&path))?;
        let line = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        Ok(line.parse::<JobRegistryRecord>()?)
    }

    /// Number of tasks in the task list artifact, if one exists.
    pub fn load_task_count(&self) -> Result<Option<usize>, StoreError> {
        let path = self.task_list_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(io_error(&path))?;
        Ok(Some(content.lines().filter(|l| !l.trim().is_empty()).count()))
    }

    /// Save the end-of-run summary as pretty JSON.
    pub fn save_summary<T: Serialize>(&self, summary: &T) -> Result<(), StoreError> {
        fs::create_dir_all(&self.run_dir).map_err(io_error(&self.run_dir))?;
        let path = self.summary_path();
        let content = serde_json::to_string_pretty(summary)?;
        fs::write(&path, content).map_err(io_error(&path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::JobKind;
    use tempfile::TempDir;

    fn utf8(temp: &TempDir) -> Utf8PathBuf {
        Utf8Path::from_path(temp.path()).unwrap().to_path_buf()
    }

    #[test]
    fn test_save_and_load_registry() {
        let temp = TempDir::new().unwrap();
        let run_dir = utf8(&temp).join("run1");
        let store = RunStore::new(&run_dir);

        let record = JobRegistryRecord::new(
            JobKind::Individual,
            vec!["101".into(), "102".into()],
            run_dir.clone(),
        );
        store.save_registry(&record).unwrap();
        assert!(store.registry_path().exists());

        let content = fs::read_to_string(store.registry_path()).unwrap();
        assert_eq!(content, format!("INDIVIDUAL:101,102:{}\n", run_dir));
        assert_eq!(store.load_registry().unwrap(), record);
    }

    #[test]
    fn test_load_registry_missing() {
        let temp = TempDir::new().unwrap();
        let store = RunStore::new(&utf8(&temp));
        assert!(matches!(store.load_registry(), Err(StoreError::Io { .. })));
    }

    #[test]
    fn test_load_registry_hand_edited() {
        let temp = TempDir::new().unwrap();
        let store = RunStore::new(&utf8(&temp));
        fs::write(store.registry_path(), "ARRAY:not-a-job:/tmp\n").unwrap();
        assert!(matches!(
            store.load_registry(),
            Err(StoreError::Registry(RegistryError::Malformed { .. }))
        ));
    }

    #[test]
    fn test_load_task_count() {
        let temp = TempDir::new().unwrap();
        let store = RunStore::new(&utf8(&temp));
        assert_eq!(store.load_task_count().unwrap(), None);

        fs::write(store.task_list_path(), "s1\ns2\ns3\n").unwrap();
        assert_eq!(store.load_task_count().unwrap(), Some(3));
    }

    #[test]
    fn test_save_summary() {
        let temp = TempDir::new().unwrap();
        let store = RunStore::new(&utf8(&temp));
        store
            .save_summary(&serde_json::json!({ "verdict": "success" }))
            .unwrap();
        let content = fs::read_to_string(store.summary_path()).unwrap();
        assert!(content.contains("\"verdict\": \"success\""));
    }
}
