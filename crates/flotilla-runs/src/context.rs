use crate::store::RunStore;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use std::fs;
use std::io;

/// Per-run settings resolved once at startup and passed to every component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    /// Run identifier, a local timestamp unless given explicitly.
    pub run_id: String,

    /// `<run_base>/<run_id>`: scripts, logs, task list and registry.
    pub run_dir: Utf8PathBuf,

    /// Parent of each task's working directory.
    pub work_base: Utf8PathBuf,

    /// Parent of each task's output directory.
    pub output_base: Utf8PathBuf,
}

impl RunContext {
    /// Resolve the run directories.
    ///
    /// Work and output bases default to `work/` and `output/` inside the
    /// run directory.
    pub fn new(
        run_base: &Utf8Path,
        work_base: Option<Utf8PathBuf>,
        output_base: Option<Utf8PathBuf>,
        run_id: Option<String>,
    ) -> Self {
        let run_id = run_id.unwrap_or_else(|| Local::now().format("%Y%m%d_%H%M%S").to_string());
        let run_dir = run_base.join(&run_id);
        Self {
            work_base: work_base.unwrap_or_else(|| run_dir.join("work")),
            output_base: output_base.unwrap_or_else(|| run_dir.join("output")),
            run_id,
            run_dir,
        }
    }

    pub fn store(&self) -> RunStore {
        RunStore::new(&self.run_dir)
    }

    pub fn scripts_dir(&self) -> Utf8PathBuf {
        self.run_dir.join("scripts")
    }

    /// Scheduler stdout/stderr files.
    pub fn logs_dir(&self) -> Utf8PathBuf {
        self.run_dir.join("logs")
    }

    /// Create the run, scripts and logs directories.
    pub fn prepare(&self) -> io::Result<()> {
        fs::create_dir_all(self.scripts_dir())?;
        fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
