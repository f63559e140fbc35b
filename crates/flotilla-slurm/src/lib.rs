//! SLURM integration for flotilla.
//!
//! Submit scripts via sbatch, query unit state via sacct and squeue,
//! cancel via scancel.

pub mod failure;
pub mod sacct;
pub mod sbatch;
pub mod scancel;
pub mod scheduler;
pub mod squeue;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use failure::{FailureAnalysis, FailureError, FailureMode, analyze_failure};
pub use sacct::{SacctError, query_history};
pub use sbatch::{SbatchError, parse_job_id, submit_script};
pub use scancel::{ScancelError, cancel_jobs};
pub use scheduler::{Scheduler, SlurmCli};
pub use squeue::{SqueueError, query_live};
pub use types::{StateClass, StateRow, UnitState};
