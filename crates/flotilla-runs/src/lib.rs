//! Run bookkeeping for flotilla: the run context, the job registry
//! record and the files kept in a run directory.

pub mod context;
pub mod registry;
pub mod store;

pub use context::RunContext;
pub use registry::{JobKind, JobRegistryRecord, RegistryError, UNKNOWN_RUN_DIR};
pub use store::{RunStore, StoreError};
