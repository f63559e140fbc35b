//! Unit tracking, polling and aggregation for flotilla runs.

pub mod aggregate;
pub mod monitor;
pub mod poller;
pub mod ticker;
pub mod units;

pub use aggregate::{AggregateSnapshot, CycleReport, StatusAggregator, Transition, Verdict};
pub use monitor::{Monitor, MonitorError, MonitorOutcome, RunSummary};
pub use poller::{StatePoller, WaitError};
pub use ticker::{ImmediateTicker, IntervalTicker, POLL_INTERVAL, Ticker};
pub use units::{MonitorTarget, Observation};
