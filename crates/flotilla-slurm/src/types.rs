//! SLURM unit state types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// State of one monitored unit (a job or one element of a job array).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitState {
    Pending,
    Configuring,
    Running,
    Suspended,
    Completed,
    Completing,
    Failed,
    Cancelled,
    Timeout,
    OutOfMemory,
    NodeFail,
    Preempted,
    BootFail,
    /// No backend answered, or the scheduler reported a state we do not model.
    Unknown,
}

/// Partition of `UnitState` used for termination and verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateClass {
    NonTerminal,
    TerminalSuccess,
    TerminalFailure,
}

impl UnitState {
    pub const ALL: [UnitState; 14] = [
        UnitState::Pending,
        UnitState::Configuring,
        UnitState::Running,
        UnitState::Suspended,
        UnitState::Completed,
        UnitState::Completing,
        UnitState::Failed,
        UnitState::Cancelled,
        UnitState::Timeout,
        UnitState::OutOfMemory,
        UnitState::NodeFail,
        UnitState::Preempted,
        UnitState::BootFail,
        UnitState::Unknown,
    ];

    /// Parse a raw state string from sacct or squeue.
    ///
    /// sacct decorates some states ("CANCELLED by 12345", "RUNNING+"), so
    /// only the first token is considered. Unrecognized states are flagged
    /// and mapped to `Unknown` so they can never count as terminal.
    pub fn parse(raw: &str) -> Self {
        let token = raw
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim_end_matches('+');
        if token.is_empty() {
            return UnitState::Unknown;
        }

        match Self::from_token(&token.to_ascii_uppercase()) {
            Some(state) => state,
            None => {
                tracing::warn!("Unrecognized SLURM state {:?}, treating as UNKNOWN", raw);
                UnitState::Unknown
            }
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        let state = match token {
            "PENDING" | "PD" => UnitState::Pending,
            "CONFIGURING" | "CF" => UnitState::Configuring,
            "RUNNING" | "R" => UnitState::Running,
            "SUSPENDED" | "S" => UnitState::Suspended,
            "COMPLETED" | "CD" => UnitState::Completed,
            "COMPLETING" | "CG" => UnitState::Completing,
            "FAILED" | "F" => UnitState::Failed,
            "CANCELLED" | "CA" => UnitState::Cancelled,
            "TIMEOUT" | "TO" => UnitState::Timeout,
            "OUT_OF_MEMORY" | "OOM" => UnitState::OutOfMemory,
            "NODE_FAIL" | "NF" => UnitState::NodeFail,
            "PREEMPTED" | "PR" => UnitState::Preempted,
            "BOOT_FAIL" | "BF" => UnitState::BootFail,
            "UNKNOWN" => UnitState::Unknown,
            _ => return None,
        };
        Some(state)
    }

    pub fn class(self) -> StateClass {
        match self {
            UnitState::Pending
            | UnitState::Configuring
            | UnitState::Running
            | UnitState::Suspended
            | UnitState::Unknown => StateClass::NonTerminal,
            UnitState::Completed | UnitState::Completing => StateClass::TerminalSuccess,
            UnitState::Failed
            | UnitState::Cancelled
            | UnitState::Timeout
            | UnitState::OutOfMemory
            | UnitState::NodeFail
            | UnitState::Preempted
            | UnitState::BootFail => StateClass::TerminalFailure,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.class() != StateClass::NonTerminal
    }

    pub fn is_failure(self) -> bool {
        self.class() == StateClass::TerminalFailure
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnitState::Pending => "PENDING",
            UnitState::Configuring => "CONFIGURING",
            UnitState::Running => "RUNNING",
            UnitState::Suspended => "SUSPENDED",
            UnitState::Completed => "COMPLETED",
            UnitState::Completing => "COMPLETING",
            UnitState::Failed => "FAILED",
            UnitState::Cancelled => "CANCELLED",
            UnitState::Timeout => "TIMEOUT",
            UnitState::OutOfMemory => "OUT_OF_MEMORY",
            UnitState::NodeFail => "NODE_FAIL",
            UnitState::Preempted => "PREEMPTED",
            UnitState::BootFail => "BOOT_FAIL",
            UnitState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of sacct or squeue output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRow {
    /// Job id as printed by the scheduler ("123", "123_4", "123_[5-9%2]")
    pub id: String,

    /// Parsed state
    pub state: UnitState,

    /// Exit code (sacct only)
    pub exit_code: Option<i32>,

    /// Elapsed wall time (sacct only)
    pub elapsed: Option<Duration>,
}

impl StateRow {
    pub fn new(id: impl Into<String>, state: UnitState) -> Self {
        Self {
            id: id.into(),
            state,
            exit_code: None,
            elapsed: None,
        }
    }
}
