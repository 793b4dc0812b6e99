use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Importance of a user notification.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Alert,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("INFO:"),
            Severity::Alert => f.write_str("ALERT:"),
            Severity::Error => f.write_str("ERROR:"),
        }
    }
}

/// Lifecycle of the scheduler's run worker.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// No run is active.
    #[default]
    Idle,
    /// A run loop is active (backing up or waiting for the next interval).
    Running,
    /// Stop was requested and the worker has not exited yet.
    Cancelling,
}

/// Snapshot of the scheduler as seen by status queries.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct SchedulerStatus {
    pub state: RunState,
    /// Profile of the active run, if any.
    pub profile: Option<String>,
    /// When the current pass of the run loop started.
    pub last_run_started_at: Option<DateTime<Utc>>,
    /// Seconds until the next pass; negative when overdue.
    pub time_remaining_secs: Option<i64>,
    /// Generations written by the most recent pass.
    pub generations: Vec<PathBuf>,
    /// Human-readable summary of the most recent pass.
    pub recent_backup: String,
}
