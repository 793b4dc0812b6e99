use crate::menu::MenuEntry;
use crate::profile::{Profile, Profiles};
use crate::types::SchedulerStatus;
use serde::{Deserialize, Serialize};

/// IPC Request from client (CLI) to daemon.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum Request {
    /// Get the scheduler status.
    Status,
    /// Start the run loop for a stored profile.
    Start { profile: String },
    /// Stop the active run.
    Stop,
    /// Summary of the most recent backup, with time left while running.
    Recent,
    /// List stored profiles.
    Profiles,
    /// Validate and store a profile.
    SaveProfile { name: String, profile: Profile },
    /// Re-read the profile store.
    ReloadProfiles,
    /// Current tray menu entries.
    Menu,
    /// Flip desktop notifications on or off.
    ToggleAlerts,
    /// Enable autostart for a profile, or disable it with `None`.
    SetAutostart { profile: Option<String> },
    /// Request graceful daemon shutdown.
    Shutdown,
    /// Health check.
    Ping,
}

/// IPC Response from daemon to client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum Response {
    /// Request succeeded.
    Ok(Option<ResponseData>),
    /// Request failed.
    Error { code: String, message: String },
    /// Health check response.
    Pong,
}

/// Success data payload for an IPC response.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind")]
pub enum ResponseData {
    Status { status: SchedulerStatus },
    /// A run loop was started.
    Started { profile: String },
    /// Whether a run was actually stopped.
    Stopped { was_running: bool },
    Recent { text: String },
    Profiles { profiles: Profiles },
    Menu { entries: Vec<MenuEntry> },
    Alerts { enabled: bool },
    Autostart { profile: Option<String> },
}

/// Common error codes used in IPC error responses.
pub mod error_codes {
    pub const UNKNOWN_PROFILE: &str = "UnknownProfile";
    pub const ALREADY_RUNNING: &str = "AlreadyRunning";
    pub const INVALID_PROFILE: &str = "InvalidProfile";
    pub const STORE_ERROR: &str = "StoreError";
    pub const CONFIG_ERROR: &str = "ConfigError";
    pub const INVALID_REQUEST: &str = "InvalidRequest";
}
