use crate::profile::Limits;
use crate::types::Severity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Rotation slots are a single digit in generation names.
pub const MAX_SLOTS: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Which notification severities reach the desktop.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyLevel {
    #[default]
    #[serde(rename = "all")]
    All,
    #[serde(rename = "error/alert")]
    ErrorAlert,
    #[serde(rename = "error")]
    Error,
}

impl NotifyLevel {
    /// Whether a notification of `severity` is shown at this level.
    pub fn allows(&self, severity: Severity) -> bool {
        match self {
            NotifyLevel::All => true,
            NotifyLevel::ErrorAlert => matches!(severity, Severity::Error | Severity::Alert),
            NotifyLevel::Error => severity == Severity::Error,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Settings {
    #[serde(default)]
    pub local: LocalSettings,
    #[serde(default)]
    pub autostart: AutostartSettings,
}

/// Daemon-wide settings and the bounds applied to every profile.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LocalSettings {
    /// Show desktop notifications at all.
    pub do_notifications: bool,
    pub notify_level: NotifyLevel,
    /// Reserved for concurrent profiles; only one run is ever active.
    pub max_threads: u32,
    pub silent_start: bool,
    /// Log every notification to the run log.
    pub debug: bool,
    pub min_copies: u32,
    pub max_copies: u32,
    pub min_interval: u64,
    pub max_interval: u64,
    pub min_warning_time: u64,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            do_notifications: true,
            notify_level: NotifyLevel::All,
            max_threads: 4,
            silent_start: false,
            debug: false,
            min_copies: 1,
            max_copies: 8,
            min_interval: 20,
            max_interval: 10000,
            min_warning_time: 10,
        }
    }
}

/// Profile started automatically when the daemon comes up.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AutostartSettings {
    pub enabled: bool,
    pub profile: String,
}

impl Settings {
    /// Checks that the profile bounds are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let local = &self.local;
        if local.min_copies == 0 {
            return Err(ConfigError::Validation(
                "min_copies must be at least 1".to_string(),
            ));
        }
        if local.min_copies > local.max_copies {
            return Err(ConfigError::Validation(format!(
                "min_copies ({}) is greater than max_copies ({})",
                local.min_copies, local.max_copies
            )));
        }
        if local.max_copies > MAX_SLOTS {
            return Err(ConfigError::Validation(format!(
                "max_copies cannot exceed {}",
                MAX_SLOTS
            )));
        }
        if local.min_interval > local.max_interval {
            return Err(ConfigError::Validation(format!(
                "min_interval ({}) is greater than max_interval ({})",
                local.min_interval, local.max_interval
            )));
        }
        if local.min_warning_time >= local.min_interval {
            return Err(ConfigError::Validation(format!(
                "min_warning_time ({}) must be less than min_interval ({})",
                local.min_warning_time, local.min_interval
            )));
        }
        if self.autostart.enabled && self.autostart.profile.is_empty() {
            return Err(ConfigError::Validation(
                "autostart is enabled but no profile is set".to_string(),
            ));
        }
        Ok(())
    }

    /// Bounds handed to the profile validator.
    pub fn limits(&self) -> Limits {
        Limits {
            min_copies: self.local.min_copies,
            max_copies: self.local.max_copies,
            min_interval: self.local.min_interval,
            max_interval: self.local.max_interval,
            min_warning_time: self.local.min_warning_time,
        }
    }
}

/// Resolves the settings path from `AUTOBACKUP_CONFIG` or the default location.
pub fn settings_path() -> PathBuf {
    std::env::var("AUTOBACKUP_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| crate::paths::config_path())
}

/// Loads the settings from the environment variable `AUTOBACKUP_CONFIG`
/// or the default system location (`~/.config/autobackup/config.toml`).
///
/// A missing file is created with the default settings.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, written, or parsed,
/// or if validation fails.
pub fn load_settings() -> Result<Settings, ConfigError> {
    load_settings_from(&settings_path())
}

pub fn load_settings_from(path: &Path) -> Result<Settings, ConfigError> {
    if !path.exists() {
        info!("No settings found at {:?}, writing defaults", path);
        let settings = Settings::default();
        save_settings_to(&settings, path)?;
        return Ok(settings);
    }

    let content = std::fs::read_to_string(path)?;
    let settings: Settings = toml::from_str(&content)?;
    settings.validate()?;
    Ok(settings)
}

/// Writes the settings back to `path`, creating parent directories.
pub fn save_settings_to(settings: &Settings, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(settings)?;
    std::fs::write(path, content)?;
    Ok(())
}
