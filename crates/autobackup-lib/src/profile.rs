use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Stored profiles keyed by profile name.
pub type Profiles = BTreeMap<String, Profile>;

/// A profile failed validation. The message is shown to the user as-is.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Backup Method does not exist.")]
    UnknownMethod(String),
    #[error("Destination folder is not set.")]
    MissingDestination,
    #[error("No folders are set to backup.")]
    NoFolders,
    #[error("Folder paths do not exist, recommend deleting them from the config.")]
    FolderNotFound(PathBuf),
    #[error("Destination path do not exist, recommend deleting them from the config.")]
    DestinationNotFound(PathBuf),
    #[error("Destination Path cannot be in folder as Source.")]
    NestedDestination(PathBuf),
    #[error("Duplicate folder paths have been set. Please modify profile accordingly.")]
    DuplicateFolder(PathBuf),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How a profile's run loop behaves.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Back up every interval until stopped, cycling through the copy slots.
    Rotate,
    /// Back up once, then shut the daemon down. Meant for external schedulers.
    Daily,
}

impl Method {
    pub const ALL: [Method; 2] = [Method::Rotate, Method::Daily];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Rotate => "Rotate",
            Method::Daily => "Daily",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownMethod(s.to_string()))
    }
}

/// A numeric profile field as it appears on disk.
///
/// Edited profiles may carry raw text; validation replaces it with a number.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum NumberField {
    Number(i64),
    Text(String),
}

impl NumberField {
    pub fn parse(&self) -> Option<i64> {
        match self {
            NumberField::Number(n) => Some(*n),
            NumberField::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<i64> for NumberField {
    fn from(n: i64) -> Self {
        NumberField::Number(n)
    }
}

impl From<&str> for NumberField {
    fn from(s: &str) -> Self {
        NumberField::Text(s.to_string())
    }
}

/// A named backup job as stored in `profiles.json`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Profile {
    /// Source directories, backed up in order.
    pub folders: Vec<String>,
    pub destination: String,
    /// Seconds between the start of two runs.
    pub interval: NumberField,
    /// Number of generations retained per source.
    pub copies: NumberField,
    pub method: String,
    /// Seconds of notice given before a run begins.
    pub warning_time: NumberField,
    #[serde(default)]
    pub compression: bool,
}

/// Bounds applied to a profile's numeric fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min_copies: u32,
    pub max_copies: u32,
    pub min_interval: u64,
    pub max_interval: u64,
    pub min_warning_time: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            min_copies: 1,
            max_copies: 8,
            min_interval: 20,
            max_interval: 10000,
            min_warning_time: 10,
        }
    }
}

/// A profile that passed validation, with typed fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidProfile {
    pub folders: Vec<PathBuf>,
    pub destination: PathBuf,
    pub interval: u64,
    pub copies: u32,
    pub method: Method,
    pub warning_time: u64,
    pub compression: bool,
}

/// Normalizes the numeric fields of `profile` in place, then checks its shape.
///
/// Out-of-range numbers are clamped rather than rejected, so calling this
/// repeatedly on the same profile is harmless.
pub fn validate(profile: &mut Profile, limits: &Limits) -> Result<ValidProfile, ValidationError> {
    let copies = match profile.copies.parse() {
        Some(n) => n.clamp(limits.min_copies as i64, limits.max_copies as i64) as u32,
        None => limits.min_copies,
    };
    profile.copies = NumberField::Number(copies as i64);

    let interval = match profile.interval.parse() {
        Some(n) if n < limits.min_interval as i64 => limits.min_interval,
        Some(n) if n >= limits.max_interval as i64 => limits.max_interval,
        Some(n) => n as u64,
        None => limits.min_interval,
    };
    profile.interval = NumberField::Number(interval as i64);

    let warning_time = match profile.warning_time.parse() {
        Some(n) if n >= 0 && (n as u64) < interval => n as u64,
        _ => limits.min_warning_time,
    };
    profile.warning_time = NumberField::Number(warning_time as i64);

    let method: Method = profile.method.parse()?;

    if profile.destination.is_empty() {
        return Err(ValidationError::MissingDestination);
    }
    if profile.folders.is_empty() {
        return Err(ValidationError::NoFolders);
    }

    let folders: Vec<PathBuf> = profile.folders.iter().map(PathBuf::from).collect();
    if let Some(missing) = folders.iter().find(|f| !f.exists()) {
        return Err(ValidationError::FolderNotFound(missing.clone()));
    }

    let destination = PathBuf::from(&profile.destination);
    if !destination.exists() {
        return Err(ValidationError::DestinationNotFound(destination));
    }

    if let Some(source) = folders.iter().find(|f| is_nested(&destination, f)) {
        debug!("Destination {:?} lies inside {:?}", destination, source);
        return Err(ValidationError::NestedDestination(destination));
    }

    let mut seen = HashSet::new();
    for folder in &folders {
        if !seen.insert(folder.as_path()) {
            return Err(ValidationError::DuplicateFolder(folder.clone()));
        }
    }

    Ok(ValidProfile {
        folders,
        destination,
        interval,
        copies,
        method,
        warning_time,
        compression: profile.compression,
    })
}

/// Whether `destination` is `source` or lies somewhere beneath it.
fn is_nested(destination: &Path, source: &Path) -> bool {
    match (destination.canonicalize(), source.canonicalize()) {
        (Ok(dest), Ok(src)) => dest.starts_with(src),
        _ => destination.starts_with(source),
    }
}

/// Persistent storage for profiles.
pub trait ProfileStore: Send + Sync {
    fn load_all(&self) -> Result<Profiles, StoreError>;

    fn save_all(&self, profiles: &Profiles) -> Result<(), StoreError>;

    /// Inserts or replaces one profile, keeping the others untouched.
    fn upsert(&self, name: &str, profile: Profile) -> Result<Profiles, StoreError> {
        let mut profiles = self.load_all()?;
        profiles.insert(name.to_string(), profile);
        self.save_all(&profiles)?;
        Ok(profiles)
    }
}

/// Profiles kept as a pretty-printed JSON object keyed by name.
pub struct JsonProfileStore {
    path: PathBuf,
}

impl JsonProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProfileStore for JsonProfileStore {
    fn load_all(&self) -> Result<Profiles, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Profiles::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save_all(&self, profiles: &Profiles) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(profiles)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
