use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the project directories for autobackup.
fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "autobackup")
}

fn home_fallback(parts: &[&str]) -> PathBuf {
    let mut path = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    for part in parts {
        path.push(part);
    }
    path
}

/// Returns the configuration directory: `~/.config/autobackup/`
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| home_fallback(&[".config", "autobackup"]))
}

/// Returns the path to the settings file: `~/.config/autobackup/config.toml`
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Returns the path to the profile store: `~/.config/autobackup/profiles.json`
///
/// `AUTOBACKUP_PROFILES` overrides the location.
pub fn profiles_path() -> PathBuf {
    std::env::var_os("AUTOBACKUP_PROFILES")
        .map(PathBuf::from)
        .unwrap_or_else(|| config_dir().join("profiles.json"))
}

/// Returns the data directory: `~/.local/share/autobackup/`
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| home_fallback(&[".local", "share", "autobackup"]))
}

/// Returns the diagnostic log directory used by the daemon's rolling appender.
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Returns the persistent run log: `~/.local/share/autobackup/log.csv`
pub fn run_log_path() -> PathBuf {
    data_dir().join("log.csv")
}

/// Returns the Unix socket path.
/// Respects `$XDG_RUNTIME_DIR/autobackup.sock` with fallback to `/tmp/autobackup-$UID.sock`.
pub fn socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("autobackup.sock")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/autobackup-{}.sock", uid))
    }
}

/// Returns the PID file path.
/// Respects `$XDG_RUNTIME_DIR/autobackup.pid` with fallback to `/tmp/autobackup-$UID.pid`.
pub fn pid_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("autobackup.pid")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/autobackup-{}.pid", uid))
    }
}
