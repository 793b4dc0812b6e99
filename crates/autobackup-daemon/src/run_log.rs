use chrono::Local;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

/// Append-only log of completed runs and errors, kept for the user.
pub trait RunLog: Send + Sync {
    fn log(&self, line: &str) -> io::Result<()>;
}

/// Run log backed by a text file; every line is prefixed with the local time.
pub struct FileRunLog {
    path: PathBuf,
}

impl FileRunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RunLog for FileRunLog {
    fn log(&self, line: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{} - {}", Local::now().format("%Y-%m-%d %H:%M:%S"), line)
    }
}
