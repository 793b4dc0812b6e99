//! Inspects a destination directory for the generations of one source.
//!
//! A generation is named `<source>_<digit>` (a directory copy) or
//! `<source>_<digit>.zip` (an archive).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

pub const ARCHIVE_EXTENSION: &str = "zip";

/// A generation found in a destination directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub path: PathBuf,
    pub slot: u32,
    pub is_archive: bool,
}

/// Splits a generation file name into its source name, slot and archive flag.
pub fn parse_generation_name(name: &str) -> Option<(&str, u32, bool)> {
    let (stem, is_archive) = match name.strip_suffix(".zip") {
        Some(stem) => (stem, true),
        None => (name, false),
    };
    let (base, digit) = stem.rsplit_once('_')?;
    if digit.len() != 1 {
        return None;
    }
    let slot = digit.chars().next()?.to_digit(10)?;
    Some((base, slot, is_archive))
}

/// Rotation slot of a generation path, if its name follows the generation pattern.
pub fn slot_of(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    parse_generation_name(name).map(|(_, slot, _)| slot)
}

/// Name of the generation stored in `slot` for `source_name`.
pub fn generation_name(source_name: &str, slot: u32) -> String {
    format!("{}_{}", source_name, slot)
}

/// Lists every generation of `source_name` inside `destination_dir`.
pub fn list_generations(destination_dir: &Path, source_name: &str) -> io::Result<Vec<Generation>> {
    let mut generations = Vec::new();
    for entry in fs::read_dir(destination_dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if let Some((base, slot, is_archive)) = parse_generation_name(name) {
            if base == source_name {
                generations.push(Generation {
                    path: entry.path(),
                    slot,
                    is_archive,
                });
            }
        }
    }
    Ok(generations)
}

/// Counts the generations of `source_name` inside `destination_dir`.
pub fn count_generations(destination_dir: &Path, source_name: &str) -> io::Result<usize> {
    Ok(list_generations(destination_dir, source_name)?.len())
}

/// Returns the generation of `source_name` with the earliest age.
///
/// Directories are aged by creation time and archives by modification time,
/// since an archive's creation time does not survive being copied around.
/// Equal ages are ordered by slot.
///
/// # Errors
///
/// Returns `NotFound` when `destination_dir` holds no generation of `source_name`.
pub fn find_oldest_generation(destination_dir: &Path, source_name: &str) -> io::Result<PathBuf> {
    let mut oldest: Option<(SystemTime, u32, PathBuf)> = None;
    for generation in list_generations(destination_dir, source_name)? {
        let key = (generation_age(&generation)?, generation.slot);
        match oldest {
            Some((age, slot, _)) if (age, slot) <= key => {}
            _ => oldest = Some((key.0, key.1, generation.path)),
        }
    }

    oldest.map(|(_, _, path)| path).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!(
                "No generations of {} found in {:?}",
                source_name, destination_dir
            ),
        )
    })
}

fn generation_age(generation: &Generation) -> io::Result<SystemTime> {
    let metadata = fs::metadata(&generation.path)?;
    if generation.is_archive {
        return metadata.modified();
    }
    match metadata.created() {
        Ok(created) => Ok(created),
        Err(e) => {
            // Some filesystems do not record birth time
            debug!(
                "No creation time for {:?} ({}), using modification time",
                generation.path, e
            );
            metadata.modified()
        }
    }
}
