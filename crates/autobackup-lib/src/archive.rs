//! Materializes one generation on disk, either as a directory copy or as a
//! single zip archive bundling several source trees.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Deflate level used for archives.
const MAX_COMPRESSION_LEVEL: i32 = 9;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to walk source tree: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Writes one generation of `sources` at `destination`.
///
/// Without compression every source tree is merged into the `destination`
/// directory, overwriting files that already exist there. With compression a
/// single `<destination>.zip` is written holding every source tree under its
/// own directory name. Partial output is left in place on failure.
///
/// Returns the path of the generation that was written.
pub fn write_generation(
    sources: &[PathBuf],
    destination: &Path,
    compress: bool,
) -> Result<PathBuf, ArchiveError> {
    if compress {
        let archive = archive_path(destination);
        compress_trees(sources, &archive)?;
        Ok(archive)
    } else {
        for source in sources {
            copy_tree(source, destination)?;
        }
        Ok(destination.to_path_buf())
    }
}

/// `<destination>.zip`, keeping any dots already in the name.
pub fn archive_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(".");
    name.push(crate::retention::ARCHIVE_EXTENSION);
    PathBuf::from(name)
}

/// Recursively copies `source` into `destination`, merging with existing content.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<u64, ArchiveError> {
    info!("Copying {:?} to {:?}", source, destination);
    let mut copied = 0;
    for entry in WalkDir::new(source) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let target = destination.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() || entry.path().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        } else {
            warn!("Skipping {:?}: not a regular file", entry.path());
        }
    }
    debug!("Copied {} files from {:?}", copied, source);
    Ok(copied)
}

/// Writes every tree in `sources` into one deflated archive at `archive`.
///
/// Entry names are relative to each source's parent, so `/a/docs/x.txt`
/// is stored as `docs/x.txt`.
pub fn compress_trees(sources: &[PathBuf], archive: &Path) -> Result<(), ArchiveError> {
    info!("Compressing {} folder(s) into {:?}", sources.len(), archive);
    let file = File::create(archive)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(MAX_COMPRESSION_LEVEL));
    let dir_options = FileOptions::default().compression_method(CompressionMethod::Stored);

    for source in sources {
        let base = source.parent().unwrap_or(source);
        for entry in WalkDir::new(source) {
            let entry = entry?;
            let name = entry_name(entry.path(), base)?;
            if entry.file_type().is_dir() {
                zip.add_directory(name, dir_options)?;
            } else if entry.path().is_file() {
                let size = entry.path().metadata()?.len();
                zip.start_file(name, options.large_file(size > u32::MAX as u64))?;
                let mut input = File::open(entry.path())?;
                io::copy(&mut input, &mut zip)?;
            } else {
                warn!("Skipping {:?}: not a regular file", entry.path());
            }
        }
    }

    zip.finish()?;
    Ok(())
}

fn entry_name(path: &Path, base: &Path) -> Result<String, io::Error> {
    let relative = path
        .strip_prefix(base)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}
