//! Archival step: raw generation directory -> `<name>.tar.zst`.
//!
//! The directory is packed into an intermediate `<name>.tar` whose entries are
//! rooted at the directory's own name, the tar is stream-encoded with zstd into
//! a `.partial` file that is renamed into place, and the intermediate tar is
//! removed. The raw directory is deleted only after all of that succeeded.

use super::deletion::{delete_generation, DeleteOutcome};
use crate::generation::naming::{ARCHIVE_SUFFIX, PARTIAL_SUFFIX, TAR_SUFFIX};
use crate::utils::errors::{BackupError, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Result of archiving one generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Archived(PathBuf),
    Failed(String),
}

/// Deterministic artifact path for a generation directory
pub fn artifact_path(generation_dir: &Path) -> PathBuf {
    sibling_with_suffix(generation_dir, ARCHIVE_SUFFIX)
}

/// Archive `generation_dir` on the blocking pool.
pub async fn archive(generation_dir: &Path, compression_level: i32) -> ArchiveOutcome {
    let dir = generation_dir.to_path_buf();
    match tokio::task::spawn_blocking(move || archive_blocking(&dir, compression_level)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(path = %generation_dir.display(), error = %e, "Archive task panicked");
            ArchiveOutcome::Failed(format!("archive task failed: {}", e))
        }
    }
}

/// Synchronous archival; see the module docs for the sequence.
pub fn archive_blocking(generation_dir: &Path, compression_level: i32) -> ArchiveOutcome {
    let tar_path = sibling_with_suffix(generation_dir, TAR_SUFFIX);
    let artifact = artifact_path(generation_dir);
    let partial = sibling_with_suffix(&artifact, PARTIAL_SUFFIX);

    info!(path = %generation_dir.display(), "Compressing generation");

    let packed = write_tar(generation_dir, &tar_path)
        .and_then(|()| compress(&tar_path, &partial, compression_level))
        .and_then(|()| std::fs::rename(&partial, &artifact).map_err(BackupError::from));

    if let Err(e) = packed {
        remove_if_file(&tar_path);
        remove_if_file(&partial);
        error!(
            path = %generation_dir.display(),
            error = %e,
            "Failed to archive generation; raw copy kept"
        );
        return ArchiveOutcome::Failed(e.to_string());
    }

    if let Err(e) = std::fs::remove_file(&tar_path) {
        warn!(path = %tar_path.display(), error = %e, "Failed to remove intermediate tar");
    }

    info!(artifact = %artifact.display(), "Generation archived");

    if let DeleteOutcome::Failed(reason) = delete_generation(generation_dir) {
        // Both forms now share one id; retention evicts them together later.
        error!(
            path = %generation_dir.display(),
            error = %reason,
            "Archived, but the raw copy could not be removed"
        );
    }

    ArchiveOutcome::Archived(artifact)
}

fn write_tar(generation_dir: &Path, tar_path: &Path) -> Result<()> {
    let name = generation_dir.file_name().ok_or_else(|| {
        BackupError::Archival(format!("{} has no directory name", generation_dir.display()))
    })?;
    if !generation_dir.is_dir() {
        return Err(BackupError::Archival(format!(
            "{} is not a directory",
            generation_dir.display()
        )));
    }

    let file = File::create(tar_path)?;
    let mut builder = tar::Builder::new(BufWriter::new(file));
    builder.follow_symlinks(false);
    builder.append_dir_all(name, generation_dir)?;

    let mut writer = builder.into_inner()?;
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| BackupError::Io(e.into_error()))?
        .sync_all()?;
    Ok(())
}

fn compress(tar_path: &Path, destination: &Path, level: i32) -> Result<()> {
    let reader = BufReader::new(File::open(tar_path)?);
    let mut writer = BufWriter::new(File::create(destination)?);

    zstd::stream::copy_encode(reader, &mut writer, level)
        .map_err(|e| BackupError::Archival(format!("zstd encode: {}", e)))?;

    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| BackupError::Io(e.into_error()))?
        .sync_all()?;
    Ok(())
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_if_file(path: &Path) {
    if path.is_file() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to remove partial archive");
        }
    }
}
