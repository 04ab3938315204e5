//! Removal of stale generations.
//!
//! Handles both physical forms (directory tree or single archive file).
//! A permission failure triggers one pass that makes the tree writable by
//! its owner, followed by a single retry.

use crate::utils::errors::{BackupError, Result};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// Result of deleting one generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Failed(String),
}

/// Aggregated result of a deletion batch
#[derive(Debug, Default)]
pub struct DeletionReport {
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl DeletionReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: DeletionReport) {
        self.deleted.extend(other.deleted);
        self.failed.extend(other.failed);
    }

    /// `BackupError::Deletion` naming every entry left on disk
    pub fn check(&self) -> Result<()> {
        check_failures(&self.failed)
    }
}

pub(crate) fn check_failures(failed: &[(PathBuf, String)]) -> Result<()> {
    if failed.is_empty() {
        return Ok(());
    }

    let paths: Vec<String> = failed.iter().map(|(p, _)| p.display().to_string()).collect();
    Err(BackupError::Deletion(format!(
        "{} stale backup(s) could not be deleted; manual cleanup required: {}",
        failed.len(),
        paths.join(", ")
    )))
}

/// Delete one generation, directory or file, logging the outcome.
pub fn delete_generation(path: &Path) -> DeleteOutcome {
    delete_generation_with(path, remove_path, make_writable)
}

/// Delete `path` with `remove`. A permission failure runs `repair` once and
/// retries `remove` exactly once more.
fn delete_generation_with<R, M>(path: &Path, remove: R, repair: M) -> DeleteOutcome
where
    R: FnMut(&Path) -> io::Result<()>,
    M: FnOnce(&Path) -> io::Result<()>,
{
    match remove_with_permission_retry(path, remove, repair) {
        Ok(()) => {
            info!(path = %path.display(), "Deleted old backup");
            DeleteOutcome::Deleted
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to delete old backup");
            DeleteOutcome::Failed(e.to_string())
        }
    }
}

/// Delete every path in the batch. A failure never stops the remaining items.
pub fn delete_batch(paths: &[PathBuf]) -> DeletionReport {
    run_batch(paths, delete_generation)
}

fn run_batch<F>(paths: &[PathBuf], mut delete: F) -> DeletionReport
where
    F: FnMut(&Path) -> DeleteOutcome,
{
    let mut report = DeletionReport::default();

    for path in paths {
        match delete(path) {
            DeleteOutcome::Deleted => report.deleted.push(path.clone()),
            DeleteOutcome::Failed(reason) => report.failed.push((path.clone(), reason)),
        }
    }

    if !report.is_clean() {
        warn!(
            "Deletion batch finished with {} failure(s) out of {} item(s)",
            report.failed.len(),
            paths.len()
        );
    }

    report
}

fn remove_with_permission_retry<R, M>(path: &Path, mut remove: R, repair: M) -> io::Result<()>
where
    R: FnMut(&Path) -> io::Result<()>,
    M: FnOnce(&Path) -> io::Result<()>,
{
    match remove(path) {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            warn!(
                path = %path.display(),
                "Permission denied, clearing read-only attributes and retrying"
            );
            repair(path)?;
            remove(path)
        }
        other => other,
    }
}

fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = std::fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Give the owner write access to everything under `path`, the path itself
/// included. Directories also get read and search so their contents can be
/// listed and unlinked.
fn make_writable(path: &Path) -> io::Result<()> {
    // The parent must be writable to unlink `path` itself.
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        clear_readonly(parent, true)?;
    }

    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.path_is_symlink() {
            continue;
        }
        clear_readonly(entry.path(), entry.file_type().is_dir())?;
    }
    Ok(())
}

#[cfg(unix)]
fn clear_readonly(path: &Path, is_dir: bool) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path)?.permissions().mode();
    let wanted = if is_dir { mode | 0o700 } else { mode | 0o200 };
    if wanted != mode {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(wanted))?;
    }
    Ok(())
}

#[cfg(not(unix))]
#[allow(clippy::permissions_set_readonly_false)]
fn clear_readonly(path: &Path, _is_dir: bool) -> io::Result<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    if perms.readonly() {
        perms.set_readonly(false);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}
