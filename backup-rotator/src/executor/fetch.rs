//! Fetch step: pull one logical folder into a fresh generation directory.

use crate::sync::SyncCollaborator;
use std::path::Path;
use tracing::{error, info};

/// Result of fetching one logical folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Completed,
    Failed(String),
}

/// Create `destination_dir` and copy `logical_folder` into it.
///
/// The collaborator's diagnostic output is logged verbatim on failure. The
/// transferred content is never inspected.
pub async fn fetch<S: SyncCollaborator>(
    sync: &S,
    logical_folder: &str,
    destination_dir: &Path,
) -> FetchOutcome {
    if let Err(e) = tokio::fs::create_dir_all(destination_dir).await {
        error!(
            folder = %logical_folder,
            path = %destination_dir.display(),
            error = %e,
            "Failed to create generation directory"
        );
        return FetchOutcome::Failed(format!(
            "cannot create {}: {}",
            destination_dir.display(),
            e
        ));
    }

    info!(folder = %logical_folder, path = %destination_dir.display(), "Downloading folder");

    let output = sync.sync(logical_folder, destination_dir).await;
    if output.success() {
        info!(folder = %logical_folder, "Copy completed");
        FetchOutcome::Completed
    } else {
        let status = output
            .status
            .map(|code| code.to_string())
            .unwrap_or_else(|| "none".to_string());
        error!(
            folder = %logical_folder,
            status = %status,
            "Copy failed: {}",
            output.stderr
        );
        FetchOutcome::Failed(output.stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncOutput;
    use crate::utils::errors::Result;
    use tempfile::TempDir;

    struct StubSync {
        output: SyncOutput,
    }

    impl SyncCollaborator for StubSync {
        async fn check_available(&self) -> Result<()> {
            Ok(())
        }

        async fn sync(&self, _logical_folder: &str, destination: &Path) -> SyncOutput {
            assert!(destination.is_dir(), "destination must exist before the transfer");
            self.output.clone()
        }
    }

    #[tokio::test]
    async fn test_fetch_creates_destination_with_parents() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("nested/root/Reports_2024-01-01_00-00-00");
        let sync = StubSync {
            output: SyncOutput {
                status: Some(0),
                ..SyncOutput::default()
            },
        };

        assert_eq!(fetch(&sync, "Reports", &dest).await, FetchOutcome::Completed);
        assert!(dest.is_dir());
    }

    #[tokio::test]
    async fn test_fetch_failure_carries_stderr() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("Reports_2024-01-01_00-00-00");
        let sync = StubSync {
            output: SyncOutput {
                status: Some(1),
                stdout: String::new(),
                stderr: "directory not found".to_string(),
            },
        };

        assert_eq!(
            fetch(&sync, "Reports", &dest).await,
            FetchOutcome::Failed("directory not found".to_string())
        );
    }
}
