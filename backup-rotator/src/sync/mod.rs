//! External sync collaborator.
//!
//! The run controller only needs two things from the tool that pulls a
//! remote folder down: a way to check that it is installed, and a copy
//! operation whose exit status says whether the transfer succeeded.

pub mod rclone;

pub use rclone::Rclone;

use crate::utils::errors::Result;
use std::future::Future;
use std::path::Path;

/// Captured result of one sync invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutput {
    /// Exit code; `None` when the process was killed or never started
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl SyncOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Output for a transfer that never produced an exit status
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            status: None,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Tool that copies a logical folder from remote storage into a local directory
///
/// Implementations may use `async fn`; the returned futures must be `Send` so
/// runs can be driven from the scheduler.
pub trait SyncCollaborator {
    /// Fail with `BackupError::Precondition` if the tool cannot be used at all
    fn check_available(&self) -> impl Future<Output = Result<()>> + Send;

    /// Copy `logical_folder` into `destination`, which already exists
    fn sync(&self, logical_folder: &str, destination: &Path)
        -> impl Future<Output = SyncOutput> + Send;
}
