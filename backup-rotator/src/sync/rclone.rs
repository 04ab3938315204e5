//! rclone-backed sync collaborator.

use super::{SyncCollaborator, SyncOutput};
use crate::config::RemoteConfig;
use crate::utils::errors::{BackupError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Runs `rclone copy <remote>:<folder> <destination> [extra args]`
#[derive(Debug, Clone)]
pub struct Rclone {
    binary: PathBuf,
    remote: String,
    extra_args: Vec<String>,
    timeout: Duration,
    version_timeout: Duration,
}

impl Rclone {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            remote: config.name.clone(),
            extra_args: config.extra_args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            version_timeout: Duration::from_secs(config.version_timeout_secs),
        }
    }

    /// `<remote>:<folder>` source specification
    pub fn source_spec(&self, logical_folder: &str) -> String {
        format!("{}:{}", self.remote, logical_folder)
    }

    fn copy_args(&self, logical_folder: &str, destination: &Path) -> Vec<String> {
        let mut args = vec![
            "copy".to_string(),
            self.source_spec(logical_folder),
            destination.display().to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

impl SyncCollaborator for Rclone {
    async fn check_available(&self) -> Result<()> {
        let output = Command::new(&self.binary)
            .arg("version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.version_timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(BackupError::Precondition(format!(
                    "{} is not installed or cannot be executed: {}",
                    self.binary.display(),
                    e
                )))
            }
            Err(_) => {
                return Err(BackupError::Precondition(format!(
                    "{} version did not answer within {}s",
                    self.binary.display(),
                    self.version_timeout.as_secs()
                )))
            }
        };

        if !output.status.success() {
            return Err(BackupError::Precondition(format!(
                "{} version exited with {}: {}",
                self.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let banner = String::from_utf8_lossy(&output.stdout);
        info!(
            "Using {}",
            banner.lines().next().unwrap_or("sync tool (unknown version)")
        );
        Ok(())
    }

    async fn sync(&self, logical_folder: &str, destination: &Path) -> SyncOutput {
        let args = self.copy_args(logical_folder, destination);
        debug!(binary = %self.binary.display(), ?args, "Invoking sync tool");

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) => SyncOutput {
                status: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Ok(Err(e)) => SyncOutput::failed(format!(
                "failed to start {}: {}",
                self.binary.display(),
                e
            )),
            // Dropping the future kills the child (kill_on_drop).
            Err(_) => SyncOutput::failed(BackupError::Timeout(self.timeout.as_secs()).to_string()),
        }
    }
}
