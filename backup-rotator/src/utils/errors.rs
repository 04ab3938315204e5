//! Custom error types for the backup rotator.

use thiserror::Error;

/// Exit code for precondition, configuration and other fatal failures
pub const EXIT_PRECONDITION: u8 = 1;

/// Exit code when stale generations could not be removed
pub const EXIT_DELETION_FAILED: u8 = 2;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Archival error: {0}")]
    Archival(String),

    #[error("Deletion error: {0}")]
    Deletion(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Schedule error: {0}")]
    Schedule(String),
}

impl BackupError {
    /// Process exit code for an error that ends the program
    pub fn exit_code(&self) -> u8 {
        match self {
            BackupError::Deletion(_) => EXIT_DELETION_FAILED,
            _ => EXIT_PRECONDITION,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
