//! Utility modules for the backup rotator.

pub mod errors;
pub mod logger;

pub use errors::{BackupError, Result};
