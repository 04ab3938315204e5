//! Backup Rotator Library
//!
//! Scheduled, rotating backups of remote-storage folders: each run pulls the
//! configured folders with rclone, packs every fresh copy into a
//! `.tar.zst`, and prunes generations beyond the retention window.

pub mod config;
pub mod daemon;
pub mod executor;
pub mod generation;
pub mod retention;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::{RunController, RunReport, RunState};
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
