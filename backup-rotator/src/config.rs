//! Configuration management for the backup rotator.
//!
//! Loads configuration from a TOML file. Every section has defaults, so a
//! minimal file only needs the remote name and the folder list.

use crate::generation::naming::sanitize_folder_name;
use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Remote name as configured in rclone
    #[serde(default)]
    pub name: String,

    /// Sync tool executable
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Extra flags passed through to every copy invocation
    #[serde(default = "default_extra_args")]
    pub extra_args: Vec<String>,

    /// Upper bound for a single folder transfer
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Upper bound for the availability probe
    #[serde(default = "default_version_timeout_secs")]
    pub version_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory holding every generation, raw and archived
    #[serde(default = "default_backup_root")]
    pub root: PathBuf,

    /// Logical folders to back up, in run order
    #[serde(default)]
    pub folders: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Generations kept per folder
    #[serde(default = "default_max_copies")]
    pub max_copies: usize,

    /// Per-folder overrides of `max_copies`
    #[serde(default)]
    pub per_folder: HashMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// zstd compression level (1-22)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Append-only log file
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Cron expression with a seconds field, e.g. "0 0 3 * * *"
    #[serde(default)]
    pub cron: Option<String>,
}

// Default values
fn default_binary() -> PathBuf {
    PathBuf::from("rclone")
}

fn default_extra_args() -> Vec<String> {
    vec!["--drive-shared-with-me".to_string()]
}

fn default_timeout_secs() -> u64 {
    60 * 60
}

fn default_version_timeout_secs() -> u64 {
    30
}

fn default_backup_root() -> PathBuf {
    PathBuf::from("backups")
}

fn default_max_copies() -> usize {
    5
}

fn default_compression_level() -> i32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            binary: default_binary(),
            extra_args: default_extra_args(),
            timeout_secs: default_timeout_secs(),
            version_timeout_secs: default_version_timeout_secs(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            root: default_backup_root(),
            folders: Vec::new(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_copies: default_max_copies(),
            per_folder: HashMap::new(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression_level: default_compression_level(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            remote: RemoteConfig::default(),
            backup: BackupConfig::default(),
            retention: RetentionConfig::default(),
            archive: ArchiveConfig::default(),
            log: LogConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| BackupError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Retention window for one folder, honouring per-folder overrides
    pub fn max_copies_for(&self, folder: &str) -> usize {
        self.retention
            .per_folder
            .get(folder)
            .copied()
            .unwrap_or(self.retention.max_copies)
    }

    /// Reject settings that would make a run unsafe before anything is touched
    pub fn validate(&self) -> Result<()> {
        if self.remote.name.trim().is_empty() {
            return Err(BackupError::Config("remote.name must not be empty".into()));
        }

        if self.retention.max_copies == 0 {
            return Err(BackupError::Config(
                "retention.max_copies must be at least 1".into(),
            ));
        }
        for (folder, copies) in &self.retention.per_folder {
            if *copies == 0 {
                return Err(BackupError::Config(format!(
                    "retention.per_folder.\"{}\" must be at least 1",
                    folder
                )));
            }
            if !self.backup.folders.contains(folder) {
                return Err(BackupError::Config(format!(
                    "retention.per_folder.\"{}\" is not listed in backup.folders",
                    folder
                )));
            }
        }

        if !(1..=22).contains(&self.archive.compression_level) {
            return Err(BackupError::Config(format!(
                "archive.compression_level must be in 1..=22, got {}",
                self.archive.compression_level
            )));
        }

        // Two folders sharing a tag would share (and prune) one generation set.
        let mut tags: BTreeMap<String, &str> = BTreeMap::new();
        for folder in &self.backup.folders {
            let tag = sanitize_folder_name(folder);
            if let Some(previous) = tags.insert(tag.clone(), folder) {
                return Err(BackupError::Config(if previous == folder {
                    format!("folder \"{}\" is listed twice", folder)
                } else {
                    format!(
                        "folders \"{}\" and \"{}\" both map to generation tag \"{}\"",
                        previous, folder, tag
                    )
                }));
            }
        }

        Ok(())
    }
}
