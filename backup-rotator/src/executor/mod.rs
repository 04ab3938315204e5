//! Run controller - sequences one backup run.
//!
//! `Start -> PreClean -> Fetch -> Archive -> PostClean -> Done`, or `Failed`
//! when a precondition does not hold. Folders are handled in configuration
//! order and each one is fetched and archived before the next begins, so the
//! state alternates between `Fetch` and `Archive` once per folder.
//!
//! Only preconditions are fatal. A folder whose transfer or archival fails is
//! logged and skipped; a generation that cannot be deleted stays on disk and
//! is retried by the next pruning pass.

pub mod archive;
pub mod deletion;
pub mod fetch;

use crate::config::Config;
use crate::generation::naming::make_generation_id;
use crate::generation::{scan_generations, scan_intermediates, GenerationForm};
use crate::retention::RetentionPolicy;
use crate::sync::SyncCollaborator;
use crate::utils::errors::Result;
use archive::ArchiveOutcome;
use chrono::NaiveDateTime;
use deletion::{delete_batch, DeletionReport};
use fetch::FetchOutcome;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Start,
    PreClean,
    Fetch,
    Archive,
    PostClean,
    Done,
    Failed,
}

/// What happened to one folder during a run
#[derive(Debug, Clone)]
pub struct FolderReport {
    pub folder: String,
    pub generation: PathBuf,
    pub fetch: FetchOutcome,
    /// `None` when the fetch failed and archival was skipped
    pub archive: Option<ArchiveOutcome>,
}

impl FolderReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.archive, Some(ArchiveOutcome::Archived(_)))
    }
}

/// Summary of a complete run
#[derive(Debug)]
pub struct RunReport {
    pub state: RunState,
    pub folders: Vec<FolderReport>,
    pub pre_clean: DeletionReport,
    pub post_clean: DeletionReport,
}

impl RunReport {
    /// Folder failures are logged, not fatal; stale generations left on
    /// disk need an operator and come back as `BackupError::Deletion`.
    pub fn check_deletions(&self) -> Result<()> {
        let failed: Vec<(PathBuf, String)> = self
            .pre_clean
            .failed
            .iter()
            .chain(&self.post_clean.failed)
            .cloned()
            .collect();
        deletion::check_failures(&failed)
    }
}

/// One generation in a folder listing
#[derive(Debug, Clone, Serialize)]
pub struct ListedGeneration {
    pub id: String,
    pub form: GenerationForm,
    pub path: PathBuf,
}

/// Generation set of one configured folder
#[derive(Debug, Clone, Serialize)]
pub struct FolderListing {
    pub folder: String,
    pub max_copies: usize,
    pub generations: Vec<ListedGeneration>,
}

/// Drives fetch, archive and retention for every configured folder
pub struct RunController<S> {
    config: Config,
    sync: S,
    state: RunState,
}

impl<S: SyncCollaborator> RunController<S> {
    pub fn new(config: Config, sync: S) -> Self {
        Self {
            config,
            sync,
            state: RunState::Start,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run once, stamping new generations with the local time
    pub async fn run(&mut self) -> Result<RunReport> {
        let now = chrono::Local::now().naive_local();
        self.run_at(now).await
    }

    /// Run once with an explicit generation timestamp
    pub async fn run_at(&mut self, timestamp: NaiveDateTime) -> Result<RunReport> {
        self.state = RunState::Start;
        info!(
            "[{}] Starting backup run ({} folder(s))",
            timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.config.backup.folders.len()
        );

        if let Err(e) = self.check_preconditions().await {
            self.advance(RunState::Failed);
            error!(error = %e, "Backup run aborted before any change");
            return Err(e);
        }

        self.advance(RunState::PreClean);
        let folders = self.config.backup.folders.clone();
        let pre_clean = self.prune_folders(&folders, false).await;

        let mut reports = Vec::with_capacity(folders.len());
        for folder in &folders {
            reports.push(self.backup_folder(folder, timestamp).await);
        }

        // Folders whose transfer failed keep their raw directory for inspection.
        self.advance(RunState::PostClean);
        let fetched: Vec<String> = reports
            .iter()
            .filter(|r| r.fetch == FetchOutcome::Completed)
            .map(|r| r.folder.clone())
            .collect();
        let post_clean = self.prune_folders(&fetched, false).await;

        self.advance(RunState::Done);
        let archived = reports.iter().filter(|r| r.succeeded()).count();
        info!(
            "[{}] Backup run completed: {}/{} folder(s) archived, {} deletion failure(s)",
            timestamp.format("%Y-%m-%d %H:%M:%S"),
            archived,
            reports.len(),
            pre_clean.failed.len() + post_clean.failed.len()
        );

        Ok(RunReport {
            state: self.state,
            folders: reports,
            pre_clean,
            post_clean,
        })
    }

    /// Retention pass over every configured folder, outside of a run
    pub async fn prune_all(&self, dry_run: bool) -> DeletionReport {
        let folders = self.config.backup.folders.clone();
        self.prune_folders(&folders, dry_run).await
    }

    async fn check_preconditions(&self) -> Result<()> {
        self.config.validate()?;
        self.sync.check_available().await?;
        tokio::fs::create_dir_all(&self.config.backup.root).await?;
        Ok(())
    }

    async fn backup_folder(&mut self, folder: &str, timestamp: NaiveDateTime) -> FolderReport {
        let generation = self
            .config
            .backup
            .root
            .join(make_generation_id(folder, timestamp));

        self.advance(RunState::Fetch);
        let fetch = fetch::fetch(&self.sync, folder, &generation).await;
        if let FetchOutcome::Failed(_) = fetch {
            warn!(folder = %folder, "Skipping archive and retention for this run");
            return FolderReport {
                folder: folder.to_string(),
                generation,
                fetch,
                archive: None,
            };
        }

        self.advance(RunState::Archive);
        let outcome =
            archive::archive(&generation, self.config.archive.compression_level).await;

        FolderReport {
            folder: folder.to_string(),
            generation,
            fetch,
            archive: Some(outcome),
        }
    }

    async fn prune_folders(&self, folders: &[String], dry_run: bool) -> DeletionReport {
        let root = self.config.backup.root.clone();
        let targets: Vec<(String, usize)> = folders
            .iter()
            .map(|f| (f.clone(), self.config.max_copies_for(f)))
            .collect();

        match tokio::task::spawn_blocking(move || prune_blocking(&root, &targets, dry_run)).await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Retention task panicked");
                let mut report = DeletionReport::default();
                let reason = format!("retention task failed: {}", e);
                report.failed.push((self.config.backup.root.clone(), reason));
                report
            }
        }
    }

    fn advance(&mut self, next: RunState) {
        debug!(from = ?self.state, to = ?next, "Run state");
        self.state = next;
    }
}

/// Apply each folder's retention window under `root`.
fn prune_blocking(root: &Path, targets: &[(String, usize)], dry_run: bool) -> DeletionReport {
    let mut report = DeletionReport::default();

    for (folder, max_copies) in targets {
        let policy = match RetentionPolicy::new(*max_copies) {
            Ok(policy) => policy,
            Err(e) => {
                error!(folder = %folder, error = %e, "Invalid retention window");
                report.failed.push((root.to_path_buf(), e.to_string()));
                continue;
            }
        };

        let generations = match scan_generations(root, folder) {
            Ok(generations) => generations,
            Err(e) => {
                error!(
                    folder = %folder,
                    path = %root.display(),
                    error = %e,
                    "Failed to list backups"
                );
                report.failed.push((root.to_path_buf(), e.to_string()));
                continue;
            }
        };

        sweep_intermediates(root, folder, dry_run, &mut report);

        let plan = policy.plan(generations);
        if plan.evicts_archive_for_raw() {
            warn!(
                folder = %folder,
                "Evicting archived backups while newer generations exist only as raw \
                 directories; check for repeated transfer or archival failures"
            );
        }
        if plan.delete.is_empty() {
            debug!(folder = %folder, kept = plan.keep.len(), "Nothing to prune");
            continue;
        }

        let paths: Vec<PathBuf> = plan.delete.into_iter().map(|g| g.path).collect();
        if dry_run {
            for path in &paths {
                info!(folder = %folder, path = %path.display(), "Would delete old backup");
            }
            continue;
        }

        info!(
            folder = %folder,
            max_copies = policy.max_copies(),
            "Pruning {} old backup entr{}",
            paths.len(),
            if paths.len() == 1 { "y" } else { "ies" }
        );
        report.merge(delete_batch(&paths));
    }

    report
}

/// Remove `.tar` and `.tar.zst.partial` files left by an interrupted archival.
fn sweep_intermediates(root: &Path, folder: &str, dry_run: bool, report: &mut DeletionReport) {
    let leftovers = match scan_intermediates(root, folder) {
        Ok(leftovers) => leftovers,
        Err(e) => {
            error!(folder = %folder, error = %e, "Failed to list archive leftovers");
            report.failed.push((root.to_path_buf(), e.to_string()));
            return;
        }
    };

    for path in &leftovers {
        if dry_run {
            info!(folder = %folder, path = %path.display(), "Would delete archive leftover");
        } else {
            warn!(folder = %folder, path = %path.display(), "Removing archive leftover");
        }
    }
    if !dry_run && !leftovers.is_empty() {
        report.merge(delete_batch(&leftovers));
    }
}

/// Current generation sets of every configured folder
pub fn list_generations(config: &Config) -> std::io::Result<Vec<FolderListing>> {
    config
        .backup
        .folders
        .iter()
        .map(|folder| {
            let generations = scan_generations(&config.backup.root, folder)?
                .into_iter()
                .map(|g| ListedGeneration {
                    id: g.id.to_string(),
                    form: g.form,
                    path: g.path,
                })
                .collect();
            Ok(FolderListing {
                folder: folder.clone(),
                max_copies: config.max_copies_for(folder),
                generations,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncOutput;
    use crate::utils::errors::BackupError;
    use chrono::NaiveDate;
    use std::collections::HashSet;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Writes one file per transfer, or fails for the listed folders
    struct FakeSync {
        installed: bool,
        failing: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeSync {
        fn new(failing: &[&str]) -> Self {
            Self {
                installed: true,
                failing: failing.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl SyncCollaborator for FakeSync {
        async fn check_available(&self) -> Result<()> {
            if self.installed {
                Ok(())
            } else {
                Err(BackupError::Precondition("rclone is not installed".into()))
            }
        }

        async fn sync(&self, logical_folder: &str, destination: &Path) -> SyncOutput {
            self.calls.lock().unwrap().push(logical_folder.to_string());
            if self.failing.contains(logical_folder) {
                return SyncOutput {
                    status: Some(1),
                    stdout: String::new(),
                    stderr: format!("directory not found: {}", logical_folder),
                };
            }
            fs::write(destination.join("data.txt"), logical_folder).unwrap();
            SyncOutput {
                status: Some(0),
                ..SyncOutput::default()
            }
        }
    }

    fn config(root: &Path, folders: &[&str], max_copies: usize) -> Config {
        let mut config = Config::default();
        config.remote.name = "drive".to_string();
        config.backup.root = root.to_path_buf();
        config.backup.folders = folders.iter().map(|s| s.to_string()).collect();
        config.retention.max_copies = max_copies;
        config
    }

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(3, 0, 0)
            .unwrap()
    }

    fn names(root: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_missing_sync_tool_aborts_before_mutation() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("backups");
        let mut sync = FakeSync::new(&[]);
        sync.installed = false;

        let mut controller = RunController::new(config(&root, &["Reports"], 2), sync);
        let err = controller.run_at(at(1)).await.unwrap_err();

        assert!(matches!(err, BackupError::Precondition(_)));
        assert_eq!(controller.state(), RunState::Failed);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_invalid_config_aborts() {
        let temp_dir = TempDir::new().unwrap();
        let mut controller =
            RunController::new(config(temp_dir.path(), &["Reports"], 0), FakeSync::new(&[]));
        assert!(matches!(
            controller.run_at(at(1)).await,
            Err(BackupError::Config(_))
        ));
        assert_eq!(controller.state(), RunState::Failed);
    }

    #[tokio::test]
    async fn test_run_archives_every_folder() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let mut controller =
            RunController::new(config(root, &["Reports", "Team/Invoices"], 3), FakeSync::new(&[]));

        let report = controller.run_at(at(1)).await.unwrap();

        assert_eq!(report.state, RunState::Done);
        assert_eq!(controller.state(), RunState::Done);
        assert!(report.folders.iter().all(FolderReport::succeeded));
        assert!(report.check_deletions().is_ok());
        assert_eq!(
            names(root),
            vec![
                "Reports_2024-01-01_03-00-00.tar.zst",
                "Team-Invoices_2024-01-01_03-00-00.tar.zst",
            ]
        );
    }

    #[test]
    fn test_deletion_failures_surface_as_error() {
        let mut report = RunReport {
            state: RunState::Done,
            folders: Vec::new(),
            pre_clean: DeletionReport::default(),
            post_clean: DeletionReport::default(),
        };
        report
            .pre_clean
            .failed
            .push((PathBuf::from("Reports_2024-01-01_03-00-00"), "locked".into()));
        report
            .post_clean
            .failed
            .push((PathBuf::from("Reports_2024-01-02_03-00-00.tar.zst"), "locked".into()));

        let err = report.check_deletions().unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("2 stale backup(s)"));
        assert!(err.to_string().contains("Reports_2024-01-02_03-00-00.tar.zst"));
    }

    #[tokio::test]
    async fn test_transfer_failure_is_isolated() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let sync = FakeSync::new(&["Broken"]);
        let mut controller = RunController::new(config(root, &["Broken", "Reports"], 3), sync);

        let report = controller.run_at(at(1)).await.unwrap();

        assert_eq!(report.state, RunState::Done);
        assert!(report.check_deletions().is_ok());
        assert!(matches!(
            report.folders[0].fetch,
            FetchOutcome::Failed(ref e) if e.contains("not found")
        ));
        assert!(report.folders[0].archive.is_none());
        assert!(report.folders[1].succeeded());
        assert_eq!(
            *controller.sync.calls.lock().unwrap(),
            vec!["Broken".to_string(), "Reports".to_string()]
        );

        // Failed transfer leaves its raw directory for inspection.
        assert!(root.join("Broken_2024-01-01_03-00-00").is_dir());
        assert!(root.join("Reports_2024-01-01_03-00-00.tar.zst").is_file());
        assert!(!root.join("Reports_2024-01-01_03-00-00").exists());
    }

    #[tokio::test]
    async fn test_retention_keeps_newest_generations() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        for day in 1..=3 {
            let name = format!("Reports_2024-01-0{}_03-00-00.tar.zst", day);
            fs::write(root.join(name), b"old").unwrap();
        }
        fs::write(root.join("Invoices_2024-01-01_03-00-00.tar.zst"), b"other").unwrap();

        let mut controller = RunController::new(config(root, &["Reports"], 2), FakeSync::new(&[]));
        let report = controller.run_at(at(9)).await.unwrap();

        assert_eq!(report.pre_clean.deleted.len(), 1);
        assert_eq!(report.post_clean.deleted.len(), 1);
        assert_eq!(
            names(root),
            vec![
                "Invoices_2024-01-01_03-00-00.tar.zst",
                "Reports_2024-01-03_03-00-00.tar.zst",
                "Reports_2024-01-09_03-00-00.tar.zst",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_folder_skips_post_clean_then_heals() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        for day in 1..=2 {
            let name = format!("Broken_2024-01-0{}_03-00-00.tar.zst", day);
            fs::write(root.join(name), b"old").unwrap();
        }

        let sync = FakeSync::new(&["Broken"]);
        let mut controller = RunController::new(config(root, &["Broken"], 2), sync);
        let report = controller.run_at(at(5)).await.unwrap();
        assert!(report.post_clean.deleted.is_empty());
        assert_eq!(names(root).len(), 3);

        // The next pruning pass restores the window.
        let report = controller.prune_all(false).await;
        assert_eq!(report.deleted, vec![root.join("Broken_2024-01-01_03-00-00.tar.zst")]);
        assert_eq!(
            names(root),
            vec!["Broken_2024-01-02_03-00-00.tar.zst", "Broken_2024-01-05_03-00-00"]
        );
    }

    #[tokio::test]
    async fn test_prune_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        for day in 1..=5 {
            fs::create_dir(root.join(format!("Reports_2024-01-0{}_03-00-00", day))).unwrap();
        }

        let controller = RunController::new(config(root, &["Reports"], 2), FakeSync::new(&[]));
        let first = controller.prune_all(false).await;
        assert_eq!(first.deleted.len(), 3);
        let second = controller.prune_all(false).await;
        assert!(second.deleted.is_empty());
        assert!(second.is_clean());
    }

    #[tokio::test]
    async fn test_prune_sweeps_archive_leftovers() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("Reports_2024-01-01_03-00-00.tar"), b"tar").unwrap();
        fs::write(root.join("Reports_2024-01-01_03-00-00.tar.zst.partial"), b"half").unwrap();
        fs::write(root.join("Reports_2024-01-02_03-00-00.tar.zst"), b"zst").unwrap();
        fs::write(root.join("Invoices_2024-01-01_03-00-00.tar"), b"other").unwrap();

        let controller = RunController::new(config(root, &["Reports"], 3), FakeSync::new(&[]));

        let report = controller.prune_all(true).await;
        assert!(report.deleted.is_empty());
        assert_eq!(names(root).len(), 4);

        let report = controller.prune_all(false).await;
        assert_eq!(report.deleted.len(), 2);
        assert!(report.is_clean());
        assert_eq!(
            names(root),
            vec![
                "Invoices_2024-01-01_03-00-00.tar",
                "Reports_2024-01-02_03-00-00.tar.zst",
            ]
        );
    }

    #[tokio::test]
    async fn test_run_sweeps_leftovers_before_archiving() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("Reports_2024-01-01_03-00-00.tar.zst.partial"), b"half").unwrap();

        let mut controller =
            RunController::new(config(root, &["Reports"], 3), FakeSync::new(&[]));
        let report = controller.run_at(at(2)).await.unwrap();

        assert_eq!(
            report.pre_clean.deleted,
            vec![root.join("Reports_2024-01-01_03-00-00.tar.zst.partial")]
        );
        assert_eq!(names(root), vec!["Reports_2024-01-02_03-00-00.tar.zst"]);
    }

    #[tokio::test]
    async fn test_prune_dry_run_deletes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        for day in 1..=4 {
            fs::create_dir(root.join(format!("Reports_2024-01-0{}_03-00-00", day))).unwrap();
        }

        let controller = RunController::new(config(root, &["Reports"], 1), FakeSync::new(&[]));
        let report = controller.prune_all(true).await;
        assert!(report.deleted.is_empty());
        assert_eq!(names(root).len(), 4);
    }

    #[tokio::test]
    async fn test_per_folder_window() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        for day in 1..=3 {
            fs::create_dir(root.join(format!("Reports_2024-01-0{}_03-00-00", day))).unwrap();
            fs::create_dir(root.join(format!("Invoices_2024-01-0{}_03-00-00", day))).unwrap();
        }

        let mut config = config(root, &["Reports", "Invoices"], 3);
        config.retention.per_folder.insert("Reports".to_string(), 1);
        let controller = RunController::new(config, FakeSync::new(&[]));
        let report = controller.prune_all(false).await;

        assert_eq!(report.deleted.len(), 2);
        assert_eq!(
            names(root),
            vec![
                "Invoices_2024-01-01_03-00-00",
                "Invoices_2024-01-02_03-00-00",
                "Invoices_2024-01-03_03-00-00",
                "Reports_2024-01-03_03-00-00",
            ]
        );
    }

    #[test]
    fn test_list_generations() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("Reports_2024-01-02_03-00-00")).unwrap();
        fs::write(root.join("Reports_2024-01-01_03-00-00.tar.zst"), b"z").unwrap();

        let listing = list_generations(&config(root, &["Reports", "Empty"], 4)).unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].max_copies, 4);
        assert_eq!(listing[0].generations[0].form, GenerationForm::Archived);
        assert_eq!(listing[0].generations[1].id, "Reports_2024-01-02_03-00-00");
        assert!(listing[1].generations.is_empty());

        let json = serde_json::to_value(&listing).unwrap();
        assert_eq!(json[0]["generations"][1]["form"], "raw");
    }
}
