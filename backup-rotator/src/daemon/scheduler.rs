//! Cron-driven backup runs.

use crate::executor::RunController;
use crate::sync::SyncCollaborator;
use crate::utils::errors::{BackupError, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

pub struct RunScheduler<S> {
    scheduler: Mutex<JobScheduler>,
    controller: Arc<Mutex<RunController<S>>>,
}

impl<S> RunScheduler<S>
where
    S: SyncCollaborator + Send + Sync + 'static,
{
    pub async fn new(controller: RunController<S>) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| BackupError::Schedule(e.to_string()))?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            controller: Arc::new(Mutex::new(controller)),
        })
    }

    /// Register a full backup run on `cron_expression` (seconds field included).
    ///
    /// A tick that fires while the previous run is still going is skipped.
    pub async fn schedule(&self, cron_expression: &str) -> Result<()> {
        let controller = Arc::clone(&self.controller);

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let controller = Arc::clone(&controller);
            Box::pin(async move {
                let Ok(mut controller) = controller.try_lock() else {
                    warn!("Skipping scheduled run: previous run still in progress");
                    return;
                };

                info!("Starting scheduled backup run");
                match controller.run().await.and_then(|r| r.check_deletions()) {
                    Ok(()) => {}
                    Err(e @ BackupError::Deletion(_)) => {
                        warn!(error = %e, "Scheduled run left stale backups on disk");
                    }
                    Err(e) => error!(error = %e, "Scheduled backup run failed"),
                }
            })
        })
        .map_err(|e| {
            BackupError::Schedule(format!("invalid cron \"{}\": {}", cron_expression, e))
        })?;

        self.scheduler
            .lock()
            .await
            .add(job)
            .await
            .map_err(|e| BackupError::Schedule(e.to_string()))?;
        info!(cron = %cron_expression, "Backup run scheduled");
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler
            .lock()
            .await
            .start()
            .await
            .map_err(|e| BackupError::Schedule(e.to_string()))
    }

    /// Stop scheduling and wait for a run in progress to finish
    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler
            .lock()
            .await
            .shutdown()
            .await
            .map_err(|e| BackupError::Schedule(e.to_string()))?;

        let _idle = self.controller.lock().await;
        info!("Scheduler stopped");
        Ok(())
    }
}
