//! Cron-driven execution of backups, verification sweeps, and health checks.
//!
//! Schedules are fixed at startup from configuration; a failing run is logged
//! and the schedule keeps firing.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::state::AppState;

pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    state: Arc<AppState>,
}

impl BackupScheduler {
    pub async fn new(state: Arc<AppState>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            state,
        })
    }

    async fn add_job(&self, name: &'static str, cron: &str, job: Job) -> anyhow::Result<()> {
        self.scheduler.lock().await.add(job).await?;
        tracing::info!(job = name, cron = %cron, "Job scheduled");
        Ok(())
    }

    pub async fn init_schedules(&self) -> anyhow::Result<()> {
        let cron = self.state.config.full_backup_cron.clone();
        let state = self.state.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let state = state.clone();
            Box::pin(async move {
                tracing::info!("Starting scheduled full backup");
                if let Err(e) = state.orchestrator.create_full_backup().await {
                    tracing::error!(error = %e, "Scheduled full backup failed");
                }
                if let Err(e) = state.orchestrator.cleanup_expired_backups().await {
                    tracing::error!(error = %e, "Retention cleanup failed");
                }
            })
        })?;
        self.add_job("full_backup", &cron, job).await?;

        let cron = self.state.config.incremental_backup_cron.clone();
        let state = self.state.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let state = state.clone();
            Box::pin(async move {
                tracing::info!("Starting scheduled incremental backup");
                if let Err(e) = state.orchestrator.create_incremental_backup().await {
                    tracing::error!(error = %e, "Scheduled incremental backup failed");
                }
            })
        })?;
        self.add_job("incremental_backup", &cron, job).await?;

        let cron = self.state.config.verification_cron.clone();
        let state = self.state.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let state = state.clone();
            Box::pin(async move {
                match state.verification.verify_recent_backups().await {
                    Ok(passed) => tracing::info!(passed, "Scheduled verification sweep finished"),
                    Err(e) => tracing::error!(error = %e, "Scheduled verification sweep failed"),
                }
            })
        })?;
        self.add_job("verification", &cron, job).await?;

        let cron = self.state.config.health_check_cron.clone();
        let state = self.state.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let state = state.clone();
            Box::pin(async move {
                if let Err(e) = state.monitor.run_scheduled_check().await {
                    tracing::error!(error = %e, "Scheduled health check failed");
                }
            })
        })?;
        self.add_job("health_check", &cron, job).await?;

        tracing::info!("Cron schedules initialized");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}
