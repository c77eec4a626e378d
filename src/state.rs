use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::connection::DbPool;
use crate::error::Result;
use crate::models::backup_record::{self, BackupRecord};
use crate::models::recovery_test::{self, RecoveryTest};
use crate::services::database_port::DatabasePort;
use crate::services::health_monitor::BackupHealthMonitor;
use crate::services::orchestrator::BackupOrchestrator;
use crate::services::recovery_executor::DisasterRecoveryExecutor;
use crate::services::recovery_planner::DisasterRecoveryPlanner;
use crate::services::verification::BackupVerificationService;

/// Shared application state: the metadata pool, configuration, and one
/// instance of each service, all wired to the same database port.
pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub orchestrator: BackupOrchestrator,
    pub verification: BackupVerificationService,
    pub planner: DisasterRecoveryPlanner,
    pub executor: DisasterRecoveryExecutor,
    pub monitor: BackupHealthMonitor,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig, port: Arc<dyn DatabasePort>) -> Self {
        Self {
            orchestrator: BackupOrchestrator::new(db.clone(), config.clone(), port.clone()),
            verification: BackupVerificationService::new(db.clone(), config.clone()),
            planner: DisasterRecoveryPlanner::new(db.clone()),
            executor: DisasterRecoveryExecutor::new(db.clone(), config.clone(), port),
            monitor: BackupHealthMonitor::new(db.clone()),
            db,
            config,
        }
    }

    pub async fn backup_history(&self, limit: i64) -> Result<Vec<BackupRecord>> {
        let db = self.db.clone();
        let records = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            backup_record::find_recent(&conn, limit)
        })
        .await
        .map_err(anyhow::Error::from)??;
        Ok(records)
    }

    pub async fn recovery_tests(&self, limit: i64) -> Result<Vec<RecoveryTest>> {
        let db = self.db.clone();
        let tests = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            recovery_test::find_recent(&conn, limit)
        })
        .await
        .map_err(anyhow::Error::from)??;
        Ok(tests)
    }
}
