use crate::error::{BackupError, Result};
use std::path::PathBuf;

/// Connection parameters handed to the dump/restore tooling port.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub backups_dir: PathBuf,
    /// Symmetric key material for artifact envelopes. Optional at load time;
    /// operations that need it fail with a configuration error before any
    /// side effect.
    pub encryption_key: Option<String>,
    pub retention_days: i64,
    pub verification_batch_size: usize,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub full_backup_cron: String,
    pub incremental_backup_cron: String,
    pub verification_cron: String,
    pub health_check_cron: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let data_dir = PathBuf::from(
            std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".into()),
        );

        Self {
            db_path: data_dir.join("durability.db"),
            backups_dir: PathBuf::from(
                std::env::var("BACKUPS_DIR").unwrap_or_else(|_| "/var/lib/durability/backups".into()),
            ),
            data_dir,
            encryption_key: std::env::var("BACKUP_ENCRYPTION_KEY").ok(),
            retention_days: std::env::var("BACKUP_RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            verification_batch_size: std::env::var("VERIFICATION_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            database: DatabaseConfig {
                host: std::env::var("PGHOST").unwrap_or_else(|_| "localhost".into()),
                port: std::env::var("PGPORT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5432),
                user: std::env::var("PGUSER").unwrap_or_else(|_| "postgres".into()),
                password: std::env::var("PGPASSWORD").unwrap_or_default(),
                name: std::env::var("PGDATABASE").unwrap_or_else(|_| "app".into()),
            },
            full_backup_cron: std::env::var("FULL_BACKUP_CRON")
                .unwrap_or_else(|_| "0 0 2 * * Sun".into()),
            incremental_backup_cron: std::env::var("INCREMENTAL_BACKUP_CRON")
                .unwrap_or_else(|_| "0 0 3 * * Mon-Sat".into()),
            verification_cron: std::env::var("VERIFICATION_CRON")
                .unwrap_or_else(|_| "0 0 5 * * *".into()),
            health_check_cron: std::env::var("HEALTH_CHECK_CRON")
                .unwrap_or_else(|_| "0 0 * * * *".into()),
        }
    }

    /// Key material, or a configuration error when none was supplied.
    pub fn encryption_key(&self) -> Result<&str> {
        self.encryption_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                BackupError::Configuration("BACKUP_ENCRYPTION_KEY is not set".into())
            })
    }
}
