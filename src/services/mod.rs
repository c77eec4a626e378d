pub mod checksum;
pub mod compression;
pub mod crypto;
pub mod database_port;
pub mod health_monitor;
pub mod orchestrator;
pub mod recovery_executor;
pub mod recovery_planner;
pub mod scheduler;
pub mod verification;

#[cfg(test)]
pub(crate) mod testing {
    use crate::config::{AppConfig, DatabaseConfig};
    use crate::db::connection::{create_pool, DbPool};
    use crate::db::migrate::migrate;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// File-backed metadata store plus a config pointing every path at a
    /// throwaway directory. The tempdir lives as long as the env.
    pub struct TestEnv {
        pub pool: DbPool,
        pub config: AppConfig,
        _dir: TempDir,
    }

    impl TestEnv {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root: PathBuf = dir.path().to_path_buf();
            let backups_dir = root.join("backups");
            std::fs::create_dir_all(&backups_dir).unwrap();

            let db_path = root.join("meta.db");
            let pool = create_pool(&db_path).unwrap();
            migrate(&pool).unwrap();

            let config = AppConfig {
                data_dir: root.clone(),
                db_path,
                backups_dir,
                encryption_key: Some("test-key".into()),
                retention_days: 30,
                verification_batch_size: 5,
                log_level: "info".into(),
                database: DatabaseConfig {
                    host: "localhost".into(),
                    port: 5432,
                    user: "postgres".into(),
                    password: String::new(),
                    name: "app".into(),
                },
                full_backup_cron: "0 0 2 * * Sun".into(),
                incremental_backup_cron: "0 0 3 * * Mon-Sat".into(),
                verification_cron: "0 0 5 * * *".into(),
                health_check_cron: "0 0 * * * *".into(),
            };

            Self { pool, config, _dir: dir }
        }
    }
}
