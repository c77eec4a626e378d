//! Backup creation pipelines and retention cleanup.
//!
//! A backup runs dump → encrypt → compress → checksum against the external
//! tooling port. Any step failure puts the record into `failed` with the
//! captured error; there is no partial retry within an invocation. Callers
//! are expected to serialize backup creation (no distributed lock here).

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::connection::DbPool;
use crate::error::{BackupError, Result};
use crate::models::backup_record::{self, BackupKind, BackupRecord, BackupStatus, METADATA_VERSION};
use crate::services::{checksum, compression, crypto};
use crate::services::database_port::DatabasePort;

pub struct BackupOrchestrator {
    db: DbPool,
    config: AppConfig,
    port: Arc<dyn DatabasePort>,
}

/// On-disk names for the artifact's stage files.
struct StagePaths {
    raw: PathBuf,
    encrypted: PathBuf,
    compressed: PathBuf,
}

impl StagePaths {
    fn new(backups_dir: &std::path::Path, kind: BackupKind, now: DateTime<Utc>) -> Self {
        let stamp = now.to_rfc3339().replace([':', '.'], "-");
        let base = format!("{}_backup_{}", kind.as_str(), stamp);
        Self {
            raw: backups_dir.join(format!("{base}.raw")),
            encrypted: backups_dir.join(format!("{base}.raw.enc")),
            compressed: backups_dir.join(format!("{base}.raw.enc.gz")),
        }
    }
}

impl BackupOrchestrator {
    pub fn new(db: DbPool, config: AppConfig, port: Arc<dyn DatabasePort>) -> Self {
        Self { db, config, port }
    }

    pub async fn create_full_backup(&self) -> Result<BackupRecord> {
        let key = self.config.encryption_key()?.to_string();
        let metadata = json!({ "version": METADATA_VERSION });
        self.run_backup(BackupKind::Full, metadata, None, &key).await
    }

    /// Anchored to the most recent verified full backup. When none exists the
    /// run redirects to a full backup; that fallback is expected behavior,
    /// not an error.
    pub async fn create_incremental_backup(&self) -> Result<BackupRecord> {
        let key = self.config.encryption_key()?.to_string();

        let db = self.db.clone();
        let base = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            backup_record::find_latest_verified_full(&conn)
        })
        .await
        .map_err(anyhow::Error::from)??;

        let Some(base) = base else {
            tracing::info!("No verified full backup found, falling back to full backup");
            return self.create_full_backup().await;
        };

        let since = base.completed_at.ok_or_else(|| {
            BackupError::Internal(anyhow::anyhow!(
                "verified backup {} has no completion timestamp",
                base.id
            ))
        })?;

        let metadata = json!({
            "version": METADATA_VERSION,
            "base_backup_id": base.id,
            "base_completed_at": since.to_rfc3339(),
        });
        self.run_backup(BackupKind::Incremental, metadata, Some(since), &key).await
    }

    async fn run_backup(
        &self,
        kind: BackupKind,
        metadata: serde_json::Value,
        since: Option<DateTime<Utc>>,
        key: &str,
    ) -> Result<BackupRecord> {
        let db = self.db.clone();
        let record = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            let record = backup_record::create(&conn, kind, &metadata)?;
            backup_record::update_status(&conn, &record.id, BackupStatus::InProgress)?;
            Ok::<_, anyhow::Error>(record)
        })
        .await
        .map_err(anyhow::Error::from)??;

        tracing::info!(backup_id = %record.id, kind = kind.as_str(), "Starting backup");
        let start = std::time::Instant::now();

        let paths = StagePaths::new(&self.config.backups_dir, kind, Utc::now());
        let outcome = self.run_pipeline(&paths, since, key).await;

        match outcome {
            Ok((size, digest)) => {
                let duration_secs = start.elapsed().as_secs() as i64;
                let db = self.db.clone();
                let id = record.id.clone();
                let path = paths.compressed.to_string_lossy().into_owned();
                let digest_c = digest.clone();
                let updated = tokio::task::spawn_blocking(move || {
                    let conn = db.get()?;
                    backup_record::mark_completed(&conn, &id, &path, size, &digest_c, duration_secs)?;
                    backup_record::find_by_id(&conn, &id)?
                        .ok_or_else(|| anyhow::anyhow!("record vanished during completion"))
                })
                .await
                .map_err(anyhow::Error::from)??;

                tracing::info!(
                    backup_id = %updated.id,
                    size,
                    duration_secs,
                    checksum = %digest,
                    "Backup completed"
                );

                if let Err(e) = self.cleanup_expired_backups().await {
                    tracing::warn!(error = %e, "Retention cleanup failed");
                }
                Ok(updated)
            }
            Err(e) => {
                let db = self.db.clone();
                let id = record.id.clone();
                let message = e.to_string();
                let msg = message.clone();
                let _ = tokio::task::spawn_blocking(move || {
                    let conn = db.get()?;
                    backup_record::mark_failed(&conn, &id, &msg)
                })
                .await;
                tracing::error!(backup_id = %record.id, error = %message, "Backup failed");
                Err(e)
            }
        }
    }

    /// Writes each stage file, removing the previous stage once the next one
    /// is durable. Stage files are swept on failure, best effort.
    async fn run_pipeline(
        &self,
        paths: &StagePaths,
        since: Option<DateTime<Utc>>,
        key: &str,
    ) -> Result<(i64, String)> {
        let result = self.pipeline_steps(paths, since, key).await;
        if result.is_err() {
            for stale in [&paths.raw, &paths.encrypted, &paths.compressed] {
                if let Err(e) = tokio::fs::remove_file(stale).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(path = %stale.display(), error = %e, "Failed to remove stage file");
                    }
                }
            }
        }
        result
    }

    async fn pipeline_steps(
        &self,
        paths: &StagePaths,
        since: Option<DateTime<Utc>>,
        key: &str,
    ) -> Result<(i64, String)> {
        tokio::fs::create_dir_all(&self.config.backups_dir).await?;

        let dump = match since {
            Some(ts) => self.port.dump_incremental(ts).await?,
            None => self.port.dump_full().await?,
        };
        tokio::fs::write(&paths.raw, &dump).await?;

        let envelope = crypto::encrypt(&dump, key)?;
        tokio::fs::write(&paths.encrypted, &envelope).await?;
        tokio::fs::remove_file(&paths.raw).await?;

        let packed = compression::compress(&envelope)?;
        tokio::fs::write(&paths.compressed, &packed).await?;
        tokio::fs::remove_file(&paths.encrypted).await?;

        let digest = checksum::digest(&packed);
        let size = tokio::fs::metadata(&paths.compressed).await?.len() as i64;
        Ok((size, digest))
    }

    /// Purges on-disk artifact and record for completed backups past the
    /// retention window. Per-item failures are logged and skipped; the sweep
    /// never aborts.
    pub async fn cleanup_expired_backups(&self) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(self.config.retention_days);

        let db = self.db.clone();
        let expired = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            backup_record::find_expired_completed(&conn, cutoff)
        })
        .await
        .map_err(anyhow::Error::from)??;

        let mut removed = 0;
        for record in expired {
            if let Some(path) = &record.file_path {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(backup_id = %record.id, path = %path, error = %e, "Failed to delete expired artifact");
                        continue;
                    }
                }
            }

            let db = self.db.clone();
            let id = record.id.clone();
            match tokio::task::spawn_blocking(move || {
                let conn = db.get()?;
                backup_record::delete(&conn, &id)
            })
            .await
            {
                Ok(Ok(_)) => {
                    tracing::info!(backup_id = %record.id, "Expired backup purged");
                    removed += 1;
                }
                Ok(Err(e)) => {
                    tracing::warn!(backup_id = %record.id, error = %e, "Failed to delete expired record")
                }
                Err(e) => {
                    tracing::warn!(backup_id = %record.id, error = %e, "Failed to delete expired record")
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database_port::testing::StubPort;
    use crate::services::testing::TestEnv;
    use rusqlite::params;

    fn orchestrator(env: &TestEnv, port: StubPort) -> (BackupOrchestrator, Arc<StubPort>) {
        let port = Arc::new(port);
        (
            BackupOrchestrator::new(env.pool.clone(), env.config.clone(), port.clone()),
            port,
        )
    }

    #[tokio::test]
    async fn full_backup_records_checksum_and_size_of_artifact() {
        let env = TestEnv::new();
        let (orch, _) = orchestrator(&env, StubPort::default());

        let record = orch.create_full_backup().await.unwrap();
        assert_eq!(record.kind, BackupKind::Full);
        assert_eq!(record.status, BackupStatus::Completed);
        assert!(record.encrypted && record.compressed);

        let path = PathBuf::from(record.file_path.as_deref().unwrap());
        assert!(path.to_string_lossy().ends_with(".raw.enc.gz"));

        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(record.checksum.as_deref().unwrap(), checksum::digest(&on_disk));
        assert_eq!(record.file_size, Some(on_disk.len() as i64));

        // Stage files were removed
        let dir_entries: Vec<_> = std::fs::read_dir(&env.config.backups_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(dir_entries.len(), 1);
    }

    #[tokio::test]
    async fn artifact_decrypts_back_to_dump() {
        let env = TestEnv::new();
        let (orch, _) = orchestrator(&env, StubPort::default());

        let record = orch.create_full_backup().await.unwrap();
        let packed = std::fs::read(record.file_path.unwrap()).unwrap();
        let envelope = compression::decompress(&packed).unwrap();
        let plaintext = crypto::decrypt(&envelope, "test-key").unwrap();
        assert!(plaintext.starts_with(b"-- PostgreSQL database dump"));
    }

    #[tokio::test]
    async fn dump_failure_marks_record_failed_without_artifact() {
        let env = TestEnv::new();
        let (orch, _) = orchestrator(&env, StubPort::failing_dump());

        let err = orch.create_full_backup().await.unwrap_err();
        assert!(matches!(err, BackupError::ExternalTool(_)));

        let conn = env.pool.get().unwrap();
        let records = backup_record::find_recent(&conn, 10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, BackupStatus::Failed);
        assert!(records[0].file_path.is_none());
        assert!(records[0].checksum.is_none());
        assert!(records[0].error_message.as_deref().unwrap().contains("pg_dump"));
    }

    #[tokio::test]
    async fn missing_key_fails_before_creating_any_record() {
        let mut env = TestEnv::new();
        env.config.encryption_key = None;
        let (orch, port) = orchestrator(&env, StubPort::default());

        let err = orch.create_full_backup().await.unwrap_err();
        assert!(matches!(err, BackupError::Configuration(_)));
        assert!(port.calls().is_empty());

        let conn = env.pool.get().unwrap();
        assert!(backup_record::find_recent(&conn, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn incremental_without_verified_full_falls_back_to_full() {
        let env = TestEnv::new();
        let (orch, port) = orchestrator(&env, StubPort::default());

        let record = orch.create_incremental_backup().await.unwrap();
        assert_eq!(record.kind, BackupKind::Full);
        assert_eq!(port.calls(), vec!["dump_full".to_string()]);
    }

    #[tokio::test]
    async fn incremental_anchors_to_verified_full_base() {
        let env = TestEnv::new();
        let (orch, port) = orchestrator(&env, StubPort::default());

        let base = orch.create_full_backup().await.unwrap();
        {
            let conn = env.pool.get().unwrap();
            backup_record::mark_verified(&conn, &base.id, "ops").unwrap();
        }

        let inc = orch.create_incremental_backup().await.unwrap();
        assert_eq!(inc.kind, BackupKind::Incremental);
        assert_eq!(inc.metadata["base_backup_id"], base.id.as_str());
        assert!(inc.metadata["base_completed_at"].is_string());
        assert!(port.calls().iter().any(|c| c.starts_with("dump_incremental ")));
    }

    #[tokio::test]
    async fn retention_sweep_purges_only_expired_completed_records() {
        let env = TestEnv::new();
        let (orch, _) = orchestrator(&env, StubPort::default());

        let old = orch.create_full_backup().await.unwrap();
        let fresh = orch.create_full_backup().await.unwrap();

        let stale_ts = (Utc::now() - Duration::days(45)).to_rfc3339();
        {
            let conn = env.pool.get().unwrap();
            conn.execute(
                "UPDATE backup_records SET completed_at = ? WHERE id = ?",
                params![stale_ts, old.id],
            )
            .unwrap();
        }

        let removed = orch.cleanup_expired_backups().await.unwrap();
        assert_eq!(removed, 1);

        let conn = env.pool.get().unwrap();
        assert!(backup_record::find_by_id(&conn, &old.id).unwrap().is_none());
        assert!(backup_record::find_by_id(&conn, &fresh.id).unwrap().is_some());
        assert!(!std::path::Path::new(old.file_path.as_deref().unwrap()).exists());
        assert!(std::path::Path::new(fresh.file_path.as_deref().unwrap()).exists());
    }
}
