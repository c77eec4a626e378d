//! Artifact verification and compliance promotion.
//!
//! A completed backup becomes `verified` only when every predicate holds:
//! the artifact exists, its checksum and size match the record, the encrypted
//! flag is set, the metadata carries the version marker, and the artifact is
//! still within the retention window. The first failing predicate is surfaced
//! and the record stays `completed` with compliance unset.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::path::Path;

use crate::config::AppConfig;
use crate::db::connection::DbPool;
use crate::error::{BackupError, Result};
use crate::models::backup_record::{self, BackupRecord, BackupStatus, METADATA_VERSION};
use crate::services::checksum;

pub struct BackupVerificationService {
    db: DbPool,
    config: AppConfig,
}

/// Snapshot of verification coverage across the backup history.
#[derive(Debug, Serialize)]
pub struct VerificationStatus {
    pub total_backups: usize,
    pub verified: usize,
    pub awaiting_verification: usize,
    pub failed: usize,
    pub last_verified_at: Option<chrono::DateTime<Utc>>,
}

impl BackupVerificationService {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        Self { db, config }
    }

    pub async fn verify_backup(&self, id: &str, verified_by: &str) -> Result<BackupRecord> {
        let db = self.db.clone();
        let id_owned = id.to_string();
        let record = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            backup_record::find_by_id(&conn, &id_owned)
        })
        .await
        .map_err(anyhow::Error::from)??
        .ok_or_else(|| BackupError::NotFound(format!("backup {id}")))?;

        if record.status != BackupStatus::Completed {
            return Err(BackupError::Precondition(format!(
                "backup {} is {}, only completed backups can be verified",
                record.id,
                record.status.as_str()
            )));
        }

        self.check_artifact(&record)?;

        let db = self.db.clone();
        let id_owned = record.id.clone();
        let by = verified_by.to_string();
        let verified = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            backup_record::mark_verified(&conn, &id_owned, &by)?;
            backup_record::find_by_id(&conn, &id_owned)?
                .ok_or_else(|| anyhow::anyhow!("record vanished during verification"))
        })
        .await
        .map_err(anyhow::Error::from)??;

        tracing::info!(backup_id = %verified.id, verified_by, "Backup verified");
        Ok(verified)
    }

    fn check_artifact(&self, record: &BackupRecord) -> Result<()> {
        let path = record
            .file_path
            .as_deref()
            .ok_or_else(|| BackupError::NotFound(format!("backup {} has no artifact path", record.id)))?;

        if !Path::new(path).exists() {
            return Err(BackupError::NotFound(format!("backup artifact not found: {path}")));
        }

        let stored = record.checksum.as_deref().ok_or_else(|| {
            BackupError::Integrity(format!("backup {} has no stored checksum", record.id))
        })?;
        if !checksum::verify(Path::new(path), stored)? {
            return Err(BackupError::Integrity(format!(
                "checksum mismatch for {path}: artifact no longer matches stored digest"
            )));
        }

        let on_disk = std::fs::metadata(path)?.len() as i64;
        if record.file_size != Some(on_disk) {
            return Err(BackupError::Integrity(format!(
                "size mismatch for {path}: stored {:?}, on disk {on_disk}",
                record.file_size
            )));
        }

        if !record.encrypted {
            return Err(BackupError::Precondition(format!(
                "backup {} is not marked encrypted at rest",
                record.id
            )));
        }

        if record.metadata.get("version").and_then(|v| v.as_str()) != Some(METADATA_VERSION) {
            return Err(BackupError::Precondition(format!(
                "backup {} metadata is missing the version marker",
                record.id
            )));
        }

        let cutoff = Utc::now() - Duration::days(self.config.retention_days);
        let completed_at = record.completed_at.ok_or_else(|| {
            BackupError::Precondition(format!("backup {} has no completion timestamp", record.id))
        })?;
        if completed_at < cutoff {
            return Err(BackupError::Precondition(format!(
                "backup {} is older than the {}-day retention window",
                record.id, self.config.retention_days
            )));
        }

        Ok(())
    }

    /// Scheduled sweep over the most recent completed backups. Each item is
    /// verified independently; one failure never stops the rest.
    pub async fn verify_recent_backups(&self) -> Result<usize> {
        let db = self.db.clone();
        let batch = self.config.verification_batch_size as i64;
        let candidates = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            backup_record::find_recent_completed(&conn, batch)
        })
        .await
        .map_err(anyhow::Error::from)??;

        let mut passed = 0;
        for record in candidates {
            match self.verify_backup(&record.id, "scheduled-verification").await {
                Ok(_) => passed += 1,
                Err(e) => {
                    tracing::warn!(backup_id = %record.id, error = %e, "Scheduled verification failed")
                }
            }
        }
        Ok(passed)
    }

    pub async fn verification_status(&self) -> Result<VerificationStatus> {
        let db = self.db.clone();
        let records = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            backup_record::find_recent(&conn, i64::MAX)
        })
        .await
        .map_err(anyhow::Error::from)??;

        Ok(VerificationStatus {
            total_backups: records.len(),
            verified: records.iter().filter(|r| r.status == BackupStatus::Verified).count(),
            awaiting_verification: records
                .iter()
                .filter(|r| r.status == BackupStatus::Completed)
                .count(),
            failed: records.iter().filter(|r| r.status == BackupStatus::Failed).count(),
            last_verified_at: records.iter().filter_map(|r| r.verified_at).max(),
        })
    }
}
