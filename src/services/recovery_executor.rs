//! Recovery execution: real restores and rehearsal drills.
//!
//! Every run is fail-fast: the artifact checksum gates decompression, which
//! gates decryption, which gates any database contact. Rehearsals restore
//! into a uniquely named scratch database that is always dropped afterwards,
//! even when the restore itself fails. Temporary plaintext files are removed
//! on every exit path; cleanup failures are logged and never mask the
//! original outcome.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::connection::DbPool;
use crate::error::{BackupError, Result};
use crate::models::backup_record::{self, BackupRecord, BackupStatus};
use crate::models::recovery_test::{self, RecoveryTest, RecoveryTestType, StepOutcome};
use crate::services::database_port::DatabasePort;
use crate::services::{checksum, compression, crypto};

#[derive(Debug, Clone)]
pub struct RecoveryOptions {
    pub backup_id: String,
    /// Destructive restores go here; `None` targets the configured database.
    pub target_database: Option<String>,
    /// Rehearse into a scratch database instead of touching the target.
    pub validate_only: bool,
    /// Accepted for interface compatibility; point-in-time recovery is not
    /// implemented and the value is ignored.
    pub point_in_time: Option<DateTime<Utc>>,
}

pub struct DisasterRecoveryExecutor {
    db: DbPool,
    config: AppConfig,
    port: Arc<dyn DatabasePort>,
}

fn note<T>(steps: &mut Vec<StepOutcome>, name: &str, result: Result<T>) -> Result<T> {
    match result {
        Ok(v) => {
            steps.push(StepOutcome::passed(name));
            Ok(v)
        }
        Err(e) => {
            steps.push(StepOutcome::failed(name, e.to_string()));
            Err(e)
        }
    }
}

impl DisasterRecoveryExecutor {
    pub fn new(db: DbPool, config: AppConfig, port: Arc<dyn DatabasePort>) -> Self {
        Self { db, config, port }
    }

    pub async fn perform_recovery(
        &self,
        options: RecoveryOptions,
        performed_by: &str,
    ) -> Result<RecoveryTest> {
        // Preconditions fail before any RecoveryTest exists.
        let key = self.config.encryption_key()?.to_string();
        let record = self.load_verified_backup(&options.backup_id).await?;

        if options.point_in_time.is_some() {
            tracing::warn!(backup_id = %record.id, "Point-in-time target ignored: not supported");
        }

        let test_type = if options.validate_only {
            RecoveryTestType::Validation
        } else {
            RecoveryTestType::Full
        };

        let db = self.db.clone();
        let backup_id = record.id.clone();
        let by = performed_by.to_string();
        let test = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            recovery_test::create(&conn, &backup_id, test_type, &by)
        })
        .await
        .map_err(anyhow::Error::from)??;

        tracing::info!(
            test_id = %test.id,
            backup_id = %record.id,
            validate_only = options.validate_only,
            "Starting recovery"
        );

        let start = std::time::Instant::now();
        let plaintext_path = self.config.data_dir.join(format!("restore_{}.sql", test.id));

        let mut steps = Vec::new();
        let outcome = self
            .run_steps(&record, &options, &key, &plaintext_path, &mut steps)
            .await;

        // Temp plaintext never outlives the run, whatever the outcome.
        if let Err(e) = tokio::fs::remove_file(&plaintext_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %plaintext_path.display(), error = %e, "Failed to remove temp restore file");
            }
        }

        let duration_secs = start.elapsed().as_secs() as i64;
        let db = self.db.clone();
        let test_id = test.id.clone();

        match outcome {
            Ok(notes) => {
                let finished = tokio::task::spawn_blocking(move || {
                    let conn = db.get()?;
                    recovery_test::mark_passed(&conn, &test_id, &steps, duration_secs, Some(notes.as_str()))?;
                    recovery_test::find_by_id(&conn, &test_id)?
                        .ok_or_else(|| anyhow::anyhow!("recovery test vanished"))
                })
                .await
                .map_err(anyhow::Error::from)??;
                tracing::info!(test_id = %finished.id, duration_secs, "Recovery passed");
                Ok(finished)
            }
            Err(e) => {
                let message = e.to_string();
                let msg = message.clone();
                let _ = tokio::task::spawn_blocking(move || {
                    let conn = db.get()?;
                    recovery_test::mark_failed(&conn, &test_id, &msg, &steps, duration_secs)
                })
                .await;
                tracing::error!(test_id = %test.id, error = %message, "Recovery failed");
                Err(e)
            }
        }
    }

    /// Rehearsal sugar: validate-only recovery of the given backup.
    pub async fn schedule_recovery_test(
        &self,
        backup_id: &str,
        tested_by: &str,
    ) -> Result<RecoveryTest> {
        self.perform_recovery(
            RecoveryOptions {
                backup_id: backup_id.to_string(),
                target_database: None,
                validate_only: true,
                point_in_time: None,
            },
            tested_by,
        )
        .await
    }

    async fn load_verified_backup(&self, backup_id: &str) -> Result<BackupRecord> {
        let db = self.db.clone();
        let id = backup_id.to_string();
        let record = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            backup_record::find_by_id(&conn, &id)
        })
        .await
        .map_err(anyhow::Error::from)??
        .ok_or_else(|| BackupError::NotFound(format!("backup {backup_id}")))?;

        if record.status != BackupStatus::Verified {
            return Err(BackupError::Precondition(format!(
                "backup {} is {}, only verified backups are restorable",
                record.id,
                record.status.as_str()
            )));
        }
        Ok(record)
    }

    async fn run_steps(
        &self,
        record: &BackupRecord,
        options: &RecoveryOptions,
        key: &str,
        plaintext_path: &Path,
        steps: &mut Vec<StepOutcome>,
    ) -> Result<String> {
        let artifact = record.file_path.as_deref().ok_or_else(|| {
            BackupError::Integrity(format!("backup {} has no artifact path", record.id))
        })?;
        let stored = record.checksum.as_deref().ok_or_else(|| {
            BackupError::Integrity(format!("backup {} has no stored checksum", record.id))
        })?;

        // Integrity gate: nothing touches a database past a bad digest.
        note(
            steps,
            "verify_checksum",
            checksum::verify(Path::new(artifact), stored).and_then(|ok| {
                if ok {
                    Ok(())
                } else {
                    Err(BackupError::Integrity(format!(
                        "artifact checksum mismatch for {artifact}"
                    )))
                }
            }),
        )?;

        let packed = tokio::fs::read(artifact).await?;
        let envelope = note(steps, "decompress", compression::decompress(&packed))?;
        let plaintext = note(steps, "decrypt", crypto::decrypt(&envelope, key))?;

        tokio::fs::create_dir_all(plaintext_path.parent().unwrap_or(Path::new("."))).await?;
        tokio::fs::write(plaintext_path, &plaintext).await?;

        if options.validate_only {
            self.rehearse(plaintext_path, steps).await
        } else {
            let target = options
                .target_database
                .clone()
                .unwrap_or_else(|| self.config.database.name.clone());
            self.restore_destructive(plaintext_path, &target, steps).await
        }
    }

    /// Restore into a throwaway database and sanity-check the schema. The
    /// scratch database is dropped on every path out of here.
    async fn rehearse(&self, dump: &Path, steps: &mut Vec<StepOutcome>) -> Result<String> {
        let scratch = format!("restore_validation_{}", Uuid::new_v4().simple());

        note(steps, "create_scratch_database", self.port.create_database(&scratch).await)?;

        let inner = async {
            note(steps, "restore", self.port.restore(dump, &scratch).await)?;
            note(steps, "schema_check", self.port.schema_check(&scratch).await)
        }
        .await;

        match self.port.drop_database(&scratch).await {
            Ok(()) => steps.push(StepOutcome::passed("drop_scratch_database")),
            Err(e) => {
                tracing::warn!(scratch = %scratch, error = %e, "Failed to drop scratch database");
                steps.push(StepOutcome::failed("drop_scratch_database", e.to_string()));
            }
        }

        inner?;
        Ok(format!("validated restore into scratch database {scratch}"))
    }

    /// Drop-and-recreate restore into the target database.
    async fn restore_destructive(
        &self,
        dump: &Path,
        target: &str,
        steps: &mut Vec<StepOutcome>,
    ) -> Result<String> {
        note(steps, "drop_target_database", self.port.drop_database(target).await)?;
        note(steps, "recreate_target_database", self.port.create_database(target).await)?;
        note(steps, "restore", self.port.restore(dump, target).await)?;
        note(steps, "schema_check", self.port.schema_check(target).await)?;
        Ok(format!("restored into database {target}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::recovery_test::RecoveryStatus;
    use crate::services::database_port::testing::StubPort;
    use crate::services::orchestrator::BackupOrchestrator;
    use crate::services::testing::TestEnv;

    async fn verified_backup(env: &TestEnv) -> BackupRecord {
        let orch = BackupOrchestrator::new(
            env.pool.clone(),
            env.config.clone(),
            Arc::new(StubPort::default()),
        );
        let record = orch.create_full_backup().await.unwrap();
        let conn = env.pool.get().unwrap();
        backup_record::mark_verified(&conn, &record.id, "ops").unwrap();
        backup_record::find_by_id(&conn, &record.id).unwrap().unwrap()
    }

    fn executor(env: &TestEnv, port: StubPort) -> (DisasterRecoveryExecutor, Arc<StubPort>) {
        let port = Arc::new(port);
        (
            DisasterRecoveryExecutor::new(env.pool.clone(), env.config.clone(), port.clone()),
            port,
        )
    }

    fn recovery_test_rows(env: &TestEnv) -> Vec<RecoveryTest> {
        let conn = env.pool.get().unwrap();
        recovery_test::find_recent(&conn, 100).unwrap()
    }

    #[tokio::test]
    async fn validation_restores_into_scratch_and_always_drops_it() {
        let env = TestEnv::new();
        let record = verified_backup(&env).await;
        let (exec, port) = executor(&env, StubPort::default());

        let test = exec.schedule_recovery_test(&record.id, "ops").await.unwrap();
        assert_eq!(test.status, RecoveryStatus::Passed);
        assert_eq!(test.test_type, RecoveryTestType::Validation);
        assert!(test.results.as_ref().unwrap().iter().all(|s| s.passed));

        let calls = port.calls();
        let scratch = calls
            .iter()
            .find_map(|c| c.strip_prefix("create "))
            .expect("scratch database created");
        assert!(scratch.starts_with("restore_validation_"));
        assert!(calls.contains(&format!("restore {scratch}")));
        assert!(calls.contains(&format!("schema_check {scratch}")));
        assert!(calls.contains(&format!("drop {scratch}")));
        // The configured target database was never touched.
        assert!(!calls.iter().any(|c| c.contains(&env.config.database.name)));
    }

    #[tokio::test]
    async fn failed_restore_still_drops_the_scratch_database() {
        let env = TestEnv::new();
        let record = verified_backup(&env).await;
        let (exec, port) = executor(&env, StubPort::failing_restore());

        let err = exec.schedule_recovery_test(&record.id, "ops").await.unwrap_err();
        assert!(matches!(err, BackupError::ExternalTool(_)));

        let calls = port.calls();
        let scratch = calls.iter().find_map(|c| c.strip_prefix("create ")).unwrap().to_string();
        assert!(calls.contains(&format!("drop {scratch}")));

        let tests = recovery_test_rows(&env);
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].status, RecoveryStatus::Failed);
        let results = tests[0].results.as_ref().unwrap();
        assert!(results.iter().any(|s| s.step == "restore" && !s.passed));
    }

    #[tokio::test]
    async fn tampered_artifact_aborts_before_any_database_contact() {
        let env = TestEnv::new();
        let record = verified_backup(&env).await;
        let path = record.file_path.as_deref().unwrap();
        let mut bytes = std::fs::read(path).unwrap();
        bytes[0] ^= 0xff;
        std::fs::write(path, bytes).unwrap();

        let (exec, port) = executor(&env, StubPort::default());
        let err = exec.schedule_recovery_test(&record.id, "ops").await.unwrap_err();
        assert!(matches!(err, BackupError::Integrity(_)));
        assert!(port.calls().is_empty());

        let tests = recovery_test_rows(&env);
        assert_eq!(tests[0].status, RecoveryStatus::Failed);
        let results = tests[0].results.as_ref().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].step, "verify_checksum");
        assert!(!results[0].passed);
    }

    #[tokio::test]
    async fn unverified_backup_is_rejected_without_a_test_record() {
        let env = TestEnv::new();
        let orch = BackupOrchestrator::new(
            env.pool.clone(),
            env.config.clone(),
            Arc::new(StubPort::default()),
        );
        let completed = orch.create_full_backup().await.unwrap();

        let (exec, port) = executor(&env, StubPort::default());
        let err = exec.schedule_recovery_test(&completed.id, "ops").await.unwrap_err();
        assert!(matches!(err, BackupError::Precondition(_)));
        assert!(port.calls().is_empty());
        assert!(recovery_test_rows(&env).is_empty());
    }

    #[tokio::test]
    async fn missing_key_is_configuration_error_without_side_effects() {
        let mut env = TestEnv::new();
        let record = verified_backup(&env).await;
        env.config.encryption_key = None;

        let (exec, port) = executor(&env, StubPort::default());
        let err = exec.schedule_recovery_test(&record.id, "ops").await.unwrap_err();
        assert!(matches!(err, BackupError::Configuration(_)));
        assert!(port.calls().is_empty());
        assert!(recovery_test_rows(&env).is_empty());
    }

    #[tokio::test]
    async fn destructive_recovery_recreates_the_target_database() {
        let env = TestEnv::new();
        let record = verified_backup(&env).await;
        let (exec, port) = executor(&env, StubPort::default());

        let test = exec
            .perform_recovery(
                RecoveryOptions {
                    backup_id: record.id.clone(),
                    target_database: Some("app_standby".into()),
                    validate_only: false,
                    point_in_time: None,
                },
                "ops",
            )
            .await
            .unwrap();

        assert_eq!(test.status, RecoveryStatus::Passed);
        assert_eq!(test.test_type, RecoveryTestType::Full);
        assert_eq!(
            port.calls(),
            vec![
                "drop app_standby".to_string(),
                "create app_standby".to_string(),
                "restore app_standby".to_string(),
                "schema_check app_standby".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn temp_plaintext_is_removed_after_the_run() {
        let env = TestEnv::new();
        let record = verified_backup(&env).await;
        let (exec, _) = executor(&env, StubPort::default());
        exec.schedule_recovery_test(&record.id, "ops").await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(&env.config.data_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("restore_"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
