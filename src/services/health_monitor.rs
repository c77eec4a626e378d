//! Backup health aggregation and threshold-based classification.
//!
//! Reads backup and recovery-test history, never mutates it. Classification
//! is an ordered rule set: once a rule sets `critical` the status never
//! downgrades within the evaluation, but every triggered rule still appends
//! its own alert.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::db::connection::DbPool;
use crate::error::Result;
use crate::models::backup_record::{self, BackupKind, BackupStatus};
use crate::models::recovery_test;

const METRICS_WINDOW_DAYS: i64 = 7;
const ALERT_BUFFER_CAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceStatus {
    Compliant,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// Alert retained in the in-memory ring buffer. Process-local and
/// non-durable; restarts start empty.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HealthMetrics {
    pub total_backups: usize,
    pub verified_backups: usize,
    pub success_rate: f64,
    pub average_duration_secs: f64,
    pub total_size_bytes: i64,
    pub recent_failures: usize,
    pub last_backup_at: Option<DateTime<Utc>>,
    pub oldest_verified_at: Option<DateTime<Utc>>,
    pub last_recovery_test_at: Option<DateTime<Utc>>,
    pub compliance_status: ComplianceStatus,
    pub alerts: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BackupStatistics {
    pub window_days: i64,
    pub total_backups: usize,
    pub completed: usize,
    pub verified: usize,
    pub failed: usize,
    pub full_count: usize,
    pub incremental_count: usize,
    pub total_size_bytes: i64,
    pub average_duration_secs: f64,
    pub success_rate: f64,
}

pub struct BackupHealthMonitor {
    db: DbPool,
    alerts: Arc<Mutex<VecDeque<Alert>>>,
}

fn escalate(status: &mut ComplianceStatus, to: ComplianceStatus) {
    // Critical is sticky; warning only upgrades compliant.
    if to == ComplianceStatus::Critical || *status == ComplianceStatus::Compliant {
        if *status != ComplianceStatus::Critical {
            *status = to;
        }
    }
}

impl BackupHealthMonitor {
    pub fn new(db: DbPool) -> Self {
        Self { db, alerts: Arc::new(Mutex::new(VecDeque::new())) }
    }

    pub async fn health_metrics(&self) -> Result<HealthMetrics> {
        Ok(self.evaluate().await?.0)
    }

    async fn evaluate(&self) -> Result<(HealthMetrics, Vec<(AlertSeverity, String)>)> {
        let now = Utc::now();
        let window_start = now - Duration::days(METRICS_WINDOW_DAYS);

        let db = self.db.clone();
        let (window, latest, last_test) = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            let window = backup_record::find_started_since(&conn, window_start)?;
            let latest = backup_record::find_latest(&conn)?;
            let last_test = recovery_test::find_latest_terminal(&conn)?;
            Ok::<_, anyhow::Error>((window, latest, last_test))
        })
        .await
        .map_err(anyhow::Error::from)??;

        let verified: Vec<_> =
            window.iter().filter(|r| r.status == BackupStatus::Verified).collect();
        let success_rate = if window.is_empty() {
            0.0
        } else {
            verified.len() as f64 / window.len() as f64 * 100.0
        };
        let average_duration_secs = if verified.is_empty() {
            0.0
        } else {
            verified.iter().filter_map(|r| r.duration_secs).sum::<i64>() as f64
                / verified.len() as f64
        };
        let total_size_bytes = verified.iter().filter_map(|r| r.file_size).sum();
        let recent_failures = window
            .iter()
            .filter(|r| {
                r.status == BackupStatus::Failed && r.started_at > now - Duration::hours(24)
            })
            .count();

        let mut status = ComplianceStatus::Compliant;
        let mut alerts: Vec<(AlertSeverity, String)> = Vec::new();

        match &latest {
            None => {
                escalate(&mut status, ComplianceStatus::Critical);
                alerts.push((AlertSeverity::Critical, "No backups found".into()));
            }
            Some(last) => {
                let hours_since = (now - last.started_at).num_minutes() as f64 / 60.0;
                if hours_since > 24.0 {
                    escalate(&mut status, ComplianceStatus::Critical);
                    alerts.push((
                        AlertSeverity::Critical,
                        format!("Last backup is {hours_since:.1} hours old"),
                    ));
                } else if hours_since > 12.0 {
                    escalate(&mut status, ComplianceStatus::Warning);
                    alerts.push((
                        AlertSeverity::Warning,
                        format!("Last backup is {hours_since:.1} hours old"),
                    ));
                }

                if success_rate < 80.0 {
                    escalate(&mut status, ComplianceStatus::Critical);
                    alerts.push((
                        AlertSeverity::Critical,
                        format!("Backup success rate is {success_rate:.2}% over the last {METRICS_WINDOW_DAYS} days"),
                    ));
                } else if success_rate < 95.0 {
                    escalate(&mut status, ComplianceStatus::Warning);
                    alerts.push((
                        AlertSeverity::Warning,
                        format!("Backup success rate is {success_rate:.2}% over the last {METRICS_WINDOW_DAYS} days"),
                    ));
                }

                if recent_failures > 3 {
                    escalate(&mut status, ComplianceStatus::Critical);
                    alerts.push((
                        AlertSeverity::Critical,
                        format!("{recent_failures} backups failed in the last 24 hours"),
                    ));
                } else if recent_failures > 0 {
                    escalate(&mut status, ComplianceStatus::Warning);
                    alerts.push((
                        AlertSeverity::Warning,
                        format!("{recent_failures} backup(s) failed in the last 24 hours"),
                    ));
                }
            }
        }

        match &last_test {
            None => {
                escalate(&mut status, ComplianceStatus::Warning);
                alerts.push((
                    AlertSeverity::Warning,
                    "No recovery test has ever been performed".into(),
                ));
            }
            Some(test) => {
                let days_since = (now - test.started_at).num_days();
                if days_since > 30 {
                    escalate(&mut status, ComplianceStatus::Warning);
                    alerts.push((
                        AlertSeverity::Warning,
                        format!("Last recovery test was {days_since} days ago"),
                    ));
                }
            }
        }

        let metrics = HealthMetrics {
            total_backups: window.len(),
            verified_backups: verified.len(),
            success_rate,
            average_duration_secs,
            total_size_bytes,
            recent_failures,
            last_backup_at: latest.map(|r| r.started_at),
            oldest_verified_at: verified.iter().filter_map(|r| r.verified_at).min(),
            last_recovery_test_at: last_test.map(|t| t.started_at),
            compliance_status: status,
            alerts: alerts.iter().map(|(_, m)| m.clone()).collect(),
        };
        Ok((metrics, alerts))
    }

    /// Scheduled evaluation: critical alerts land in the bounded ring buffer
    /// for later retrieval.
    pub async fn run_scheduled_check(&self) -> Result<HealthMetrics> {
        let (metrics, alerts) = self.evaluate().await?;

        if metrics.compliance_status == ComplianceStatus::Critical {
            tracing::error!(
                success_rate = metrics.success_rate,
                recent_failures = metrics.recent_failures,
                "Backup health is critical"
            );
        }

        let now = Utc::now();
        let mut buffer = self.alerts.lock().await;
        for (severity, message) in alerts {
            if severity == AlertSeverity::Critical {
                buffer.push_back(Alert { severity, message, raised_at: now });
            }
        }
        while buffer.len() > ALERT_BUFFER_CAP {
            buffer.pop_front();
        }
        Ok(metrics)
    }

    /// Most recent buffered alerts, newest first.
    pub async fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        let buffer = self.alerts.lock().await;
        buffer.iter().rev().take(limit).cloned().collect()
    }

    pub async fn backup_statistics(&self, window_days: i64) -> Result<BackupStatistics> {
        let since = Utc::now() - Duration::days(window_days);
        let db = self.db.clone();
        let window = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            backup_record::find_started_since(&conn, since)
        })
        .await
        .map_err(anyhow::Error::from)??;

        let verified = window.iter().filter(|r| r.status == BackupStatus::Verified).count();
        let durations: Vec<i64> = window.iter().filter_map(|r| r.duration_secs).collect();

        Ok(BackupStatistics {
            window_days,
            total_backups: window.len(),
            completed: window.iter().filter(|r| r.status == BackupStatus::Completed).count(),
            verified,
            failed: window.iter().filter(|r| r.status == BackupStatus::Failed).count(),
            full_count: window.iter().filter(|r| r.kind == BackupKind::Full).count(),
            incremental_count: window
                .iter()
                .filter(|r| r.kind == BackupKind::Incremental)
                .count(),
            total_size_bytes: window.iter().filter_map(|r| r.file_size).sum(),
            average_duration_secs: if durations.is_empty() {
                0.0
            } else {
                durations.iter().sum::<i64>() as f64 / durations.len() as f64
            },
            success_rate: if window.is_empty() {
                0.0
            } else {
                verified as f64 / window.len() as f64 * 100.0
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::backup_record::METADATA_VERSION;
    use crate::models::recovery_test::RecoveryTestType;
    use crate::services::testing::TestEnv;
    use rusqlite::params;

    fn monitor(env: &TestEnv) -> BackupHealthMonitor {
        BackupHealthMonitor::new(env.pool.clone())
    }

    /// Insert a record and backdate it by the given offsets.
    fn seed_backup(
        env: &TestEnv,
        status: BackupStatus,
        started_days_ago: i64,
        duration_secs: i64,
        size: i64,
    ) -> String {
        let conn = env.pool.get().unwrap();
        let record = backup_record::create(
            &conn,
            BackupKind::Full,
            &serde_json::json!({"version": METADATA_VERSION}),
        )
        .unwrap();
        let started = (Utc::now() - Duration::days(started_days_ago)).to_rfc3339();
        conn.execute(
            "UPDATE backup_records
             SET status = ?, started_at = ?, completed_at = ?, duration_secs = ?, file_size = ?,
                 verified_at = CASE WHEN ? = 'verified' THEN ? ELSE NULL END
             WHERE id = ?",
            params![
                status.as_str(),
                started,
                started,
                duration_secs,
                size,
                status.as_str(),
                started,
                record.id
            ],
        )
        .unwrap();
        record.id
    }

    fn seed_recovery_test(env: &TestEnv, days_ago: i64) {
        let conn = env.pool.get().unwrap();
        let test = recovery_test::create(&conn, "b", RecoveryTestType::Validation, "ops").unwrap();
        recovery_test::mark_passed(&conn, &test.id, &[], 5, None).unwrap();
        let started = (Utc::now() - Duration::days(days_ago)).to_rfc3339();
        conn.execute(
            "UPDATE recovery_tests SET started_at = ? WHERE id = ?",
            params![started, test.id],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn empty_history_is_critical_with_no_backups_alert() {
        let env = TestEnv::new();
        let metrics = monitor(&env).health_metrics().await.unwrap();

        assert_eq!(metrics.compliance_status, ComplianceStatus::Critical);
        assert!(metrics.alerts.iter().any(|a| a.contains("No backups found")));
        assert_eq!(metrics.total_backups, 0);
        assert_eq!(metrics.success_rate, 0.0);
        assert!(metrics.last_backup_at.is_none());
    }

    #[tokio::test]
    async fn one_verified_two_failed_gives_a_third_success_rate() {
        let env = TestEnv::new();
        seed_backup(&env, BackupStatus::Verified, 1, 30, 1000);
        seed_backup(&env, BackupStatus::Failed, 2, 0, 0);
        seed_backup(&env, BackupStatus::Failed, 3, 0, 0);
        seed_recovery_test(&env, 1);

        let metrics = monitor(&env).health_metrics().await.unwrap();
        assert_eq!(metrics.total_backups, 3);
        assert_eq!(metrics.verified_backups, 1);
        assert!((metrics.success_rate - 33.33).abs() < 0.01);
        // Both failures are older than 24 hours
        assert_eq!(metrics.recent_failures, 0);
        assert_eq!(metrics.compliance_status, ComplianceStatus::Critical);
        assert_eq!(metrics.total_size_bytes, 1000);
        assert_eq!(metrics.average_duration_secs, 30.0);
    }

    #[tokio::test]
    async fn failure_within_24_hours_counts_as_recent() {
        let env = TestEnv::new();
        seed_backup(&env, BackupStatus::Verified, 0, 30, 1000);
        seed_backup(&env, BackupStatus::Failed, 0, 0, 0);
        seed_recovery_test(&env, 1);

        let metrics = monitor(&env).health_metrics().await.unwrap();
        assert_eq!(metrics.recent_failures, 1);
        assert!(metrics
            .alerts
            .iter()
            .any(|a| a.contains("failed in the last 24 hours")));
    }

    #[tokio::test]
    async fn stale_last_backup_is_critical_and_never_downgraded() {
        let env = TestEnv::new();
        seed_backup(&env, BackupStatus::Verified, 3, 30, 1000);
        seed_recovery_test(&env, 1);

        let metrics = monitor(&env).health_metrics().await.unwrap();
        // 3 days since the last backup trips the 24-hour critical rule even
        // though the success rate is 100%.
        assert_eq!(metrics.compliance_status, ComplianceStatus::Critical);
        assert!(metrics.alerts.iter().any(|a| a.contains("hours old")));
    }

    #[tokio::test]
    async fn missing_recovery_test_is_a_warning() {
        let env = TestEnv::new();
        seed_backup(&env, BackupStatus::Verified, 0, 30, 1000);

        let metrics = monitor(&env).health_metrics().await.unwrap();
        assert_eq!(metrics.compliance_status, ComplianceStatus::Warning);
        assert!(metrics
            .alerts
            .iter()
            .any(|a| a.contains("No recovery test")));
    }

    #[tokio::test]
    async fn old_recovery_test_is_a_warning() {
        let env = TestEnv::new();
        seed_backup(&env, BackupStatus::Verified, 0, 30, 1000);
        seed_recovery_test(&env, 45);

        let metrics = monitor(&env).health_metrics().await.unwrap();
        assert_eq!(metrics.compliance_status, ComplianceStatus::Warning);
        assert!(metrics.alerts.iter().any(|a| a.contains("45 days ago")));
    }

    #[tokio::test]
    async fn healthy_history_is_compliant_with_no_alerts() {
        let env = TestEnv::new();
        seed_backup(&env, BackupStatus::Verified, 0, 30, 1000);
        seed_recovery_test(&env, 1);

        let metrics = monitor(&env).health_metrics().await.unwrap();
        assert_eq!(metrics.compliance_status, ComplianceStatus::Compliant);
        assert!(metrics.alerts.is_empty());
    }

    #[tokio::test]
    async fn scheduled_check_buffers_only_critical_alerts() {
        let env = TestEnv::new();
        seed_backup(&env, BackupStatus::Verified, 3, 30, 1000);
        // No recovery test: adds a warning that must not be buffered.

        let mon = monitor(&env);
        mon.run_scheduled_check().await.unwrap();

        let alerts = mon.recent_alerts(10).await;
        assert!(!alerts.is_empty());
        assert!(alerts.iter().all(|a| a.severity == AlertSeverity::Critical));
    }

    #[tokio::test]
    async fn alert_buffer_is_bounded() {
        let env = TestEnv::new();
        // Empty history keeps producing a critical alert per check.
        let mon = monitor(&env);
        for _ in 0..120 {
            mon.run_scheduled_check().await.unwrap();
        }
        assert_eq!(mon.recent_alerts(1000).await.len(), ALERT_BUFFER_CAP);
    }

    #[tokio::test]
    async fn statistics_summarize_the_requested_window() {
        let env = TestEnv::new();
        seed_backup(&env, BackupStatus::Verified, 1, 20, 500);
        seed_backup(&env, BackupStatus::Failed, 2, 0, 0);
        seed_backup(&env, BackupStatus::Verified, 40, 20, 500); // outside window

        let stats = monitor(&env).backup_statistics(30).await.unwrap();
        assert_eq!(stats.total_backups, 2);
        assert_eq!(stats.verified, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total_size_bytes, 500);
        assert_eq!(stats.success_rate, 50.0);
    }
}
