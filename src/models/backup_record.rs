use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{parse_ts, parse_ts_opt};

/// Marker written into every record's metadata; verification requires it.
pub const METADATA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Full,
    Incremental,
    Differential,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
            BackupKind::Differential => "differential",
        }
    }

    fn parse(s: &str) -> rusqlite::Result<Self> {
        match s {
            "full" => Ok(BackupKind::Full),
            "incremental" => Ok(BackupKind::Incremental),
            "differential" => Ok(BackupKind::Differential),
            other => Err(rusqlite::Error::InvalidParameterName(format!(
                "unknown backup kind: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Verified,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::InProgress => "in_progress",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
            BackupStatus::Verified => "verified",
        }
    }

    fn parse(s: &str) -> rusqlite::Result<Self> {
        match s {
            "pending" => Ok(BackupStatus::Pending),
            "in_progress" => Ok(BackupStatus::InProgress),
            "completed" => Ok(BackupStatus::Completed),
            "failed" => Ok(BackupStatus::Failed),
            "verified" => Ok(BackupStatus::Verified),
            other => Err(rusqlite::Error::InvalidParameterName(format!(
                "unknown backup status: {other}"
            ))),
        }
    }
}

/// One backup attempt and its artifact. Path, size and checksum stay unset
/// until the record reaches `completed`; a failed record never carries them.
#[derive(Debug, Clone, Serialize)]
pub struct BackupRecord {
    pub id: String,
    pub kind: BackupKind,
    pub status: BackupStatus,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub checksum: Option<String>,
    pub encrypted: bool,
    pub compressed: bool,
    pub metadata: serde_json::Value,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub compliance: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub verified_by: Option<String>,
}

fn row_to_record(row: &Row) -> rusqlite::Result<BackupRecord> {
    let kind: String = row.get("kind")?;
    let status: String = row.get("status")?;
    let metadata: String = row.get("metadata")?;
    let started_at: String = row.get("started_at")?;

    Ok(BackupRecord {
        id: row.get("id")?,
        kind: BackupKind::parse(&kind)?,
        status: BackupStatus::parse(&status)?,
        file_path: row.get("file_path")?,
        file_size: row.get("file_size")?,
        checksum: row.get("checksum")?,
        encrypted: row.get::<_, i64>("encrypted")? != 0,
        compressed: row.get::<_, i64>("compressed")? != 0,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        error_message: row.get("error_message")?,
        started_at: parse_ts(&started_at)?,
        completed_at: parse_ts_opt(row.get("completed_at")?)?,
        duration_secs: row.get("duration_secs")?,
        compliance: row.get::<_, i64>("compliance")? != 0,
        verified_at: parse_ts_opt(row.get("verified_at")?)?,
        verified_by: row.get("verified_by")?,
    })
}

pub fn create(
    conn: &Connection,
    kind: BackupKind,
    metadata: &serde_json::Value,
) -> anyhow::Result<BackupRecord> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO backup_records (id, kind, status, metadata, started_at)
         VALUES (?1, ?2, 'pending', ?3, ?4)",
        params![id, kind.as_str(), serde_json::to_string(metadata)?, now],
    )?;
    find_by_id(conn, &id)?.ok_or_else(|| anyhow::anyhow!("Failed to retrieve created record"))
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<BackupRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM backup_records WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_record)?;
    rows.next().transpose().map_err(Into::into)
}

pub fn find_recent(conn: &Connection, limit: i64) -> anyhow::Result<Vec<BackupRecord>> {
    let mut stmt =
        conn.prepare("SELECT * FROM backup_records ORDER BY started_at DESC LIMIT ?")?;
    let rows = stmt.query_map(params![limit], row_to_record)?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}

pub fn find_latest(conn: &Connection) -> anyhow::Result<Option<BackupRecord>> {
    let mut stmt =
        conn.prepare("SELECT * FROM backup_records ORDER BY started_at DESC LIMIT 1")?;
    let mut rows = stmt.query_map([], row_to_record)?;
    rows.next().transpose().map_err(Into::into)
}

/// Most recent verified full backup, the anchor for incremental runs.
pub fn find_latest_verified_full(conn: &Connection) -> anyhow::Result<Option<BackupRecord>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM backup_records WHERE kind = 'full' AND status = 'verified'
         ORDER BY completed_at DESC LIMIT 1",
    )?;
    let mut rows = stmt.query_map([], row_to_record)?;
    rows.next().transpose().map_err(Into::into)
}

pub fn find_recent_completed(conn: &Connection, limit: i64) -> anyhow::Result<Vec<BackupRecord>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM backup_records WHERE status = 'completed'
         ORDER BY completed_at DESC LIMIT ?",
    )?;
    let rows = stmt.query_map(params![limit], row_to_record)?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}

/// Completed (never verified) records whose completion predates the cutoff.
pub fn find_expired_completed(
    conn: &Connection,
    cutoff: DateTime<Utc>,
) -> anyhow::Result<Vec<BackupRecord>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM backup_records WHERE status = 'completed' AND completed_at < ?",
    )?;
    let rows = stmt.query_map(params![cutoff.to_rfc3339()], row_to_record)?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}

pub fn find_started_since(
    conn: &Connection,
    since: DateTime<Utc>,
) -> anyhow::Result<Vec<BackupRecord>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM backup_records WHERE started_at >= ? ORDER BY started_at DESC",
    )?;
    let rows = stmt.query_map(params![since.to_rfc3339()], row_to_record)?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}

pub fn update_status(conn: &Connection, id: &str, status: BackupStatus) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE backup_records SET status = ? WHERE id = ?",
        params![status.as_str(), id],
    )?;
    Ok(())
}

pub fn mark_completed(
    conn: &Connection,
    id: &str,
    file_path: &str,
    file_size: i64,
    checksum: &str,
    duration_secs: i64,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE backup_records
         SET status = 'completed', file_path = ?, file_size = ?, checksum = ?,
             encrypted = 1, compressed = 1, completed_at = ?, duration_secs = ?
         WHERE id = ?",
        params![
            file_path,
            file_size,
            checksum,
            Utc::now().to_rfc3339(),
            duration_secs,
            id
        ],
    )?;
    Ok(())
}

pub fn mark_failed(conn: &Connection, id: &str, error: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE backup_records
         SET status = 'failed', error_message = ?, completed_at = ?
         WHERE id = ?",
        params![error, Utc::now().to_rfc3339(), id],
    )?;
    Ok(())
}

pub fn mark_verified(conn: &Connection, id: &str, verified_by: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE backup_records
         SET status = 'verified', verified_at = ?, verified_by = ?, compliance = 1
         WHERE id = ?",
        params![Utc::now().to_rfc3339(), verified_by, id],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let changes = conn.execute("DELETE FROM backup_records WHERE id = ?", params![id])?;
    Ok(changes > 0)
}
