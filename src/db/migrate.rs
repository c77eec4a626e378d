use crate::db::connection::DbPool;
use rusqlite::Connection;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS backup_records (
  id TEXT PRIMARY KEY,
  kind TEXT NOT NULL CHECK(kind IN ('full','incremental','differential')),
  status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending','in_progress','completed','failed','verified')),
  file_path TEXT,
  file_size INTEGER,
  checksum TEXT,
  encrypted INTEGER NOT NULL DEFAULT 0,
  compressed INTEGER NOT NULL DEFAULT 0,
  metadata TEXT NOT NULL DEFAULT '{}',
  error_message TEXT,
  started_at TEXT NOT NULL,
  completed_at TEXT,
  duration_secs INTEGER,
  compliance INTEGER NOT NULL DEFAULT 0,
  verified_at TEXT,
  verified_by TEXT
);

CREATE TABLE IF NOT EXISTS recovery_tests (
  id TEXT PRIMARY KEY,
  backup_id TEXT NOT NULL,
  status TEXT NOT NULL DEFAULT 'in_progress' CHECK(status IN ('scheduled','in_progress','passed','failed')),
  test_type TEXT NOT NULL CHECK(test_type IN ('validation','full')),
  results TEXT,
  error_message TEXT,
  started_at TEXT NOT NULL,
  completed_at TEXT,
  duration_secs INTEGER,
  performed_by TEXT NOT NULL,
  notes TEXT
);

CREATE INDEX IF NOT EXISTS idx_backup_records_status ON backup_records(status);
CREATE INDEX IF NOT EXISTS idx_backup_records_started_at ON backup_records(started_at DESC);
CREATE INDEX IF NOT EXISTS idx_recovery_tests_started_at ON recovery_tests(started_at DESC);
"#;

pub fn migrate(pool: &DbPool) -> anyhow::Result<()> {
    tracing::info!("[DB] Applying schema");
    let conn = pool.get()?;
    apply_schema(&conn)
}

pub fn apply_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
