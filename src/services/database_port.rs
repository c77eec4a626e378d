//! Narrow capability interface over the database's native dump/restore
//! tooling. Production uses `pg_dump`/`psql` subprocesses; tests substitute
//! in-memory implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::config::DatabaseConfig;
use crate::error::{BackupError, Result};

#[async_trait]
pub trait DatabasePort: Send + Sync {
    /// Full logical dump of the primary database.
    async fn dump_full(&self) -> Result<Vec<u8>>;

    /// Dump of data changed since the given instant.
    async fn dump_incremental(&self, since: DateTime<Utc>) -> Result<Vec<u8>>;

    /// Replay a plaintext dump file into the named database.
    async fn restore(&self, dump_path: &Path, database: &str) -> Result<()>;

    async fn create_database(&self, name: &str) -> Result<()>;

    async fn drop_database(&self, name: &str) -> Result<()>;

    /// Minimal schema sanity query against the named database.
    async fn schema_check(&self, database: &str) -> Result<()>;
}

/// `DatabasePort` backed by the PostgreSQL client tools.
pub struct PgToolPort {
    config: DatabaseConfig,
}

impl PgToolPort {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    fn connection_args(&self, database: &str) -> Vec<String> {
        vec![
            "-h".into(),
            self.config.host.clone(),
            "-p".into(),
            self.config.port.to_string(),
            "-U".into(),
            self.config.user.clone(),
            "-d".into(),
            database.into(),
        ]
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<Vec<u8>> {
        let output = Command::new(program)
            .args(args)
            .env("PGPASSWORD", &self.config.password)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| BackupError::ExternalTool(format!("failed to spawn {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackupError::ExternalTool(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn psql(&self, database: &str, sql: &str) -> Result<Vec<u8>> {
        let mut args = self.connection_args(database);
        args.extend(["-v".into(), "ON_ERROR_STOP=1".into(), "-At".into(), "-c".into(), sql.into()]);
        self.run("psql", &args).await
    }

    /// Tables in the public schema that expose an `updated_at` column and can
    /// therefore participate in incremental dumps.
    async fn incremental_tables(&self) -> Result<Vec<String>> {
        let out = self
            .psql(
                &self.config.name,
                "SELECT table_name FROM information_schema.columns
                 WHERE table_schema = 'public' AND column_name = 'updated_at'
                 ORDER BY table_name",
            )
            .await?;
        Ok(String::from_utf8_lossy(&out)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}

#[async_trait]
impl DatabasePort for PgToolPort {
    async fn dump_full(&self) -> Result<Vec<u8>> {
        let mut args = self.connection_args(&self.config.name);
        args.extend(["--format=plain".into(), "--no-owner".into(), "--no-privileges".into()]);
        self.run("pg_dump", &args).await
    }

    async fn dump_incremental(&self, since: DateTime<Utc>) -> Result<Vec<u8>> {
        let since = since.to_rfc3339();
        let mut dump = format!("-- incremental dump, changes since {since}\n").into_bytes();

        for table in self.incremental_tables().await? {
            let sql = format!(
                "COPY (SELECT * FROM \"{table}\" WHERE updated_at >= '{since}') TO STDOUT"
            );
            let rows = self.psql(&self.config.name, &sql).await?;
            dump.extend_from_slice(format!("-- table: {table}\n").as_bytes());
            dump.extend_from_slice(&rows);
        }
        Ok(dump)
    }

    async fn restore(&self, dump_path: &Path, database: &str) -> Result<()> {
        let mut args = self.connection_args(database);
        args.extend([
            "-v".into(),
            "ON_ERROR_STOP=1".into(),
            "-f".into(),
            dump_path.to_string_lossy().into_owned(),
        ]);
        self.run("psql", &args).await?;
        Ok(())
    }

    async fn create_database(&self, name: &str) -> Result<()> {
        self.psql("postgres", &format!("CREATE DATABASE \"{name}\"")).await?;
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<()> {
        self.psql("postgres", &format!("DROP DATABASE IF EXISTS \"{name}\" WITH (FORCE)"))
            .await?;
        Ok(())
    }

    async fn schema_check(&self, database: &str) -> Result<()> {
        let out = self
            .psql(
                database,
                "SELECT count(*) FROM information_schema.tables WHERE table_schema = 'public'",
            )
            .await?;
        String::from_utf8_lossy(&out)
            .trim()
            .parse::<i64>()
            .map_err(|_| {
                BackupError::ExternalTool(format!(
                    "schema check against {database} returned unexpected output"
                ))
            })?;
        Ok(())
    }
}
