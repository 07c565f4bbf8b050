use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::{SyncError, SyncResult};
use crate::ledger::LEDGER_TABLE;
use crate::merge::BOOKMARKS_TABLE;
use crate::process::run_command_with_input;

/// Text rows returned by one store round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOutput {
    raw: String,
}

impl StoreOutput {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Non-empty lines, trimmed.
    pub fn rows(&self) -> impl Iterator<Item = &str> {
        self.raw.lines().map(str::trim).filter(|line| !line.is_empty())
    }

    /// The last non-empty row, which is where a trailing `SELECT` lands.
    #[must_use]
    pub fn last_scalar(&self) -> Option<&str> {
        self.rows().last()
    }

    #[must_use]
    pub fn last_integer<T: std::str::FromStr>(&self) -> Option<T> {
        self.last_scalar().and_then(|value| value.parse().ok())
    }
}

/// The channel statements travel through. Implementations must treat a
/// statement batch as one unit: either its output or an error comes back.
pub trait StoreChannel {
    fn execute(&self, statement: &str, timeout: Duration) -> SyncResult<StoreOutput>;
}

impl<T: StoreChannel + ?Sized> StoreChannel for &T {
    fn execute(&self, statement: &str, timeout: Duration) -> SyncResult<StoreOutput> {
        (**self).execute(statement, timeout)
    }
}

/// Sends statements to PostgreSQL through the `psql` client on stdin.
///
/// Output is unaligned, tuples-only and quiet, so each result row is one
/// line and command tags are suppressed. `ON_ERROR_STOP` makes the first
/// failing statement abort the batch with a non-zero exit.
#[derive(Debug, Clone)]
pub struct PsqlChannel {
    program: String,
    database: DatabaseConfig,
}

impl PsqlChannel {
    #[must_use]
    pub fn new(program: impl Into<String>, database: DatabaseConfig) -> Self {
        Self {
            program: program.into(),
            database,
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-X".to_owned(),
            "-q".to_owned(),
            "-t".to_owned(),
            "-A".to_owned(),
            "-v".to_owned(),
            "ON_ERROR_STOP=1".to_owned(),
            "-U".to_owned(),
            self.database.user.clone(),
            "-d".to_owned(),
            self.database.database.clone(),
        ];
        if let Some(host) = &self.database.host {
            args.push("-h".to_owned());
            args.push(host.clone());
        }
        if let Some(port) = self.database.port {
            args.push("-p".to_owned());
            args.push(port.to_string());
        }
        args
    }
}

impl StoreChannel for PsqlChannel {
    fn execute(&self, statement: &str, timeout: Duration) -> SyncResult<StoreOutput> {
        let output = run_command_with_input(
            &self.program,
            &self.args(),
            Some(statement.as_bytes()),
            Some(timeout),
        )
        .map_err(SyncError::into_storage_failure)?;
        Ok(StoreOutput::new(
            String::from_utf8_lossy(&output.stdout).into_owned(),
        ))
    }
}

/// Idempotent DDL for both tables the sync touches.
#[must_use]
pub fn schema_statement() -> String {
    format!(
        "CREATE SCHEMA IF NOT EXISTS kb;\n\
         CREATE SCHEMA IF NOT EXISTS ops;\n\
         CREATE TABLE IF NOT EXISTS {BOOKMARKS_TABLE} (\n    \
         tweet_id TEXT PRIMARY KEY,\n    \
         author_id TEXT,\n    \
         author_name TEXT,\n    \
         tweet_text TEXT,\n    \
         full_json JSONB,\n    \
         url TEXT,\n    \
         archived_at TIMESTAMPTZ NOT NULL DEFAULT now()\n\
         );\n\
         CREATE TABLE IF NOT EXISTS {LEDGER_TABLE} (\n    \
         id BIGSERIAL PRIMARY KEY,\n    \
         title TEXT NOT NULL,\n    \
         description TEXT,\n    \
         status TEXT NOT NULL,\n    \
         agent TEXT,\n    \
         project TEXT,\n    \
         created_at TIMESTAMPTZ NOT NULL DEFAULT now(),\n    \
         completed_at TIMESTAMPTZ\n\
         );\n\
         CREATE INDEX IF NOT EXISTS tasks_agent_status_idx\n    \
         ON {LEDGER_TABLE} (agent, status, created_at DESC);\n"
    )
}
