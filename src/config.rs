use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

pub const FETCH_BIN_ENV: &str = "BOOKMARK_SYNC_FETCH_BIN";
pub const PSQL_BIN_ENV: &str = "BOOKMARK_SYNC_PSQL_BIN";
pub const LOCK_PATH_ENV: &str = "BOOKMARK_SYNC_LOCK_PATH";
pub const COUNT_MARKER_ENV: &str = "BOOKMARK_SYNC_COUNT_MARKER";
pub const AGENT_ENV: &str = "BOOKMARK_SYNC_AGENT";
pub const PROJECT_ENV: &str = "BOOKMARK_SYNC_PROJECT";
pub const FETCH_TIMEOUT_ENV: &str = "BOOKMARK_SYNC_FETCH_TIMEOUT_MS";
pub const MERGE_TIMEOUT_ENV: &str = "BOOKMARK_SYNC_MERGE_TIMEOUT_MS";
pub const LEDGER_TIMEOUT_ENV: &str = "BOOKMARK_SYNC_LEDGER_TIMEOUT_MS";

const DEFAULT_FETCH_BIN: &str = "birdx";
const DEFAULT_PSQL_BIN: &str = "psql";
const DEFAULT_DB_USER: &str = "shad";
const DEFAULT_DB_NAME: &str = "openclaw_db";
const DEFAULT_LOCK_PATH: &str = "/tmp/bookmark-sync.lock";
const DEFAULT_AGENT: &str = "bookmark-sync";
const DEFAULT_PROJECT: &str = "knowledge-base";
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_MERGE_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_LEDGER_TIMEOUT_MS: u64 = 10_000;

/// Default number of items requested from the fetch tool.
pub const DEFAULT_FETCH_COUNT: u32 = 200;

/// Connection parameters handed to `psql`. The password, if any, travels
/// through the inherited `PGPASSWORD` environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseConfig {
    pub user: String,
    pub database: String,
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncConfig {
    pub fetch_bin: String,
    pub psql_bin: String,
    pub database: DatabaseConfig,
    pub lock_path: PathBuf,
    pub count_marker_path: PathBuf,
    pub agent: String,
    pub project: String,
    pub fetch_timeout: Duration,
    pub merge_timeout: Duration,
    pub ledger_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_source(|_| None)
    }
}

impl SyncConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_source(|key| std::env::var(key).ok())
    }

    pub fn from_source<F>(mut source: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        let home = text_from_source(&mut source, "HOME");
        Self {
            fetch_bin: text_from_source(&mut source, FETCH_BIN_ENV)
                .unwrap_or_else(|| DEFAULT_FETCH_BIN.to_owned()),
            psql_bin: text_from_source(&mut source, PSQL_BIN_ENV)
                .unwrap_or_else(|| DEFAULT_PSQL_BIN.to_owned()),
            database: DatabaseConfig {
                user: text_from_source(&mut source, "PGUSER")
                    .unwrap_or_else(|| DEFAULT_DB_USER.to_owned()),
                database: text_from_source(&mut source, "PGDATABASE")
                    .unwrap_or_else(|| DEFAULT_DB_NAME.to_owned()),
                host: text_from_source(&mut source, "PGHOST"),
                port: text_from_source(&mut source, "PGPORT").and_then(|raw| raw.parse().ok()),
            },
            lock_path: text_from_source(&mut source, LOCK_PATH_ENV)
                .map_or_else(|| PathBuf::from(DEFAULT_LOCK_PATH), PathBuf::from),
            count_marker_path: text_from_source(&mut source, COUNT_MARKER_ENV)
                .map_or_else(|| default_marker_path(home.as_deref()), PathBuf::from),
            agent: text_from_source(&mut source, AGENT_ENV)
                .unwrap_or_else(|| DEFAULT_AGENT.to_owned()),
            project: text_from_source(&mut source, PROJECT_ENV)
                .unwrap_or_else(|| DEFAULT_PROJECT.to_owned()),
            fetch_timeout: timeout_from_source(
                &mut source,
                FETCH_TIMEOUT_ENV,
                DEFAULT_FETCH_TIMEOUT_MS,
            ),
            merge_timeout: timeout_from_source(
                &mut source,
                MERGE_TIMEOUT_ENV,
                DEFAULT_MERGE_TIMEOUT_MS,
            ),
            ledger_timeout: timeout_from_source(
                &mut source,
                LEDGER_TIMEOUT_ENV,
                DEFAULT_LEDGER_TIMEOUT_MS,
            ),
        }
    }
}

fn default_marker_path(home: Option<&str>) -> PathBuf {
    let base = home.map_or_else(std::env::temp_dir, PathBuf::from);
    base.join(".config").join("bookmark-sync").join("total_count")
}

fn text_from_source<F>(source: &mut F, key: &str) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    source(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn timeout_from_source<F>(source: &mut F, key: &str, fallback_ms: u64) -> Duration
where
    F: FnMut(&str) -> Option<String>,
{
    let raw = source(key);
    Duration::from_millis(parse_timeout_ms(raw.as_deref(), fallback_ms))
}

fn parse_timeout_ms(raw: Option<&str>, fallback_ms: u64) -> u64 {
    raw.and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(fallback_ms)
}
