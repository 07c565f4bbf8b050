#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Mutex;
use std::time::Duration;

use bookmark_sync::error::{SyncError, SyncResult};
use bookmark_sync::fetch::FetchClient;
use bookmark_sync::model::Record;
use bookmark_sync::store::{StoreChannel, StoreOutput};
use bookmark_sync::SyncConfig;
use serde_json::{Value, json};
use tempfile::TempDir;

/// Separator the stub `psql` writes after each statement batch it receives.
pub const STATEMENT_SEPARATOR: &str = "-- end of batch --";

/// Writes an executable `/bin/sh` script.
pub fn write_stub(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("write stub");
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

/// A representative fetch payload.
pub fn bookmark_payload() -> Value {
    json!([
        {
            "id": "1790000000000000001",
            "authorId": "44196397",
            "author": {"username": "alice", "name": "Alice"},
            "text": "It's a \"quoted\" tweet; with 'quotes'",
            "likeCount": 3
        },
        {
            "id": "1790000000000000002",
            "authorId": "783214",
            "author": {"username": "bob"},
            "text": "second"
        },
        {
            "id": "",
            "text": "no id, skipped"
        }
    ])
}

/// How the stub `psql` answers each kind of statement.
#[derive(Debug, Clone)]
pub struct PsqlBehavior {
    pub active_entry: Option<i64>,
    pub created_entry: i64,
    pub total: u64,
    pub fail_merge: bool,
}

impl Default for PsqlBehavior {
    fn default() -> Self {
        Self {
            active_entry: None,
            created_entry: 17,
            total: 340,
            fail_merge: false,
        }
    }
}

/// A temp directory holding stub tools, the lock file and the marker.
pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let sandbox = Self {
            dir: tempfile::tempdir().expect("tempdir"),
        };
        fs::create_dir_all(sandbox.bin_dir()).expect("bin dir");
        sandbox.install_fetch_payload(&bookmark_payload());
        sandbox.install_psql(&PsqlBehavior::default());
        sandbox
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root().join("bin")
    }

    pub fn fetch_bin(&self) -> PathBuf {
        self.bin_dir().join("birdx")
    }

    pub fn psql_bin(&self) -> PathBuf {
        self.bin_dir().join("psql")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root().join("bookmark-sync.lock")
    }

    pub fn marker_path(&self) -> PathBuf {
        self.root().join("config/bookmark-sync/total_count")
    }

    pub fn fetch_args_log(&self) -> PathBuf {
        self.root().join("fetch-args.log")
    }

    pub fn psql_log(&self) -> PathBuf {
        self.root().join("psql.log")
    }

    /// The fetch stub records its argv and prints `payload`.
    pub fn install_fetch_payload(&self, payload: &Value) {
        let payload_path = self.root().join("payload.json");
        fs::write(&payload_path, payload.to_string()).expect("write payload");
        self.install_fetch_script(&format!("cat '{}'", payload_path.display()));
    }

    /// The fetch stub records its argv then runs `body`.
    pub fn install_fetch_script(&self, body: &str) {
        write_stub(
            &self.fetch_bin(),
            &format!(
                "echo \"$@\" >> '{log}'\n{body}",
                log = self.fetch_args_log().display()
            ),
        );
    }

    pub fn install_psql(&self, behavior: &PsqlBehavior) {
        let merge_reply = if behavior.fail_merge {
            "echo 'ERROR:  could not serialize access' >&2; exit 3".to_owned()
        } else {
            format!("echo {}", behavior.total)
        };
        let active_reply = behavior
            .active_entry
            .map(|id| format!("echo {id}"))
            .unwrap_or_else(|| "true".to_owned());
        let body = format!(
            "stmt=$(cat)\n\
             printf '%s\\n{STATEMENT_SEPARATOR}\\n' \"$stmt\" >> '{log}'\n\
             case \"$stmt\" in\n  \
             *'INSERT INTO kb.x_bookmarks'*) {merge_reply} ;;\n  \
             'SELECT id FROM ops.tasks'*) {active_reply} ;;\n  \
             'INSERT INTO ops.tasks'*) echo {created} ;;\n\
             esac",
            log = self.psql_log().display(),
            created = behavior.created_entry,
        );
        write_stub(&self.psql_bin(), &body);
    }

    /// Every statement batch the stub `psql` received, in order.
    pub fn statements(&self) -> Vec<String> {
        let Ok(raw) = fs::read_to_string(self.psql_log()) else {
            return Vec::new();
        };
        raw.split(STATEMENT_SEPARATOR)
            .map(str::trim)
            .filter(|batch| !batch.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn statements_matching(&self, needle: &str) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|statement| statement.contains(needle))
            .collect()
    }

    /// The binary wired to this sandbox's stubs and paths.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_bookmark-sync"));
        cmd.env("BOOKMARK_SYNC_FETCH_BIN", self.fetch_bin())
            .env("BOOKMARK_SYNC_PSQL_BIN", self.psql_bin())
            .env("BOOKMARK_SYNC_LOCK_PATH", self.lock_path())
            .env("BOOKMARK_SYNC_COUNT_MARKER", self.marker_path())
            .env("BOOKMARK_SYNC_FETCH_TIMEOUT_MS", "5000")
            .env("BOOKMARK_SYNC_MERGE_TIMEOUT_MS", "5000")
            .env("BOOKMARK_SYNC_LEDGER_TIMEOUT_MS", "5000")
            .env_remove("RUST_LOG_FORMAT");
        cmd
    }

    pub fn run(&self, args: &[&str]) -> Output {
        self.command().args(args).output().expect("run bookmark-sync")
    }

    /// A library-level config pointing at the same paths as the binary.
    pub fn config(&self) -> SyncConfig {
        SyncConfig {
            fetch_bin: self.fetch_bin().display().to_string(),
            psql_bin: self.psql_bin().display().to_string(),
            lock_path: self.lock_path(),
            count_marker_path: self.marker_path(),
            ..SyncConfig::default()
        }
    }
}

pub fn describe(output: &Output) -> String {
    format!(
        "status: {:?}\nstdout:\n{}\nstderr:\n{}",
        output.status.code(),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

/// Fetcher that returns canned records, optionally after a delay.
pub struct CannedFetcher {
    records: Vec<Value>,
    delay: Duration,
    panic_message: Option<&'static str>,
}

impl CannedFetcher {
    pub fn new(records: Vec<Value>) -> Self {
        Self {
            records,
            delay: Duration::ZERO,
            panic_message: None,
        }
    }

    pub fn slow(records: Vec<Value>, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(records)
        }
    }

    pub fn panicking(message: &'static str) -> Self {
        Self {
            panic_message: Some(message),
            ..Self::new(Vec::new())
        }
    }
}

impl FetchClient for CannedFetcher {
    fn fetch(&self, _limit: u32) -> SyncResult<Vec<Record>> {
        if let Some(message) = self.panic_message {
            panic!("{message}");
        }
        std::thread::sleep(self.delay);
        Ok(self.records.iter().cloned().map(Record::new).collect())
    }
}

/// Thread-safe store that records statements and answers by prefix.
#[derive(Default)]
pub struct RecordingStore {
    pub behavior: PsqlBehavior,
    statements: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn new(behavior: PsqlBehavior) -> Self {
        Self {
            behavior,
            statements: Mutex::default(),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().expect("statements lock").clone()
    }

    pub fn statements_matching(&self, needle: &str) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|statement| statement.contains(needle))
            .collect()
    }
}

impl StoreChannel for RecordingStore {
    fn execute(&self, statement: &str, _timeout: Duration) -> SyncResult<StoreOutput> {
        self.statements
            .lock()
            .expect("statements lock")
            .push(statement.to_owned());
        if statement.contains("INSERT INTO kb.x_bookmarks") {
            if self.behavior.fail_merge {
                return Err(SyncError::Storage("could not serialize access".to_owned()));
            }
            return Ok(StoreOutput::new(self.behavior.total.to_string()));
        }
        if statement.starts_with("SELECT id FROM ops.tasks") {
            let reply = self
                .behavior
                .active_entry
                .map(|id| id.to_string())
                .unwrap_or_default();
            return Ok(StoreOutput::new(reply));
        }
        if statement.starts_with("INSERT INTO ops.tasks") {
            return Ok(StoreOutput::new(self.behavior.created_entry.to_string()));
        }
        Ok(StoreOutput::default())
    }
}
