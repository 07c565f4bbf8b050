use std::path::PathBuf;

use clap::Parser;
use clap::error::ErrorKind;
use serde_json::{Value, json};

use crate::config::DEFAULT_FETCH_COUNT;
use crate::error::{EXIT_FAILURE, EXIT_OK, SyncError, SyncResult};
use crate::model::{SyncOutcome, SyncStatus};
use crate::orchestrator::SyncOptions;
use crate::run_lock::release_if_owned;

/// Exit code after SIGINT or SIGTERM. Convention: 128 + SIGINT(2).
pub const SIGNAL_EXIT_CODE: i32 = 130;

/// Releases the run lock when the process is told to stop.
///
/// The handler runs on its own thread, removes the lock file if it still
/// names this process, and exits with [`SIGNAL_EXIT_CODE`]. Any ledger entry
/// opened by the interrupted run stays `running` and is picked up by the next
/// run inside the active window.
pub struct ShutdownController;

impl ShutdownController {
    /// Installs the handler for SIGINT, SIGTERM and SIGHUP.
    ///
    /// Errors are non-fatal; callers may log and continue.
    pub fn install(lock_path: PathBuf) -> SyncResult<()> {
        let pid = std::process::id();
        ctrlc::set_handler(move || {
            let released = release_if_owned(&lock_path, pid);
            tracing::warn!(released, "termination signal received; exiting");
            std::process::exit(SIGNAL_EXIT_CODE);
        })
        .map_err(|e| SyncError::Io(std::io::Error::other(format!("signal handler: {e}"))))
    }
}

#[derive(Debug, Parser)]
#[command(name = "bookmark-sync", version)]
#[command(about = "Merge the most recent bookmarks into the knowledge-base archive")]
pub struct Cli {
    /// Number of bookmarks to request (default 200).
    #[arg(value_name = "COUNT", value_parser = parse_count, allow_negative_numbers = true)]
    pub count: Option<u32>,

    /// Print the run outcome as JSON on stdout.
    #[arg(long)]
    pub json: bool,

    /// Create the archive and ledger tables if they do not exist.
    #[arg(long)]
    pub ensure_schema: bool,
}

impl Cli {
    #[must_use]
    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            count: self.count.unwrap_or(DEFAULT_FETCH_COUNT),
            ensure_schema: self.ensure_schema,
        }
    }
}

fn parse_count(raw: &str) -> Result<u32, String> {
    match raw.trim().parse::<u32>() {
        Ok(0) => Err("count must be at least 1".to_owned()),
        Ok(count) => Ok(count),
        Err(_) => Err(format!("`{raw}` is not a positive integer")),
    }
}

/// Help and version requests succeed; every other argument problem is a
/// plain failure rather than clap's default usage code.
#[must_use]
pub fn usage_exit_code(error: &clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_OK,
        _ => EXIT_FAILURE,
    }
}

/// One line for humans reading the timer's journal.
#[must_use]
pub fn human_summary(outcome: &SyncOutcome) -> String {
    match outcome.status {
        SyncStatus::NothingToSync => "no bookmarks to sync".to_owned(),
        SyncStatus::Synced => {
            let mut line = format!(
                "synced {} of {} fetched bookmarks",
                outcome.merged, outcome.fetched
            );
            if outcome.skipped > 0 {
                line.push_str(&format!(" ({} skipped without id)", outcome.skipped));
            }
            if let Some(total) = outcome.total_in_store {
                line.push_str(&format!("; {total} total in archive"));
            }
            line
        }
    }
}

/// JSON shape printed for a failed run under `--json`.
#[must_use]
pub fn error_envelope(error: &SyncError) -> Value {
    let mut envelope = json!({
        "status": if error.exit_code() == EXIT_FAILURE { "failed" } else { "already_running" },
        "code": error.error_code(),
        "message": error.to_string(),
        "exit_code": error.exit_code(),
    });
    if let SyncError::AlreadyRunning { pid, ledger_entry } = error {
        envelope["holder_pid"] = json!(pid);
        envelope["ledger_entry"] = json!(ledger_entry);
    }
    envelope
}
