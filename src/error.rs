use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Exit code for a successful run, including "nothing to sync".
pub const EXIT_OK: i32 = 0;
/// Exit code for any hard failure.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code when another live run owns the sync.
pub const EXIT_ALREADY_RUNNING: i32 = 2;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing command `{command}` on PATH")]
    CommandMissing { command: String },

    #[error("command failed: `{command}` (status: {status}){stderr_suffix}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr_suffix: String,
    },

    #[error("command timed out after {timeout_ms}ms: `{command}`{stderr_suffix}")]
    CommandTimedOut {
        command: String,
        timeout_ms: u64,
        stderr_suffix: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("merge planning failed: {0}")]
    Planning(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("sync already running (lock held by pid {pid}){}", ledger_suffix(.ledger_entry))]
    AlreadyRunning { pid: u32, ledger_entry: Option<i64> },
}

fn ledger_suffix(entry: &Option<i64>) -> String {
    entry
        .map(|id| format!("; active ledger entry #{id}"))
        .unwrap_or_default()
}

impl SyncError {
    #[must_use]
    pub fn from_command_failure(command: String, status: i32, stderr: String) -> Self {
        Self::CommandFailed {
            command,
            status,
            stderr_suffix: stderr_suffix(&stderr),
        }
    }

    #[must_use]
    pub fn from_command_timeout(command: String, timeout_ms: u64, stderr: String) -> Self {
        Self::CommandTimedOut {
            command,
            timeout_ms,
            stderr_suffix: stderr_suffix(&stderr),
        }
    }

    /// Re-labels a subprocess or decode failure raised while talking to the
    /// fetch tool so the run reports it as a fetch failure.
    #[must_use]
    pub fn into_fetch_failure(self) -> Self {
        match self {
            Self::Json(error) => Self::Fetch(format!("malformed payload: {error}")),
            Self::Fetch(_) | Self::AlreadyRunning { .. } | Self::InvalidRequest(_) => self,
            other => Self::Fetch(other.to_string()),
        }
    }

    /// Same as [`SyncError::into_fetch_failure`] for the store channel.
    #[must_use]
    pub fn into_storage_failure(self) -> Self {
        match self {
            Self::Storage(_) | Self::AlreadyRunning { .. } | Self::InvalidRequest(_) => self,
            other => Self::Storage(other.to_string()),
        }
    }

    /// Process exit code for this error. An ownership conflict is a
    /// coordination signal rather than a failure and gets its own code.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::AlreadyRunning { .. } => EXIT_ALREADY_RUNNING,
            _ => EXIT_FAILURE,
        }
    }

    /// Stable, unique, machine-readable error code for every variant.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "BS-IO",
            Self::Json(_) => "BS-JSON",
            Self::CommandMissing { .. } => "BS-CMD-MISSING",
            Self::CommandFailed { .. } => "BS-CMD-FAILED",
            Self::CommandTimedOut { .. } => "BS-CMD-TIMEOUT",
            Self::InvalidRequest(_) => "BS-INVALID-REQUEST",
            Self::Fetch(_) => "BS-FETCH",
            Self::Planning(_) => "BS-PLANNING",
            Self::Storage(_) => "BS-STORAGE",
            Self::AlreadyRunning { .. } => "BS-ALREADY-RUNNING",
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("; stderr: {trimmed}")
    }
}
