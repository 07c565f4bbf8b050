use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of a ledger row, assigned by the store.
pub type EntryId = i64;

/// Scheme and domain of the canonical reference derived for each entity.
pub const CANONICAL_BASE_URL: &str = "https://x.com";

// ---------------------------------------------------------------------------
// Fetched records
// ---------------------------------------------------------------------------

/// One item returned by the fetch tool.
///
/// The raw payload is kept verbatim; typed accessors read the handful of
/// fields the merge needs and tolerate absent or oddly-typed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    raw: Value,
}

impl Record {
    #[must_use]
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Identity key. Numbers are rendered in decimal; anything else
    /// (missing, null, nested) yields an empty string.
    #[must_use]
    pub fn id(&self) -> String {
        scalar_text(self.raw.get("id")).unwrap_or_default()
    }

    #[must_use]
    pub fn author_id(&self) -> String {
        scalar_text(self.raw.get("authorId")).unwrap_or_default()
    }

    #[must_use]
    pub fn author_username(&self) -> Option<String> {
        self.raw
            .get("author")
            .and_then(|author| author.get("username"))
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    #[must_use]
    pub fn text(&self) -> Option<String> {
        self.raw.get("text").and_then(Value::as_str).map(str::to_owned)
    }

    /// `https://x.com/{username}/status/{id}` when both parts are non-empty,
    /// otherwise the empty string.
    #[must_use]
    pub fn canonical_url(&self) -> String {
        let id = self.id();
        match self.author_username() {
            Some(username) if !username.is_empty() && !id.is_empty() => {
                format!("{CANONICAL_BASE_URL}/{username}/status/{id}")
            }
            _ => String::new(),
        }
    }
}

impl From<Value> for Record {
    fn from(raw: Value) -> Self {
        Self::new(raw)
    }
}

fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Running,
    Done,
    Failed,
}

impl LedgerStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Run outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    NothingToSync,
}

/// Summary of a completed run, printed with `--json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub status: SyncStatus,
    pub fetched: usize,
    pub merged: usize,
    pub skipped: usize,
    pub total_in_store: Option<u64>,
    pub ledger_entry: Option<EntryId>,
    pub started_at_rfc3339: String,
    pub finished_at_rfc3339: String,
}
