use std::time::Duration;

use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use crate::model::Record;
use crate::process::run_command_with_timeout;

/// Source of records to merge. `limit` bounds how many items are requested.
pub trait FetchClient {
    fn fetch(&self, limit: u32) -> SyncResult<Vec<Record>>;
}

impl<T: FetchClient + ?Sized> FetchClient for &T {
    fn fetch(&self, limit: u32) -> SyncResult<Vec<Record>> {
        (**self).fetch(limit)
    }
}

/// Invokes the bookmark CLI: `<program> bookmarks -n <limit> --json`.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    program: String,
    timeout: Duration,
}

impl CommandFetcher {
    #[must_use]
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn args(limit: u32) -> Vec<String> {
        vec![
            "bookmarks".to_owned(),
            "-n".to_owned(),
            limit.to_string(),
            "--json".to_owned(),
        ]
    }
}

impl FetchClient for CommandFetcher {
    fn fetch(&self, limit: u32) -> SyncResult<Vec<Record>> {
        let output = run_command_with_timeout(&self.program, &Self::args(limit), Some(self.timeout))
            .map_err(SyncError::into_fetch_failure)?;
        parse_payload(&output.stdout)
    }
}

/// Decodes the fetch tool's stdout. Only a top-level JSON array is accepted.
pub fn parse_payload(stdout: &[u8]) -> SyncResult<Vec<Record>> {
    let payload: Value = serde_json::from_slice(stdout)
        .map_err(|error| SyncError::Json(error).into_fetch_failure())?;
    match payload {
        Value::Array(items) => Ok(items.into_iter().map(Record::new).collect()),
        other => Err(SyncError::Fetch(format!(
            "expected a JSON array, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
