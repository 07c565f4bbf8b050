//! Audit rows for sync attempts in `ops.tasks`.
//!
//! The ledger is observability, not a correctness dependency: every public
//! operation logs and swallows store failures. The `try_*` variants expose
//! the underlying result for callers and tests that need it.

use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::escape::{sanitize_reason, text_literal};
use crate::model::{EntryId, LedgerStatus};
use crate::store::StoreChannel;

pub const LEDGER_TABLE: &str = "ops.tasks";

/// A `running` entry younger than this is treated as the current run.
/// There is no heartbeat, so a run that outlives the window is no longer
/// found and the next invocation opens a fresh entry.
pub const ACTIVE_RUN_WINDOW_MINUTES: u32 = 10;

#[derive(Debug, Clone)]
pub struct TaskLedger<S> {
    store: S,
    agent: String,
    project: String,
    timeout: Duration,
}

impl<S: StoreChannel> TaskLedger<S> {
    pub fn new(
        store: S,
        agent: impl Into<String>,
        project: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            agent: agent.into(),
            project: project.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Most recent `running` entry for this agent inside the active window.
    pub fn find_active_run(&self) -> Option<EntryId> {
        self.try_find_active_run()
            .unwrap_or_else(|error| swallow("find active run", &error))
    }

    pub fn try_find_active_run(&self) -> SyncResult<Option<EntryId>> {
        let statement = format!(
            "SELECT id FROM {LEDGER_TABLE}\n\
             WHERE status = {status}\n  \
             AND agent = {agent}\n  \
             AND created_at > now() - interval '{ACTIVE_RUN_WINDOW_MINUTES} minutes'\n\
             ORDER BY created_at DESC\n\
             LIMIT 1;\n",
            status = text_literal(LedgerStatus::Running.as_str()),
            agent = text_literal(&self.agent),
        );
        let output = self.store.execute(&statement, self.timeout)?;
        match output.last_scalar() {
            None => Ok(None),
            Some(raw) => parse_entry_id(raw).map(Some),
        }
    }

    /// Opens a `running` entry stamped with the current time.
    pub fn create_run(&self, title: &str, description: &str) -> Option<EntryId> {
        self.try_create_run(title, description)
            .map(Some)
            .unwrap_or_else(|error| swallow("create run", &error))
    }

    pub fn try_create_run(&self, title: &str, description: &str) -> SyncResult<EntryId> {
        let statement = format!(
            "INSERT INTO {LEDGER_TABLE} (title, description, status, agent, project, created_at)\n\
             VALUES ({title}, {description}, {status}, {agent}, {project}, now())\n\
             RETURNING id;\n",
            title = text_literal(title),
            description = text_literal(description),
            status = text_literal(LedgerStatus::Running.as_str()),
            agent = text_literal(&self.agent),
            project = text_literal(&self.project),
        );
        let output = self.store.execute(&statement, self.timeout)?;
        let raw = output
            .last_scalar()
            .ok_or_else(|| SyncError::Storage("ledger insert returned no id".to_owned()))?;
        parse_entry_id(raw)
    }

    /// Marks the entry `done`. `total` is the store's row count after the
    /// merge, when one ran.
    pub fn finalize_success(&self, entry: Option<EntryId>, fetched: usize, total: Option<u64>) {
        let Some(id) = entry else { return };
        let description = success_description(fetched, total);
        if let Err(error) = self.try_finalize(id, LedgerStatus::Done, &description) {
            swallow::<()>("finalize success", &error);
        }
    }

    /// Marks the entry `failed` with a single-line reason.
    pub fn finalize_failure(&self, entry: Option<EntryId>, reason: &str) {
        let Some(id) = entry else { return };
        let description = format!("Sync failed: {}", sanitize_reason(reason));
        if let Err(error) = self.try_finalize(id, LedgerStatus::Failed, &description) {
            swallow::<()>("finalize failure", &error);
        }
    }

    pub fn try_finalize(
        &self,
        id: EntryId,
        status: LedgerStatus,
        description: &str,
    ) -> SyncResult<()> {
        let statement = format!(
            "UPDATE {LEDGER_TABLE}\n\
             SET status = {status}, completed_at = now(), description = {description}\n\
             WHERE id = {id};\n",
            status = text_literal(status.as_str()),
            description = text_literal(description),
        );
        self.store.execute(&statement, self.timeout).map(|_| ())
    }
}

fn success_description(fetched: usize, total: Option<u64>) -> String {
    match total {
        Some(total) => format!("Fetched {fetched} bookmarks; {total} total in archive"),
        None => format!("Fetched {fetched} bookmarks; nothing to merge"),
    }
}

fn parse_entry_id(raw: &str) -> SyncResult<EntryId> {
    raw.parse()
        .map_err(|_| SyncError::Storage(format!("unexpected ledger id `{raw}`")))
}

fn swallow<T: Default>(operation: &str, error: &SyncError) -> T {
    tracing::warn!(operation, code = error.error_code(), %error, "ledger unavailable; continuing");
    T::default()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;
    use crate::store::StoreOutput;

    #[derive(Default)]
    struct ScriptedStore {
        replies: RefCell<VecDeque<SyncResult<StoreOutput>>>,
        seen: RefCell<Vec<String>>,
    }

    impl ScriptedStore {
        fn replying(replies: Vec<SyncResult<StoreOutput>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                seen: RefCell::default(),
            }
        }
    }

    impl StoreChannel for ScriptedStore {
        fn execute(&self, statement: &str, _timeout: Duration) -> SyncResult<StoreOutput> {
            self.seen.borrow_mut().push(statement.to_owned());
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(StoreOutput::default()))
        }
    }

    fn ledger(store: &ScriptedStore) -> TaskLedger<&ScriptedStore> {
        TaskLedger::new(store, "bookmark-sync", "knowledge-base", Duration::from_secs(10))
    }

    #[test]
    fn find_active_run_filters_by_status_agent_and_window() {
        let store = ScriptedStore::replying(vec![Ok(StoreOutput::new("41\n"))]);
        assert_eq!(ledger(&store).find_active_run(), Some(41));

        let seen = store.seen.borrow();
        let statement = &seen[0];
        assert!(statement.contains("status = 'running'"));
        assert!(statement.contains("agent = 'bookmark-sync'"));
        assert!(statement.contains("interval '10 minutes'"));
        assert!(statement.contains("ORDER BY created_at DESC"));
        assert!(statement.contains("LIMIT 1"));
    }

    #[test]
    fn find_active_run_without_rows_is_none() {
        let store = ScriptedStore::replying(vec![Ok(StoreOutput::new("\n"))]);
        assert_eq!(ledger(&store).find_active_run(), None);
    }

    #[test]
    fn find_active_run_swallows_store_errors() {
        let store = ScriptedStore::replying(vec![Err(SyncError::Storage("down".to_owned()))]);
        assert_eq!(ledger(&store).find_active_run(), None);
        let store = ScriptedStore::replying(vec![Ok(StoreOutput::new("not-an-id"))]);
        assert_eq!(ledger(&store).find_active_run(), None);
    }

    #[test]
    fn create_run_inserts_running_entry_and_returns_id() {
        let store = ScriptedStore::replying(vec![Ok(StoreOutput::new("97\n"))]);
        let id = ledger(&store).create_run("X bookmarks sync", "Fetching up to 200 bookmarks");
        assert_eq!(id, Some(97));

        let seen = store.seen.borrow();
        assert!(seen[0].contains("INSERT INTO ops.tasks"));
        assert!(seen[0].contains("'running'"));
        assert!(seen[0].contains("'knowledge-base'"));
        assert!(seen[0].contains("RETURNING id"));
    }

    #[test]
    fn create_run_failure_yields_none() {
        let store = ScriptedStore::replying(vec![Err(SyncError::Storage("denied".to_owned()))]);
        assert_eq!(ledger(&store).create_run("t", "d"), None);
        let store = ScriptedStore::replying(vec![Ok(StoreOutput::default())]);
        assert!(ledger(&store).try_create_run("t", "d").is_err());
    }

    #[test]
    fn finalize_success_sets_done_with_counts() {
        let store = ScriptedStore::default();
        ledger(&store).finalize_success(Some(5), 12, Some(340));
        let seen = store.seen.borrow();
        assert!(seen[0].contains("status = 'done'"));
        assert!(seen[0].contains("completed_at = now()"));
        assert!(seen[0].contains("Fetched 12 bookmarks; 340 total in archive"));
        assert!(seen[0].contains("WHERE id = 5;"));
    }

    #[test]
    fn finalize_success_without_total_mentions_nothing_to_merge() {
        let store = ScriptedStore::default();
        ledger(&store).finalize_success(Some(5), 0, None);
        assert!(store.seen.borrow()[0].contains("Fetched 0 bookmarks; nothing to merge"));
    }

    #[test]
    fn finalize_failure_embeds_escaped_single_line_reason() {
        let store = ScriptedStore::default();
        ledger(&store).finalize_failure(Some(8), "psql: can't connect\n  to server");
        let seen = store.seen.borrow();
        assert!(seen[0].contains("status = 'failed'"));
        assert!(seen[0].contains("'Sync failed: psql: can''t connect to server'"));
    }

    #[test]
    fn finalize_without_entry_is_a_noop() {
        let store = ScriptedStore::default();
        let ledger = ledger(&store);
        ledger.finalize_success(None, 3, Some(3));
        ledger.finalize_failure(None, "boom");
        assert!(store.seen.borrow().is_empty());
    }

    #[test]
    fn finalize_swallows_store_errors() {
        let store = ScriptedStore::replying(vec![
            Err(SyncError::Storage("gone".to_owned())),
            Err(SyncError::Storage("gone".to_owned())),
        ]);
        let ledger = ledger(&store);
        ledger.finalize_success(Some(1), 1, Some(1));
        ledger.finalize_failure(Some(1), "x");
        assert_eq!(store.seen.borrow().len(), 2);
    }

    #[test]
    fn agent_tag_is_escaped() {
        let store = ScriptedStore::default();
        let ledger = TaskLedger::new(&store, "o'neil", "p", Duration::from_secs(1));
        let _ = ledger.find_active_run();
        assert!(store.seen.borrow()[0].contains("agent = 'o''neil'"));
    }
}
