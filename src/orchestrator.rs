//! Top-level control flow of one sync run.
//!
//! ```text
//! LOCK_CHECK -> LOCK_ACQUIRE -> LEDGER_ENTRY -> FETCH -> MERGE_PLAN
//!     -> MERGE_EXECUTE -> FINALIZE -> LOCK_RELEASE
//! ```
//!
//! Any stage may fail. Once a ledger entry exists a failure finalizes it as
//! `failed`; once the lock is held it is released on every path, including
//! panics, through the [`RunLockGuard`](crate::run_lock::RunLockGuard) drop.

use chrono::Utc;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::fetch::{CommandFetcher, FetchClient};
use crate::ledger::TaskLedger;
use crate::marker::write_total_count;
use crate::merge;
use crate::model::{EntryId, Record, SyncOutcome, SyncStatus};
use crate::run_lock::{LockAttempt, RunLock};
use crate::store::{PsqlChannel, StoreChannel, schema_statement};

pub const RUN_TITLE: &str = "X bookmarks sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    /// Look for a live holder of the run lock.
    LockCheck,
    LockAcquire,
    /// Reuse a fresh `running` ledger entry or open a new one.
    LedgerEntry,
    Fetch,
    MergePlan,
    MergeExecute,
    /// Close the ledger entry and refresh the total-count marker.
    Finalize,
    LockRelease,
}

impl SyncStage {
    /// The stage label used in logging.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::LockCheck => "lock_check",
            Self::LockAcquire => "lock_acquire",
            Self::LedgerEntry => "ledger_entry",
            Self::Fetch => "fetch",
            Self::MergePlan => "merge_plan",
            Self::MergeExecute => "merge_execute",
            Self::Finalize => "finalize",
            Self::LockRelease => "lock_release",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Items requested from the fetch tool.
    pub count: u32,
    /// Create the tables before touching them.
    pub ensure_schema: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            count: crate::config::DEFAULT_FETCH_COUNT,
            ensure_schema: false,
        }
    }
}

pub struct SyncOrchestrator<F, S> {
    config: SyncConfig,
    fetcher: F,
    store: S,
}

impl SyncOrchestrator<CommandFetcher, PsqlChannel> {
    /// Wires the real fetch tool and `psql` from `config`.
    #[must_use]
    pub fn from_config(config: SyncConfig) -> Self {
        let fetcher = CommandFetcher::new(config.fetch_bin.clone(), config.fetch_timeout);
        let store = PsqlChannel::new(config.psql_bin.clone(), config.database.clone());
        Self::new(config, fetcher, store)
    }
}

impl<F: FetchClient, S: StoreChannel> SyncOrchestrator<F, S> {
    pub fn new(config: SyncConfig, fetcher: F, store: S) -> Self {
        Self {
            config,
            fetcher,
            store,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Executes one run. `Err(SyncError::AlreadyRunning)` means the run was
    /// redundant and nothing was mutated.
    pub fn run(&self, options: &SyncOptions) -> SyncResult<SyncOutcome> {
        if options.count == 0 {
            return Err(SyncError::InvalidRequest(
                "count must be a positive integer".to_owned(),
            ));
        }
        let started_at = Utc::now().to_rfc3339();
        tracing::info!(count = options.count, "starting bookmark sync");

        let ledger = TaskLedger::new(
            &self.store,
            self.config.agent.clone(),
            self.config.project.clone(),
            self.config.ledger_timeout,
        );
        let lock = RunLock::new(self.config.lock_path.clone());

        stage(SyncStage::LockCheck);
        if let Some(pid) = lock.live_holder()? {
            return Err(conflict(&ledger, pid));
        }

        stage(SyncStage::LockAcquire);
        let guard = match lock.try_acquire()? {
            LockAttempt::Acquired(guard) => guard,
            LockAttempt::Held { pid } => return Err(conflict(&ledger, pid)),
        };

        let result = self.run_locked(&ledger, options, started_at);

        stage(SyncStage::LockRelease);
        guard.release();
        result
    }

    fn run_locked(
        &self,
        ledger: &TaskLedger<&S>,
        options: &SyncOptions,
        started_at: String,
    ) -> SyncResult<SyncOutcome> {
        if options.ensure_schema {
            self.store
                .execute(&schema_statement(), self.config.merge_timeout)
                .map_err(SyncError::into_storage_failure)?;
        }

        stage(SyncStage::LedgerEntry);
        let entry = open_ledger_entry(ledger, options.count);

        match self.fetch_and_merge(ledger, entry, options) {
            Ok(mut outcome) => {
                outcome.started_at_rfc3339 = started_at;
                outcome.finished_at_rfc3339 = Utc::now().to_rfc3339();
                Ok(outcome)
            }
            Err(error) => {
                tracing::error!(code = error.error_code(), %error, "sync failed");
                ledger.finalize_failure(entry, &error.to_string());
                Err(error)
            }
        }
    }

    fn fetch_and_merge(
        &self,
        ledger: &TaskLedger<&S>,
        entry: Option<EntryId>,
        options: &SyncOptions,
    ) -> SyncResult<SyncOutcome> {
        stage(SyncStage::Fetch);
        tracing::info!(count = options.count, "fetching bookmarks");
        let records: Vec<Record> = self
            .fetcher
            .fetch(options.count)
            .map_err(SyncError::into_fetch_failure)?;
        let fetched = records.len();
        tracing::info!(fetched, "fetched bookmarks");

        if records.is_empty() {
            tracing::info!("no bookmarks to sync");
            stage(SyncStage::Finalize);
            ledger.finalize_success(entry, 0, None);
            return Ok(outcome(SyncStatus::NothingToSync, 0, 0, 0, None, entry));
        }

        stage(SyncStage::MergePlan);
        let plan = merge::plan(&records).ok_or_else(|| {
            SyncError::Planning(format!(
                "none of the {fetched} fetched records carries an id"
            ))
        })?;

        stage(SyncStage::MergeExecute);
        tracing::info!(rows = plan.rows, skipped = plan.skipped, "upserting bookmarks");
        let output = self
            .store
            .execute(&plan.statement, self.config.merge_timeout)
            .map_err(SyncError::into_storage_failure)?;
        let total = output.last_integer::<u64>();
        if total.is_none() {
            tracing::warn!(
                output = output.raw(),
                "merge committed but the row count was unreadable"
            );
        }

        stage(SyncStage::Finalize);
        ledger.finalize_success(entry, fetched, total);
        if let Some(total) = total
            && let Err(error) = write_total_count(&self.config.count_marker_path, total)
        {
            tracing::warn!(
                path = %self.config.count_marker_path.display(),
                %error,
                "failed to refresh total-count marker"
            );
        }

        tracing::info!(
            fetched,
            processed = plan.rows,
            skipped = plan.skipped,
            total_in_db = total,
            "sync complete"
        );
        Ok(outcome(
            SyncStatus::Synced,
            fetched,
            plan.rows,
            plan.skipped,
            total,
            entry,
        ))
    }
}

fn stage(stage: SyncStage) {
    tracing::debug!(stage = stage.label(), "entering stage");
}

fn open_ledger_entry<S: StoreChannel>(ledger: &TaskLedger<S>, count: u32) -> Option<EntryId> {
    if let Some(id) = ledger.find_active_run() {
        tracing::info!(entry = id, "reusing active ledger entry");
        return Some(id);
    }
    let entry = ledger.create_run(RUN_TITLE, &format!("Fetching up to {count} bookmarks"));
    if let Some(id) = entry {
        tracing::info!(entry = id, "opened ledger entry");
    }
    entry
}

fn conflict<S: StoreChannel>(ledger: &TaskLedger<S>, pid: u32) -> SyncError {
    let ledger_entry = ledger.find_active_run();
    tracing::warn!(pid, ?ledger_entry, "another sync is running; exiting");
    SyncError::AlreadyRunning { pid, ledger_entry }
}

fn outcome(
    status: SyncStatus,
    fetched: usize,
    merged: usize,
    skipped: usize,
    total_in_store: Option<u64>,
    ledger_entry: Option<EntryId>,
) -> SyncOutcome {
    SyncOutcome {
        status,
        fetched,
        merged,
        skipped,
        total_in_store,
        ledger_entry,
        started_at_rfc3339: String::new(),
        finished_at_rfc3339: String::new(),
    }
}
