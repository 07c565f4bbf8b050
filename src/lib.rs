#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod escape;
pub mod fetch;
pub mod ledger;
pub mod logging;
pub mod marker;
pub mod merge;
pub mod model;
pub mod orchestrator;
pub mod process;
pub mod run_lock;
pub mod store;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use model::{Record, SyncOutcome, SyncStatus};
pub use orchestrator::{SyncOptions, SyncOrchestrator, SyncStage};
