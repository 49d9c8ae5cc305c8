//! Transaction coordination
//!
//! Per-thread demarcation, one- and two-phase commit, imported
//! transactions and the timeout reaper. Commit decisions are logged to the
//! object store so recovery can finish them after a crash.

mod config;
mod errors;
mod manager;
mod outcome;
mod status;
mod transaction;

pub use config::{CoordinatorConfig, TimeoutPolicy, DEFAULT_MAXIMUM_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS};
pub use errors::{TxError, TxErrorCode, TxResult};
pub use manager::TransactionManager;
pub use outcome::{classify_commit, CommitOutcome, HeuristicOutcome};
pub use status::TxStatus;
pub use transaction::Transaction;
