//! Durable store of in-doubt transaction records
//!
//! The record directory is the single source of truth for state that must
//! survive a crash. It is empty once every transaction is resolved.

mod errors;
mod record;
mod store;

pub use errors::{ObjectStoreError, ObjectStoreErrorCode, ObjectStoreResult};
pub use record::{ParticipantOutcome, ParticipantRecord, RecordState, TxLogRecord};
pub use store::{write_file_atomic, ObjectStore};
