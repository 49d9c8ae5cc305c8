//! Crash recovery
//!
//! Resolves transactions left behind by a crash or a failed participant:
//! replays logged commit decisions, rolls back orphaned branches, and
//! leaves heuristic outcomes to an operator (`recover` or `forget`).
//!
//! The subordinate side answers a parent coordinator for imported
//! transactions, in process through `SubordinateResource` or across
//! processes through `RecoveryListener` and `RemoteResource`.

mod config;
mod errors;
mod listener;
mod manager;
mod periodic;
mod registry;
mod remote;
mod subordinate;

pub use config::{
    RecoveryConfig, DEFAULT_BACKOFF, DEFAULT_LISTENER_ADDRESS, DEFAULT_PERIOD, DEFAULT_RESOURCE_TIMEOUT,
};
pub use errors::{RecoveryError, RecoveryErrorCode, RecoveryResult};
pub use listener::{ListenerRequest, ListenerResponse, RecoveryListener};
pub use manager::{RecoveryManager, ScanReport};
pub use periodic::PeriodicRecovery;
pub use registry::RecoveryRegistry;
pub use remote::RemoteResource;
pub use subordinate::SubordinateResource;
