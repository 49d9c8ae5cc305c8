//! Observable events
//!
//! Every log line the coordinator, recovery manager and cache lifecycle
//! emit is named by one of these.

use std::fmt;

use super::logger::Severity;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Transaction manager opened its object store
    CoordinatorStart,
    /// CLI configuration loaded
    ConfigLoaded,

    // Transactions
    /// Transaction began
    TxBegin,
    /// Transaction committed
    TxCommitted,
    /// Transaction rolled back
    TxRolledBack,
    /// Transaction timed out and was rolled back by the reaper
    TxTimedOut,
    /// Transaction ended with a heuristic outcome
    TxHeuristic,
    /// Commit left participants for recovery to finish
    TxCommitDeferred,
    /// A participant refused to prepare
    TxPrepareFailed,
    /// A halt point fired
    TxHalted,

    // Recovery
    /// Recovery scan started
    RecoveryScan,
    /// Pending commit retried by recovery
    RecoveryCommitRetried,
    /// Orphaned branch rolled back
    RecoveryOrphanRolledBack,
    /// Heuristic record left for an operator
    RecoveryHeuristicSkipped,
    /// Operator reclassified a heuristic record
    RecoveryHeuristicReclassified,
    /// Operator discarded a heuristic record
    RecoveryHeuristicForgotten,
    /// Resource call failed or timed out during a scan
    RecoveryResourceFailed,
    /// Recovery listener bound
    ListenerStarted,
    /// Recovery listener stopped
    ListenerStopped,

    // Cache lifecycle
    /// Cache configuration defined on a container
    CacheDefined,
    /// Cache configuration removed from a container
    CacheUndefined,
    /// Managed cache swapped to its suspended configuration
    CacheSuspended,
    /// Managed cache swapped back to its resumed configuration
    CacheResumed,
    /// Suspend or resume was a no-op
    CacheTransitionSkipped,
    /// A cache could not be restarted after a failed swap
    CacheRestartFailed,
    /// Server suspend/resume delivered to activities
    ServerSuspend,
    /// Server resume delivered to activities
    ServerResume,
    /// A suspendable activity failed its callback
    ActivityFailed,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::CoordinatorStart => "COORDINATOR_START",
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::TxBegin => "TX_BEGIN",
            Event::TxCommitted => "TX_COMMITTED",
            Event::TxRolledBack => "TX_ROLLED_BACK",
            Event::TxTimedOut => "TX_TIMED_OUT",
            Event::TxHeuristic => "TX_HEURISTIC",
            Event::TxCommitDeferred => "TX_COMMIT_DEFERRED",
            Event::TxPrepareFailed => "TX_PREPARE_FAILED",
            Event::TxHalted => "TX_HALTED",

            Event::RecoveryScan => "RECOVERY_SCAN",
            Event::RecoveryCommitRetried => "RECOVERY_COMMIT_RETRIED",
            Event::RecoveryOrphanRolledBack => "RECOVERY_ORPHAN_ROLLED_BACK",
            Event::RecoveryHeuristicSkipped => "RECOVERY_HEURISTIC_SKIPPED",
            Event::RecoveryHeuristicReclassified => "RECOVERY_HEURISTIC_RECLASSIFIED",
            Event::RecoveryHeuristicForgotten => "RECOVERY_HEURISTIC_FORGOTTEN",
            Event::RecoveryResourceFailed => "RECOVERY_RESOURCE_FAILED",
            Event::ListenerStarted => "RECOVERY_LISTENER_STARTED",
            Event::ListenerStopped => "RECOVERY_LISTENER_STOPPED",

            Event::CacheDefined => "CACHE_DEFINED",
            Event::CacheUndefined => "CACHE_UNDEFINED",
            Event::CacheSuspended => "CACHE_SUSPENDED",
            Event::CacheResumed => "CACHE_RESUMED",
            Event::CacheTransitionSkipped => "CACHE_TRANSITION_SKIPPED",
            Event::CacheRestartFailed => "CACHE_RESTART_FAILED",
            Event::ServerSuspend => "SERVER_SUSPEND",
            Event::ServerResume => "SERVER_RESUME",
            Event::ActivityFailed => "ACTIVITY_FAILED",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::TxBegin
            | Event::TxCommitted
            | Event::TxRolledBack
            | Event::CacheTransitionSkipped => Severity::Trace,
            Event::TxHeuristic
            | Event::TxCommitDeferred
            | Event::TxPrepareFailed
            | Event::TxTimedOut
            | Event::RecoveryHeuristicSkipped
            | Event::RecoveryResourceFailed => Severity::Warn,
            Event::ActivityFailed | Event::CacheRestartFailed => Severity::Error,
            Event::TxHalted => Severity::Fatal,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
