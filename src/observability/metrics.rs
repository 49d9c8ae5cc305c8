//! Coordinator statistics
//!
//! - Counters are monotonic and reset only on process start
//! - `in_flight` is the one gauge: begun and not yet terminated
//! - When statistics are disabled nothing is counted, in-flight included

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Transaction outcome counters, exposed read-only to operators
#[derive(Debug, Default)]
pub struct TransactionStatistics {
    enabled: AtomicBool,
    begun: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    timed_out: AtomicU64,
    heuristics: AtomicU64,
    application_rollbacks: AtomicU64,
    resource_rollbacks: AtomicU64,
    in_flight: AtomicU64,
}

impl TransactionStatistics {
    pub fn new(enabled: bool) -> Self {
        let stats = Self::default();
        stats.enabled.store(enabled, Ordering::Relaxed);
        stats
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Toggle counting. Existing values are kept.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn bump(&self, counter: &AtomicU64) {
        if self.is_enabled() {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn finish(&self) {
        if self.is_enabled() {
            // Saturate: a transaction begun while disabled may end while enabled
            let _ = self
                .in_flight
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                    Some(n.saturating_sub(1))
                });
        }
    }

    pub fn record_begin(&self) {
        self.bump(&self.begun);
        self.bump(&self.in_flight);
    }

    pub fn record_commit(&self) {
        self.bump(&self.committed);
        self.finish();
    }

    /// Rollback requested by the application (explicit rollback or rollback-only)
    pub fn record_application_rollback(&self) {
        self.bump(&self.aborted);
        self.bump(&self.application_rollbacks);
        self.finish();
    }

    /// Rollback forced by a participant (negative vote or failed commit)
    pub fn record_resource_rollback(&self) {
        self.bump(&self.aborted);
        self.bump(&self.resource_rollbacks);
        self.finish();
    }

    /// Rollback by the reaper after the deadline passed
    pub fn record_timeout(&self) {
        self.bump(&self.aborted);
        self.bump(&self.timed_out);
        self.finish();
    }

    pub fn record_heuristic(&self) {
        self.bump(&self.heuristics);
        self.finish();
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            enabled: self.is_enabled(),
            begun: self.begun.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            heuristics: self.heuristics.load(Ordering::Relaxed),
            application_rollbacks: self.application_rollbacks.load(Ordering::Relaxed),
            resource_rollbacks: self.resource_rollbacks.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time snapshot of the statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub enabled: bool,
    pub begun: u64,
    pub committed: u64,
    pub aborted: u64,
    pub timed_out: u64,
    pub heuristics: u64,
    pub application_rollbacks: u64,
    pub resource_rollbacks: u64,
    pub in_flight: u64,
}
