//! Coordinator configuration and the timeout policy

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::xa::validate_node_id;

use super::errors::{TxError, TxResult};

/// Default transaction timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default ceiling on transaction timeouts: one year
pub const DEFAULT_MAXIMUM_TIMEOUT_SECS: u64 = 31_536_000;

/// Transaction manager settings
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Stamped on every branch; recovery only resolves its own node's branches
    pub node_id: String,
    pub object_store_path: PathBuf,
    /// 0 means "use the maximum timeout"
    pub default_timeout_secs: u64,
    pub maximum_timeout_secs: u64,
    pub enable_statistics: bool,
    /// How often the reaper looks for expired transactions
    pub reaper_interval: Duration,
}

impl CoordinatorConfig {
    pub fn new(node_id: &str, object_store_path: impl Into<PathBuf>) -> Self {
        Self {
            node_id: node_id.to_string(),
            object_store_path: object_store_path.into(),
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            maximum_timeout_secs: DEFAULT_MAXIMUM_TIMEOUT_SECS,
            enable_statistics: true,
            reaper_interval: Duration::from_millis(500),
        }
    }

    pub fn validate(&self) -> TxResult<()> {
        validate_node_id(&self.node_id).map_err(|e| TxError::invalid_config(e.message))?;
        if self.maximum_timeout_secs == 0 {
            return Err(TxError::invalid_config(
                "maximum_timeout_secs must be greater than 0",
            ));
        }
        if self.reaper_interval.is_zero() {
            return Err(TxError::invalid_config(
                "reaper_interval must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Default and maximum timeouts, adjustable while transactions run.
///
/// A default of 0 resolves to the maximum. A default above the maximum is
/// clamped to it.
#[derive(Debug)]
pub struct TimeoutPolicy {
    default_secs: AtomicU64,
    maximum_secs: AtomicU64,
}

impl TimeoutPolicy {
    pub fn new(default_secs: u64, maximum_secs: u64) -> Self {
        Self {
            default_secs: AtomicU64::new(default_secs),
            maximum_secs: AtomicU64::new(maximum_secs),
        }
    }

    /// Configured default, 0 included
    pub fn configured_default(&self) -> u64 {
        self.default_secs.load(Ordering::SeqCst)
    }

    pub fn maximum(&self) -> u64 {
        self.maximum_secs.load(Ordering::SeqCst)
    }

    /// The default a new transaction gets
    pub fn effective_default(&self) -> u64 {
        self.clamp(self.configured_default())
    }

    /// Resolve a requested timeout against the current maximum
    pub fn clamp(&self, requested_secs: u64) -> u64 {
        let maximum = self.maximum();
        if requested_secs == 0 {
            maximum
        } else {
            requested_secs.min(maximum)
        }
    }

    pub fn set_default(&self, secs: u64) {
        self.default_secs.store(secs, Ordering::SeqCst);
    }

    pub fn set_maximum(&self, secs: u64) -> TxResult<()> {
        if secs == 0 {
            return Err(TxError::invalid_config(
                "maximum timeout must be greater than 0",
            ));
        }
        self.maximum_secs.store(secs, Ordering::SeqCst);
        Ok(())
    }
}
