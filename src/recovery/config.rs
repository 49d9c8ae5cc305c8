//! Recovery manager settings

use std::time::Duration;

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(120);
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);
pub const DEFAULT_RESOURCE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_LISTENER_ADDRESS: &str = "127.0.0.1:4712";

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Interval between periodic scans
    pub period: Duration,
    /// Pause between the two passes of a scan
    pub backoff: Duration,
    /// Upper bound on any single resource call made by a scan
    pub resource_timeout: Duration,
    pub listener_address: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            backoff: DEFAULT_BACKOFF,
            resource_timeout: DEFAULT_RESOURCE_TIMEOUT,
            listener_address: DEFAULT_LISTENER_ADDRESS.to_string(),
        }
    }
}

impl RecoveryConfig {
    /// No backoff and short timeouts
    pub fn for_tests() -> Self {
        Self {
            period: Duration::from_secs(3600),
            backoff: Duration::ZERO,
            resource_timeout: Duration::from_secs(5),
            listener_address: "127.0.0.1:0".to_string(),
        }
    }
}
