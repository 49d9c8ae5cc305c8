//! Configuration file
//!
//! ```json
//! {
//!   "node_identifier": "node-a",
//!   "object_store_path": "./data",
//!   "recovery": { "period_secs": 120, "listener_address": "127.0.0.1:4712" },
//!   "remote_participants": [{ "name": "server", "address": "127.0.0.1:4713" }]
//! }
//! ```
//!
//! Only `node_identifier` and `object_store_path` are required.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::observability::{log_event_with_fields, Event};
use crate::recovery::{RecoveryConfig, DEFAULT_LISTENER_ADDRESS};
use crate::txn::{CoordinatorConfig, DEFAULT_MAXIMUM_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS};

use super::errors::{CliError, CliResult};

/// Directory under the object store path holding participant journals
pub const JOURNAL_DIR: &str = "participants";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node_identifier: String,

    pub object_store_path: String,

    /// 0 means "use the maximum timeout"
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    #[serde(default = "default_maximum_timeout_secs")]
    pub maximum_timeout_secs: u64,

    #[serde(default = "default_enable_statistics")]
    pub enable_statistics: bool,

    #[serde(default = "default_reaper_interval_millis")]
    pub reaper_interval_millis: u64,

    #[serde(default)]
    pub recovery: RecoverySection,

    #[serde(default)]
    pub remote_participants: Vec<RemoteParticipant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySection {
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,

    #[serde(default = "default_backoff_millis")]
    pub backoff_millis: u64,

    #[serde(default = "default_resource_timeout_millis")]
    pub resource_timeout_millis: u64,

    #[serde(default = "default_listener_address")]
    pub listener_address: String,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            period_secs: default_period_secs(),
            backoff_millis: default_backoff_millis(),
            resource_timeout_millis: default_resource_timeout_millis(),
            listener_address: default_listener_address(),
        }
    }
}

/// A participant reached through its recovery listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteParticipant {
    pub name: String,
    pub address: String,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_maximum_timeout_secs() -> u64 {
    DEFAULT_MAXIMUM_TIMEOUT_SECS
}
fn default_enable_statistics() -> bool {
    true
}
fn default_reaper_interval_millis() -> u64 {
    500
}
fn default_period_secs() -> u64 {
    120
}
fn default_backoff_millis() -> u64 {
    10_000
}
fn default_resource_timeout_millis() -> u64 {
    30_000
}
fn default_listener_address() -> String {
    DEFAULT_LISTENER_ADDRESS.to_string()
}

impl Config {
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;
        let config = Self::from_json(&content)?;

        log_event_with_fields(
            Event::ConfigLoaded,
            &[
                ("path", &path.display().to_string()),
                ("node", config.node_identifier.as_str()),
            ],
        );
        Ok(config)
    }

    pub fn from_json(content: &str) -> CliResult<Self> {
        let config: Config = serde_json::from_str(content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> CliResult<()> {
        self.coordinator_config()
            .validate()
            .map_err(|e| CliError::config_error(e.message().to_string()))?;

        if self.object_store_path.trim().is_empty() {
            return Err(CliError::config_error("object_store_path must not be empty"));
        }
        if self.recovery.period_secs == 0 {
            return Err(CliError::config_error("recovery.period_secs must be > 0"));
        }
        if self.recovery.resource_timeout_millis == 0 {
            return Err(CliError::config_error(
                "recovery.resource_timeout_millis must be > 0",
            ));
        }
        if self.recovery.listener_address.trim().is_empty() {
            return Err(CliError::config_error(
                "recovery.listener_address must not be empty",
            ));
        }

        let mut names = HashSet::new();
        for remote in &self.remote_participants {
            if remote.name.trim().is_empty() || remote.address.trim().is_empty() {
                return Err(CliError::config_error(
                    "remote participants need a name and an address",
                ));
            }
            if !names.insert(remote.name.as_str()) {
                return Err(CliError::config_error(format!(
                    "Duplicate remote participant '{}'",
                    remote.name
                )));
            }
        }
        Ok(())
    }

    pub fn object_store_path(&self) -> &Path {
        Path::new(&self.object_store_path)
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.object_store_path().join(JOURNAL_DIR)
    }

    pub fn resource_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery.resource_timeout_millis)
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let mut config = CoordinatorConfig::new(&self.node_identifier, self.object_store_path());
        config.default_timeout_secs = self.default_timeout_secs;
        config.maximum_timeout_secs = self.maximum_timeout_secs;
        config.enable_statistics = self.enable_statistics;
        config.reaper_interval = Duration::from_millis(self.reaper_interval_millis);
        config
    }

    pub fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            period: Duration::from_secs(self.recovery.period_secs),
            backoff: Duration::from_millis(self.recovery.backoff_millis),
            resource_timeout: self.resource_timeout(),
            listener_address: self.recovery.listener_address.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::errors::CliErrorCode;

    #[test]
    fn test_defaults() {
        let config =
            Config::from_json(r#"{"node_identifier": "node-a", "object_store_path": "/tmp/x"}"#)
                .unwrap();
        assert_eq!(config.default_timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.maximum_timeout_secs, DEFAULT_MAXIMUM_TIMEOUT_SECS);
        assert!(config.enable_statistics);
        assert_eq!(config.recovery.period_secs, 120);
        assert_eq!(config.recovery.listener_address, DEFAULT_LISTENER_ADDRESS);
        assert!(config.remote_participants.is_empty());
        assert_eq!(config.journal_dir(), PathBuf::from("/tmp/x/participants"));

        let recovery = config.recovery_config();
        assert_eq!(recovery.backoff, Duration::from_secs(10));
        assert_eq!(recovery.resource_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_required_field() {
        let err = Config::from_json(r#"{"node_identifier": "node-a"}"#).unwrap_err();
        assert_eq!(err.code(), CliErrorCode::ConfigError);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_json(
            r#"{"node_identifier": "node-a", "object_store_path": "x", "maximum_timeout_secs": 0}"#
        )
        .is_err());
        assert!(Config::from_json(
            r#"{"node_identifier": "node-a", "object_store_path": "x", "recovery": {"period_secs": 0}}"#
        )
        .is_err());
        assert!(Config::from_json(
            r#"{"node_identifier": "node-a", "object_store_path": "x",
                "remote_participants": [
                    {"name": "s", "address": "127.0.0.1:1"},
                    {"name": "s", "address": "127.0.0.1:2"}
                ]}"#
        )
        .is_err());
    }

    #[test]
    fn test_coordinator_config_mapping() {
        let config = Config::from_json(
            r#"{"node_identifier": "node-a", "object_store_path": "x",
                "default_timeout_secs": 0, "reaper_interval_millis": 50}"#,
        )
        .unwrap();
        let coordinator = config.coordinator_config();
        assert_eq!(coordinator.node_id, "node-a");
        assert_eq!(coordinator.default_timeout_secs, 0);
        assert_eq!(coordinator.reaper_interval, Duration::from_millis(50));
    }
}
