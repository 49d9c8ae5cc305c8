//! Observability for the coordinator and the cache lifecycle
//!
//! - Structured JSON log lines, one per event
//! - Atomic transaction statistics
//! - Begin/complete scopes around recovery scans and cache swaps
//!
//! Logging never fails the operation being logged.
//!
//! # Usage
//!
//! ```ignore
//! use xacoord::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::TxHeuristic, &[("xid", &xid.to_string())]);
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity, LOG_LEVEL_ENV};
pub use metrics::{StatisticsSnapshot, TransactionStatistics};
pub use scope::{ObservationScope, Timer};

/// Log an event at its own severity
pub fn log_event(event: Event) {
    log_event_with_fields(event, &[]);
}

/// Log an event at its own severity with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    match event.severity() {
        Severity::Error | Severity::Fatal => Logger::log_stderr(event.severity(), event.as_str(), fields),
        severity => Logger::log(severity, event.as_str(), fields),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        log_event(Event::CoordinatorStart);
        log_event(Event::ServerSuspend);
    }

    #[test]
    fn test_log_event_with_fields() {
        log_event_with_fields(Event::ConfigLoaded, &[("object_store_path", "/tmp/test")]);
    }
}
