//! Scoped begin/complete logging for long-running operations
//!
//! Used around recovery scans and cache swaps:
//! - `{event}_BEGIN` on creation
//! - `{event}_COMPLETE` with `elapsed_ms` when completed
//! - `{event}_FAILED` when failed
//! - `{event}_INCOMPLETE` when dropped without either

use std::cell::Cell;
use std::time::Instant;

use super::events::Event;
use super::logger::Logger;

/// A scope around one operation, named by its event
///
/// ```ignore
/// let scope = ObservationScope::new(Event::RecoveryScan);
/// let report = scan_once()?;
/// scope.complete_with_fields(&[("committed", &report.committed.to_string())]);
/// ```
pub struct ObservationScope {
    event: Event,
    completed: Cell<bool>,
    fields: Vec<(&'static str, String)>,
    timer: Timer,
}

impl ObservationScope {
    /// Open a scope, logging `{event}_BEGIN`
    pub fn new(event: Event) -> Self {
        Self::with_fields(event, &[])
    }

    /// Open a scope whose fields are repeated on every line it logs
    pub fn with_fields(event: Event, fields: &[(&'static str, &str)]) -> Self {
        let name = format!("{}_BEGIN", event.as_str());
        Logger::log(event.severity(), &name, fields);

        Self {
            event,
            completed: Cell::new(false),
            fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
            timer: Timer::new(),
        }
    }

    /// Close the scope successfully
    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    /// Close the scope successfully with result fields
    pub fn complete_with_fields(self, extra_fields: &[(&str, &str)]) {
        self.completed.set(true);
        let name = format!("{}_COMPLETE", self.event.as_str());
        let elapsed = self.timer.elapsed_ms();

        let mut all_fields: Vec<(&str, &str)> =
            self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        all_fields.extend(extra_fields.iter().copied());
        all_fields.push(("elapsed_ms", &elapsed));

        Logger::log(self.event.severity(), &name, &all_fields);
    }

    /// Close the scope as failed, at ERROR
    pub fn fail(self, reason: &str) {
        self.completed.set(true);
        let name = format!("{}_FAILED", self.event.as_str());

        let mut all_fields: Vec<(&str, &str)> =
            self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        all_fields.push(("reason", reason));

        Logger::error(&name, &all_fields);
    }

    /// Whether the scope has been closed
    pub fn is_completed(&self) -> bool {
        self.completed.get()
    }
}

impl Drop for ObservationScope {
    fn drop(&mut self) {
        if !self.completed.get() {
            let name = format!("{}_INCOMPLETE", self.event.as_str());
            Logger::warn(&name, &[("reason", "scope dropped without completion")]);
        }
    }
}

/// Wall-clock timer for elapsed fields
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed milliseconds as a log field value
    pub fn elapsed_ms(&self) -> String {
        self.start.elapsed().as_millis().to_string()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
