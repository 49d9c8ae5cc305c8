//! Halt point injection for crash testing the coordinator
//!
//! A halt point names a position in the two-phase commit driver. When the
//! armed point is reached the coordinator stops dead:
//!
//! - `HaltMode::Abort` terminates the process via `std::process::abort()`
//!   with no cleanup, no unwinding and no catching. This is what the
//!   `XACOORD_HALT_POINT` environment variable arms.
//! - `HaltMode::Simulate` returns `Halted` to the driver, which then
//!   leaves every participant and the object store exactly as they are.
//!   Tests drop the transaction manager afterwards and restart from disk.
//!
//! # Usage
//!
//! ```bash
//! XACOORD_HALT_POINT=after_prepare:0 xacoord simulate --config xacoord.json
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Environment variable read by `HaltInjector::from_env`
pub const HALT_POINT_ENV: &str = "XACOORD_HALT_POINT";

/// A position in the commit protocol where the coordinator can halt.
///
/// Resource positions are zero-based enlistment indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HaltPoint {
    /// Before `prepare` is sent to the participant at this position
    BeforePrepare(usize),
    /// After the participant at this position voted
    AfterPrepare(usize),
    /// After the commit decision is durable in the object store
    AfterLogWrite,
    /// Before `commit` is sent to the participant at this position
    BeforeCommit(usize),
    /// After the participant at this position committed
    AfterCommit(usize),
}

impl HaltPoint {
    fn prefix(&self) -> &'static str {
        match self {
            HaltPoint::BeforePrepare(_) => "before_prepare",
            HaltPoint::AfterPrepare(_) => "after_prepare",
            HaltPoint::AfterLogWrite => "after_log_write",
            HaltPoint::BeforeCommit(_) => "before_commit",
            HaltPoint::AfterCommit(_) => "after_commit",
        }
    }
}

impl fmt::Display for HaltPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltPoint::AfterLogWrite => write!(f, "{}", self.prefix()),
            HaltPoint::BeforePrepare(i)
            | HaltPoint::AfterPrepare(i)
            | HaltPoint::BeforeCommit(i)
            | HaltPoint::AfterCommit(i) => write!(f, "{}:{}", self.prefix(), i),
        }
    }
}

impl FromStr for HaltPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "after_log_write" {
            return Ok(HaltPoint::AfterLogWrite);
        }

        let (name, index) = s
            .split_once(':')
            .ok_or_else(|| format!("halt point '{}' is missing a position", s))?;
        let index: usize = index
            .parse()
            .map_err(|_| format!("halt point '{}' has an invalid position", s))?;

        match name {
            "before_prepare" => Ok(HaltPoint::BeforePrepare(index)),
            "after_prepare" => Ok(HaltPoint::AfterPrepare(index)),
            "before_commit" => Ok(HaltPoint::BeforeCommit(index)),
            "after_commit" => Ok(HaltPoint::AfterCommit(index)),
            other => Err(format!("unknown halt point '{}'", other)),
        }
    }
}

/// How an armed halt point stops the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltMode {
    /// Terminate the process
    Abort,
    /// Report `Halted` and freeze the coordinator
    Simulate,
}

/// Returned when a simulated halt point fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Halted(pub HaltPoint);

impl fmt::Display for Halted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coordinator halted at {}", self.0)
    }
}

/// Holds at most one armed halt point.
///
/// Once a simulated halt fires the injector stays tripped: every later
/// check reports `Halted`, the way a dead process answers nothing.
#[derive(Debug)]
pub struct HaltInjector {
    armed: Mutex<Option<(HaltPoint, HaltMode)>>,
    tripped: AtomicBool,
}

impl Default for HaltInjector {
    fn default() -> Self {
        Self::disarmed()
    }
}

impl HaltInjector {
    /// An injector that never fires
    pub fn disarmed() -> Self {
        Self {
            armed: Mutex::new(None),
            tripped: AtomicBool::new(false),
        }
    }

    /// Arm from `XACOORD_HALT_POINT` in abort mode.
    ///
    /// An unset or unparseable variable leaves the injector disarmed.
    pub fn from_env() -> Self {
        let injector = Self::disarmed();
        if let Ok(value) = std::env::var(HALT_POINT_ENV) {
            match value.parse::<HaltPoint>() {
                Ok(point) => injector.arm(point, HaltMode::Abort),
                Err(e) => eprintln!("[HALT] ignoring {}: {}", HALT_POINT_ENV, e),
            }
        }
        injector
    }

    /// Arm a point, replacing any previously armed one
    pub fn arm(&self, point: HaltPoint, mode: HaltMode) {
        if let Ok(mut armed) = self.armed.lock() {
            *armed = Some((point, mode));
        }
    }

    /// Arm a point in simulate mode
    pub fn simulate(&self, point: HaltPoint) {
        self.arm(point, HaltMode::Simulate);
    }

    /// Whether a simulated halt already fired
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Fail fast if the injector already tripped
    pub fn ensure_alive(&self) -> Result<(), Halted> {
        if self.is_tripped() {
            let point = self
                .armed
                .lock()
                .ok()
                .and_then(|armed| *armed)
                .map(|(p, _)| p)
                .unwrap_or(HaltPoint::AfterLogWrite);
            return Err(Halted(point));
        }
        Ok(())
    }

    /// Fire if `point` is the armed point.
    ///
    /// No-op when disarmed or when another point is armed.
    pub fn check(&self, point: HaltPoint) -> Result<(), Halted> {
        self.ensure_alive()?;

        let mode = match self.armed.lock() {
            Ok(armed) => match *armed {
                Some((p, mode)) if p == point => mode,
                _ => return Ok(()),
            },
            Err(_) => return Ok(()),
        };

        match mode {
            HaltMode::Abort => {
                eprintln!("[HALT] Triggering halt at point: {}", point);
                std::process::abort();
            }
            HaltMode::Simulate => {
                self.tripped.store(true, Ordering::SeqCst);
                Err(Halted(point))
            }
        }
    }
}
