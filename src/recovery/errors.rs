//! Recovery error types
//!
//! Error codes:
//! - XACOORD_RECOVERY_OBJECT_STORE (ERROR)
//! - XACOORD_RECOVERY_LISTENER (ERROR)
//! - XACOORD_RECOVERY_PROTOCOL (ERROR)
//! - XACOORD_RECOVERY_NOT_HEURISTIC (ERROR)
//! - XACOORD_RECOVERY_RECORD_NOT_FOUND (ERROR)
//! - XACOORD_RECOVERY_TIMEOUT (WARN)
//! - XACOORD_RECOVERY_WORKER (ERROR)

use std::fmt;
use std::io;

use crate::objectstore::ObjectStoreError;
use crate::observability::Severity;
use crate::xa::Xid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryErrorCode {
    /// Records could not be listed, read or written
    ObjectStore,
    /// The recovery listener could not bind or serve
    Listener,
    /// Malformed request or response on the recovery wire
    Protocol,
    /// Administrative recover on a record that is not heuristic
    NotHeuristic,
    /// No record for the given xid
    RecordNotFound,
    /// A resource call exceeded the per-call timeout
    Timeout,
    /// The periodic recovery thread could not be started
    Worker,
}

impl RecoveryErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            RecoveryErrorCode::ObjectStore => "XACOORD_RECOVERY_OBJECT_STORE",
            RecoveryErrorCode::Listener => "XACOORD_RECOVERY_LISTENER",
            RecoveryErrorCode::Protocol => "XACOORD_RECOVERY_PROTOCOL",
            RecoveryErrorCode::NotHeuristic => "XACOORD_RECOVERY_NOT_HEURISTIC",
            RecoveryErrorCode::RecordNotFound => "XACOORD_RECOVERY_RECORD_NOT_FOUND",
            RecoveryErrorCode::Timeout => "XACOORD_RECOVERY_TIMEOUT",
            RecoveryErrorCode::Worker => "XACOORD_RECOVERY_WORKER",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            RecoveryErrorCode::Timeout => Severity::Warn,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for RecoveryErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug)]
pub struct RecoveryError {
    code: RecoveryErrorCode,
    message: String,
}

impl RecoveryError {
    pub fn object_store(err: &ObjectStoreError) -> Self {
        Self {
            code: RecoveryErrorCode::ObjectStore,
            message: err.to_string(),
        }
    }

    pub fn listener(context: &str, err: io::Error) -> Self {
        Self {
            code: RecoveryErrorCode::Listener,
            message: format!("{}: {}", context, err),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self {
            code: RecoveryErrorCode::Protocol,
            message: reason.into(),
        }
    }

    pub fn not_heuristic(xid: &Xid) -> Self {
        Self {
            code: RecoveryErrorCode::NotHeuristic,
            message: format!("record {} is not in heuristic state", xid),
        }
    }

    pub fn record_not_found(xid: &Xid) -> Self {
        Self {
            code: RecoveryErrorCode::RecordNotFound,
            message: format!("no recovery record for {}", xid),
        }
    }

    pub fn timeout(call: &str, resource: &str) -> Self {
        Self {
            code: RecoveryErrorCode::Timeout,
            message: format!("{} on {} exceeded the resource timeout", call, resource),
        }
    }

    pub fn worker(err: io::Error) -> Self {
        Self {
            code: RecoveryErrorCode::Worker,
            message: format!("cannot start periodic recovery: {}", err),
        }
    }

    pub fn code(&self) -> RecoveryErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code, self.message)
    }
}

impl std::error::Error for RecoveryError {}

pub type RecoveryResult<T> = Result<T, RecoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let xid = Xid::new_global("n");
        let err = RecoveryError::record_not_found(&xid);
        assert_eq!(err.code(), RecoveryErrorCode::RecordNotFound);
        assert!(err
            .to_string()
            .starts_with("[ERROR] XACOORD_RECOVERY_RECORD_NOT_FOUND: no recovery record"));
    }

    #[test]
    fn test_timeout_is_warning() {
        let err = RecoveryError::timeout("recover", "db");
        assert_eq!(err.severity(), Severity::Warn);
    }
}
