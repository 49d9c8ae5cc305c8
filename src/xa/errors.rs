//! XA return codes
//!
//! Resource calls fail with one of the XA error codes. The numeric values
//! are the ones resource managers report on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// XA error codes a resource call can fail with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XaErrorCode {
    /// XA_RBROLLBACK: rolled back for an unspecified reason
    RbRollback,
    /// XA_RBTIMEOUT: rolled back because the branch took too long
    RbTimeout,
    /// XA_RBOTHER: rolled back for another reason
    RbOther,
    /// XA_HEURHAZ: the branch may have been heuristically completed
    HeurHaz,
    /// XA_HEURCOM: the branch was heuristically committed
    HeurCom,
    /// XA_HEURRB: the branch was heuristically rolled back
    HeurRb,
    /// XA_HEURMIX: the branch was partially committed and partially rolled back
    HeurMix,
    /// XA_RETRY: the resource manager cannot complete now, retry later
    Retry,
    /// XAER_RMERR: error in the branch, the resource manager may have lost it
    RmErr,
    /// XAER_NOTA: the xid is not known to the resource manager
    Nota,
    /// XAER_INVAL: invalid arguments
    Inval,
    /// XAER_PROTO: routine invoked in an improper context
    Proto,
    /// XAER_RMFAIL: the resource manager is unavailable
    RmFail,
}

impl XaErrorCode {
    /// Numeric XA code
    pub fn code(&self) -> i32 {
        match self {
            XaErrorCode::RbRollback => 100,
            XaErrorCode::RbTimeout => 106,
            XaErrorCode::RbOther => 104,
            XaErrorCode::HeurHaz => 8,
            XaErrorCode::HeurCom => 7,
            XaErrorCode::HeurRb => 6,
            XaErrorCode::HeurMix => 5,
            XaErrorCode::Retry => 4,
            XaErrorCode::RmErr => -3,
            XaErrorCode::Nota => -4,
            XaErrorCode::Inval => -5,
            XaErrorCode::Proto => -6,
            XaErrorCode::RmFail => -7,
        }
    }

    /// Map a numeric XA code back. Unknown rollback-range codes map to `RbOther`.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            100 => Some(XaErrorCode::RbRollback),
            106 => Some(XaErrorCode::RbTimeout),
            101..=107 => Some(XaErrorCode::RbOther),
            8 => Some(XaErrorCode::HeurHaz),
            7 => Some(XaErrorCode::HeurCom),
            6 => Some(XaErrorCode::HeurRb),
            5 => Some(XaErrorCode::HeurMix),
            4 => Some(XaErrorCode::Retry),
            -3 => Some(XaErrorCode::RmErr),
            -4 => Some(XaErrorCode::Nota),
            -5 => Some(XaErrorCode::Inval),
            -6 => Some(XaErrorCode::Proto),
            -7 => Some(XaErrorCode::RmFail),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            XaErrorCode::RbRollback => "XA_RBROLLBACK",
            XaErrorCode::RbTimeout => "XA_RBTIMEOUT",
            XaErrorCode::RbOther => "XA_RBOTHER",
            XaErrorCode::HeurHaz => "XA_HEURHAZ",
            XaErrorCode::HeurCom => "XA_HEURCOM",
            XaErrorCode::HeurRb => "XA_HEURRB",
            XaErrorCode::HeurMix => "XA_HEURMIX",
            XaErrorCode::Retry => "XA_RETRY",
            XaErrorCode::RmErr => "XAER_RMERR",
            XaErrorCode::Nota => "XAER_NOTA",
            XaErrorCode::Inval => "XAER_INVAL",
            XaErrorCode::Proto => "XAER_PROTO",
            XaErrorCode::RmFail => "XAER_RMFAIL",
        }
    }

    /// The branch was rolled back by the resource manager
    pub fn is_rollback(&self) -> bool {
        matches!(
            self,
            XaErrorCode::RbRollback | XaErrorCode::RbTimeout | XaErrorCode::RbOther
        )
    }

    /// The branch was completed heuristically
    pub fn is_heuristic(&self) -> bool {
        matches!(
            self,
            XaErrorCode::HeurHaz | XaErrorCode::HeurCom | XaErrorCode::HeurRb | XaErrorCode::HeurMix
        )
    }

    /// The call may succeed if repeated later
    pub fn is_transient(&self) -> bool {
        matches!(self, XaErrorCode::RmFail | XaErrorCode::Retry)
    }
}

impl fmt::Display for XaErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

/// Failure of a single resource call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct XaError {
    pub code: XaErrorCode,
    pub message: String,
}

impl XaError {
    pub fn new(code: XaErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<XaErrorCode> for XaError {
    fn from(code: XaErrorCode) -> Self {
        Self::new(code, code.name())
    }
}

/// Result type for resource calls
pub type XaResult<T> = Result<T, XaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_codes_map_back() {
        for code in [
            XaErrorCode::RbRollback,
            XaErrorCode::HeurMix,
            XaErrorCode::Retry,
            XaErrorCode::RmErr,
            XaErrorCode::RmFail,
        ] {
            assert_eq!(XaErrorCode::from_code(code.code()), Some(code));
        }
        assert_eq!(XaErrorCode::from_code(102), Some(XaErrorCode::RbOther));
        assert_eq!(XaErrorCode::from_code(0), None);
    }

    #[test]
    fn test_classification() {
        assert!(XaErrorCode::RbTimeout.is_rollback());
        assert!(!XaErrorCode::HeurRb.is_rollback());
        assert!(XaErrorCode::HeurRb.is_heuristic());
        assert!(XaErrorCode::RmFail.is_transient());
        assert!(!XaErrorCode::RmErr.is_transient());
    }

    #[test]
    fn test_display() {
        let err = XaError::new(XaErrorCode::RmErr, "disk gone");
        assert_eq!(err.to_string(), "XAER_RMERR(-3): disk gone");
    }
}
