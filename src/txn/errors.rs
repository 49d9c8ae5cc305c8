//! Transaction errors
//!
//! Error codes:
//! - XACOORD_TX_NOT_ACTIVE (ERROR)
//! - XACOORD_TX_NO_TRANSACTION (ERROR)
//! - XACOORD_TX_NESTED_NOT_SUPPORTED (ERROR)
//! - XACOORD_TX_ROLLED_BACK (ERROR)
//! - XACOORD_TX_HEURISTIC_MIXED (ERROR)
//! - XACOORD_TX_HEURISTIC_ROLLBACK (ERROR)
//! - XACOORD_TX_HEURISTIC_HAZARD (ERROR)
//! - XACOORD_TX_HALTED (FATAL)
//! - XACOORD_TX_OBJECT_STORE (ERROR)
//! - XACOORD_TX_ENLISTMENT (ERROR)
//! - XACOORD_TX_INVALID_CONFIG (ERROR)
//! - XACOORD_TX_NOT_FOUND (ERROR)

use std::fmt;

use crate::crash_point::Halted;
use crate::objectstore::ObjectStoreError;
use crate::observability::Severity;
use crate::xa::{XaError, XaErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxErrorCode {
    /// Operation not allowed in the transaction's current status
    NotActive,
    /// No transaction is associated with the calling thread
    NoTransaction,
    /// The calling thread already has a transaction
    NestedNotSupported,
    /// The transaction was rolled back instead of committed
    RolledBack,
    /// Some participants committed and some rolled back
    HeuristicMixed,
    /// Every participant rolled back heuristically
    HeuristicRollback,
    /// The outcome of some participants is unknown
    HeuristicHazard,
    /// A halt point fired; the coordinator is frozen
    Halted,
    /// The recovery record could not be written or read
    ObjectStore,
    /// A resource could not be enlisted
    Enlistment,
    /// Rejected configuration value
    InvalidConfig,
    /// No transaction with the given xid
    NotFound,
}

impl TxErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            TxErrorCode::NotActive => "XACOORD_TX_NOT_ACTIVE",
            TxErrorCode::NoTransaction => "XACOORD_TX_NO_TRANSACTION",
            TxErrorCode::NestedNotSupported => "XACOORD_TX_NESTED_NOT_SUPPORTED",
            TxErrorCode::RolledBack => "XACOORD_TX_ROLLED_BACK",
            TxErrorCode::HeuristicMixed => "XACOORD_TX_HEURISTIC_MIXED",
            TxErrorCode::HeuristicRollback => "XACOORD_TX_HEURISTIC_ROLLBACK",
            TxErrorCode::HeuristicHazard => "XACOORD_TX_HEURISTIC_HAZARD",
            TxErrorCode::Halted => "XACOORD_TX_HALTED",
            TxErrorCode::ObjectStore => "XACOORD_TX_OBJECT_STORE",
            TxErrorCode::Enlistment => "XACOORD_TX_ENLISTMENT",
            TxErrorCode::InvalidConfig => "XACOORD_TX_INVALID_CONFIG",
            TxErrorCode::NotFound => "XACOORD_TX_NOT_FOUND",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            TxErrorCode::Halted => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    pub fn is_heuristic(&self) -> bool {
        matches!(
            self,
            TxErrorCode::HeuristicMixed | TxErrorCode::HeuristicRollback | TxErrorCode::HeuristicHazard
        )
    }

    /// XA code reported to a parent coordinator for a subordinate failure
    pub fn xa_code(&self) -> XaErrorCode {
        match self {
            TxErrorCode::RolledBack => XaErrorCode::RbRollback,
            TxErrorCode::HeuristicMixed => XaErrorCode::HeurMix,
            TxErrorCode::HeuristicRollback => XaErrorCode::HeurRb,
            TxErrorCode::HeuristicHazard => XaErrorCode::HeurHaz,
            TxErrorCode::NotActive => XaErrorCode::Proto,
            TxErrorCode::NotFound => XaErrorCode::Nota,
            TxErrorCode::Halted => XaErrorCode::RmFail,
            _ => XaErrorCode::RmErr,
        }
    }
}

impl fmt::Display for TxErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone)]
pub struct TxError {
    code: TxErrorCode,
    message: String,
}

impl TxError {
    pub fn new(code: TxErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_active(status: impl fmt::Display) -> Self {
        Self::new(
            TxErrorCode::NotActive,
            format!("transaction is {}, not active", status),
        )
    }

    pub fn no_transaction() -> Self {
        Self::new(
            TxErrorCode::NoTransaction,
            "no transaction associated with the calling thread",
        )
    }

    pub fn nested() -> Self {
        Self::new(
            TxErrorCode::NestedNotSupported,
            "calling thread is already associated with a transaction",
        )
    }

    pub fn rolled_back(reason: impl Into<String>) -> Self {
        Self::new(TxErrorCode::RolledBack, reason)
    }

    pub fn heuristic(code: TxErrorCode, xid: impl fmt::Display) -> Self {
        let what = match code {
            TxErrorCode::HeuristicMixed => "some participants committed and some rolled back",
            TxErrorCode::HeuristicRollback => "participants rolled back heuristically",
            _ => "participant outcome unknown",
        };
        Self::new(code, format!("transaction {}: {}", xid, what))
    }

    pub fn object_store(err: &ObjectStoreError) -> Self {
        Self::new(TxErrorCode::ObjectStore, err.to_string())
    }

    pub fn enlistment(reason: impl Into<String>) -> Self {
        Self::new(TxErrorCode::Enlistment, reason)
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::new(TxErrorCode::InvalidConfig, reason)
    }

    pub fn not_found(xid: impl fmt::Display) -> Self {
        Self::new(TxErrorCode::NotFound, format!("no transaction {}", xid))
    }

    pub fn code(&self) -> TxErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn to_xa_error(&self) -> XaError {
        XaError::new(self.code.xa_code(), self.to_string())
    }
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code, self.message)
    }
}

impl std::error::Error for TxError {}

impl From<Halted> for TxError {
    fn from(halted: Halted) -> Self {
        Self::new(TxErrorCode::Halted, halted.to_string())
    }
}

pub type TxResult<T> = Result<T, TxError>;
