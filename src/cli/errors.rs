//! CLI error types
//!
//! Every CLI error ends the command with a non-zero exit code.

use std::fmt;
use std::io;

use crate::recovery::RecoveryError;
use crate::txn::TxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file missing, unreadable or invalid
    ConfigError,
    /// stdout or filesystem failure
    IoError,
    AlreadyInitialized,
    NotInitialized,
    /// Transaction manager or recovery failed to start
    BootFailed,
    /// A transaction or recovery operation failed
    OperationFailed,
    InvalidArgument,
}

impl CliErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "XACOORD_CLI_CONFIG_ERROR",
            Self::IoError => "XACOORD_CLI_IO_ERROR",
            Self::AlreadyInitialized => "XACOORD_CLI_ALREADY_INITIALIZED",
            Self::NotInitialized => "XACOORD_CLI_NOT_INITIALIZED",
            Self::BootFailed => "XACOORD_CLI_BOOT_FAILED",
            Self::OperationFailed => "XACOORD_CLI_OPERATION_FAILED",
            Self::InvalidArgument => "XACOORD_CLI_INVALID_ARGUMENT",
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn already_initialized() -> Self {
        Self::new(
            CliErrorCode::AlreadyInitialized,
            "Object store already initialized",
        )
    }

    pub fn not_initialized() -> Self {
        Self::new(
            CliErrorCode::NotInitialized,
            "Object store not initialized. Run 'xacoord init' first.",
        )
    }

    pub fn boot_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::BootFailed, msg)
    }

    pub fn operation_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::OperationFailed, msg)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::InvalidArgument, msg)
    }

    pub fn code(&self) -> CliErrorCode {
        self.code
    }

    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<TxError> for CliError {
    fn from(e: TxError) -> Self {
        Self::operation_failed(e.to_string())
    }
}

impl From<RecoveryError> for CliError {
    fn from(e: RecoveryError) -> Self {
        Self::operation_failed(e.to_string())
    }
}

pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code() {
        let err = CliError::not_initialized();
        assert_eq!(err.code(), CliErrorCode::NotInitialized);
        assert!(err.to_string().starts_with("XACOORD_CLI_NOT_INITIALIZED: "));
    }

    #[test]
    fn test_tx_error_becomes_operation_failed() {
        let err: CliError = TxError::no_transaction().into();
        assert_eq!(err.code_str(), "XACOORD_CLI_OPERATION_FAILED");
    }
}
