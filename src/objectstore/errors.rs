//! Object store errors
//!
//! Error codes:
//! - XACOORD_STORE_IO (ERROR)
//! - XACOORD_STORE_CORRUPT (FATAL)
//! - XACOORD_STORE_SERIALIZATION (ERROR)

use std::fmt;
use std::io;
use std::path::Path;

use crate::observability::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStoreErrorCode {
    /// Filesystem operation failed
    Io,
    /// A record file failed its checksum or could not be parsed
    Corrupt,
    /// A record could not be encoded
    Serialization,
}

impl ObjectStoreErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            ObjectStoreErrorCode::Io => "XACOORD_STORE_IO",
            ObjectStoreErrorCode::Corrupt => "XACOORD_STORE_CORRUPT",
            ObjectStoreErrorCode::Serialization => "XACOORD_STORE_SERIALIZATION",
        }
    }

    /// A corrupt record means the in-doubt state of a transaction is lost
    pub fn severity(&self) -> Severity {
        match self {
            ObjectStoreErrorCode::Corrupt => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for ObjectStoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug)]
pub struct ObjectStoreError {
    code: ObjectStoreErrorCode,
    message: String,
    source: Option<io::Error>,
}

impl ObjectStoreError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: ObjectStoreErrorCode::Io,
            message: context.into(),
            source: Some(source),
        }
    }

    pub fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        Self {
            code: ObjectStoreErrorCode::Corrupt,
            message: format!("record {} is corrupt: {}", path.display(), reason.into()),
            source: None,
        }
    }

    pub fn serialization(reason: impl Into<String>) -> Self {
        Self {
            code: ObjectStoreErrorCode::Serialization,
            message: reason.into(),
            source: None,
        }
    }

    pub fn code(&self) -> ObjectStoreErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ObjectStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code, self.message)?;
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ObjectStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;
