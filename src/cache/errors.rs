//! Cache errors

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("invalid cache configuration: {0}")]
    InvalidConfiguration(String),

    #[error("cache configuration '{0}' is already defined")]
    AlreadyDefined(String),

    #[error("no cache configuration named '{0}'")]
    Undefined(String),

    #[error("no template configuration named '{0}'")]
    UnknownTemplate(String),

    #[error("cache container '{0}' has no default cache")]
    NoDefaultCache(String),

    #[error("cache '{name}' failed to {action}: {reason}")]
    Lifecycle {
        name: String,
        action: &'static str,
        reason: String,
    },

    #[error("blocking task did not complete: {0}")]
    Blocking(String),
}

pub type CacheResult<T> = Result<T, CacheError>;
