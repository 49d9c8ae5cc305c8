//! Host registration failures
//!
//! A secondary host that fails to register with the domain controller gets
//! a one-byte code and a message. Wire form: `[code: u8][len: u16 BE][utf8]`.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationErrorCode {
    Unknown,
    HostAlreadyExists,
    MasterIsAdminOnly,
    HostIsNotMaster,
}

impl RegistrationErrorCode {
    pub fn code(&self) -> u8 {
        match self {
            RegistrationErrorCode::Unknown => 1,
            RegistrationErrorCode::HostAlreadyExists => 2,
            RegistrationErrorCode::MasterIsAdminOnly => 3,
            RegistrationErrorCode::HostIsNotMaster => 4,
        }
    }

    /// Unrecognised codes read as `Unknown`
    pub fn from_code(code: u8) -> Self {
        match code {
            2 => RegistrationErrorCode::HostAlreadyExists,
            3 => RegistrationErrorCode::MasterIsAdminOnly,
            4 => RegistrationErrorCode::HostIsNotMaster,
            _ => RegistrationErrorCode::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RegistrationErrorCode::Unknown => "UNKNOWN",
            RegistrationErrorCode::HostAlreadyExists => "HOST_ALREADY_EXISTS",
            RegistrationErrorCode::MasterIsAdminOnly => "MASTER_IS_ADMIN_ONLY",
            RegistrationErrorCode::HostIsNotMaster => "HOST_IS_NOT_MASTER",
        }
    }
}

impl fmt::Display for RegistrationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct RegistrationError {
    pub code: RegistrationErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated registration error: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("registration error message is not UTF-8")]
    InvalidUtf8,
}

impl RegistrationError {
    pub fn new(code: RegistrationErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn host_already_exists(host: &str) -> Self {
        Self::new(
            RegistrationErrorCode::HostAlreadyExists,
            format!("there is already a registered host named '{}'", host),
        )
    }

    /// Messages longer than 65535 bytes are cut at a char boundary
    pub fn encode(&self) -> Vec<u8> {
        let mut end = self.message.len().min(u16::MAX as usize);
        while !self.message.is_char_boundary(end) {
            end -= 1;
        }
        let message = &self.message.as_bytes()[..end];

        let mut out = Vec::with_capacity(3 + message.len());
        out.push(self.code.code());
        out.extend_from_slice(&(message.len() as u16).to_be_bytes());
        out.extend_from_slice(message);
        out
    }

    /// Decode one error; returns it and the bytes consumed
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), DecodeError> {
        if bytes.len() < 3 {
            return Err(DecodeError::Truncated {
                needed: 3,
                available: bytes.len(),
            });
        }
        let len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
        let end = 3 + len;
        if bytes.len() < end {
            return Err(DecodeError::Truncated {
                needed: end,
                available: bytes.len(),
            });
        }
        let message = std::str::from_utf8(&bytes[3..end]).map_err(|_| DecodeError::InvalidUtf8)?;
        Ok((
            Self::new(RegistrationErrorCode::from_code(bytes[0]), message),
            end,
        ))
    }
}
