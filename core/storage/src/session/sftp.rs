//! SFTP error vocabulary.
//!
//! Status codes follow draft-ietf-secsh-filexfer (`SSH_FX_*`).

use std::fmt;

use super::ProtocolError;
use crate::normalize::{lookup, ErrorClass, NativeError};

pub const SSH_FX_EOF: u32 = 1;
pub const SSH_FX_NO_SUCH_FILE: u32 = 2;
pub const SSH_FX_PERMISSION_DENIED: u32 = 3;
pub const SSH_FX_FAILURE: u32 = 4;
pub const SSH_FX_NO_CONNECTION: u32 = 6;
pub const SSH_FX_CONNECTION_LOST: u32 = 7;
pub const SSH_FX_OP_UNSUPPORTED: u32 = 8;
pub const SSH_FX_NO_SUCH_PATH: u32 = 10;
pub const SSH_FX_WRITE_PROTECT: u32 = 12;

const STATUS_TABLE: &[(&u32, ErrorClass)] = &[
    (&SSH_FX_NO_SUCH_FILE, ErrorClass::NotFound),
    (&SSH_FX_NO_SUCH_PATH, ErrorClass::NotFound),
    (&SSH_FX_PERMISSION_DENIED, ErrorClass::PermissionDenied),
    (&SSH_FX_WRITE_PROTECT, ErrorClass::PermissionDenied),
    (&SSH_FX_OP_UNSUPPORTED, ErrorClass::Unsupported),
    (&SSH_FX_NO_CONNECTION, ErrorClass::Unavailable),
    (&SSH_FX_CONNECTION_LOST, ErrorClass::Unavailable),
];

/// Failure reported by an SFTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SftpError {
    /// `SSH_FXP_STATUS` reply from the server.
    Status { code: u32, message: String },
    /// SSH transport closed or timed out.
    Disconnected(String),
    /// SSH authentication rejected.
    AuthFailed(String),
}

impl fmt::Display for SftpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SftpError::Status { code, message } => write!(f, "status {}: {}", code, message),
            SftpError::Disconnected(message) => write!(f, "disconnected: {}", message),
            SftpError::AuthFailed(message) => write!(f, "authentication failed: {}", message),
        }
    }
}

impl NativeError for SftpError {
    fn classify(&self) -> Option<ErrorClass> {
        match self {
            SftpError::Status { code, .. } => lookup(STATUS_TABLE, code),
            SftpError::Disconnected(_) => Some(ErrorClass::Unavailable),
            SftpError::AuthFailed(_) => Some(ErrorClass::PermissionDenied),
        }
    }
}

impl ProtocolError for SftpError {
    fn no_such_file(path: &str) -> Self {
        SftpError::Status {
            code: SSH_FX_NO_SUCH_FILE,
            message: format!("{}: no such file", path),
        }
    }

    fn access_denied(message: &str) -> Self {
        SftpError::AuthFailed(message.to_string())
    }
}
