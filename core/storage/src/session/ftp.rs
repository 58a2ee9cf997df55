//! FTP error vocabulary, keyed by reply code (RFC 959).

use std::fmt;

use super::ProtocolError;
use crate::normalize::{lookup, ErrorClass, NativeError};

const REPLY_TABLE: &[(&u16, ErrorClass)] = &[
    // Service not available, closing control connection.
    (&421, ErrorClass::Unavailable),
    (&425, ErrorClass::Unavailable),
    (&426, ErrorClass::Unavailable),
    // Transient file action failures.
    (&450, ErrorClass::Unavailable),
    (&451, ErrorClass::Unavailable),
    (&452, ErrorClass::Unavailable),
    (&502, ErrorClass::Unsupported),
    (&504, ErrorClass::Unsupported),
    (&530, ErrorClass::PermissionDenied),
    (&532, ErrorClass::PermissionDenied),
    (&550, ErrorClass::NotFound),
];

/// Failure reported by an FTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FtpError {
    /// Negative reply on the control connection.
    Reply { code: u16, message: String },
    /// Control or data connection dropped.
    Disconnected(String),
    /// No reply within the client's timeout.
    TimedOut,
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtpError::Reply { code, message } => write!(f, "{} {}", code, message),
            FtpError::Disconnected(message) => write!(f, "disconnected: {}", message),
            FtpError::TimedOut => write!(f, "timed out"),
        }
    }
}

impl NativeError for FtpError {
    fn classify(&self) -> Option<ErrorClass> {
        match self {
            FtpError::Reply { code, .. } => lookup(REPLY_TABLE, code),
            FtpError::Disconnected(_) => Some(ErrorClass::Unavailable),
            FtpError::TimedOut => Some(ErrorClass::Timeout),
        }
    }
}

impl ProtocolError for FtpError {
    fn no_such_file(path: &str) -> Self {
        FtpError::Reply {
            code: 550,
            message: format!("{}: No such file or directory", path),
        }
    }

    fn access_denied(message: &str) -> Self {
        FtpError::Reply {
            code: 530,
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use unistore_common::{Error, OperationError, Scheme};

    fn reply(code: u16) -> FtpError {
        FtpError::Reply {
            code,
            message: "reply".to_string(),
        }
    }

    #[test]
    fn test_reply_table() {
        assert_eq!(reply(550).classify(), Some(ErrorClass::NotFound));
        assert_eq!(reply(530).classify(), Some(ErrorClass::PermissionDenied));
        assert_eq!(reply(421).classify(), Some(ErrorClass::Unavailable));
        assert_eq!(reply(502).classify(), Some(ErrorClass::Unsupported));
        assert_eq!(reply(553).classify(), None);
    }

    #[test]
    fn test_normalized_members() {
        assert!(normalize(Scheme::Ftp, "get", reply(426)).is_transient());
        assert!(normalize(Scheme::Ftp, "get", FtpError::TimedOut).is_transient());
        assert_eq!(
            normalize(Scheme::Ftp, "put", reply(502)),
            Error::Operation(OperationError::Unsupported {
                operation: "put".to_string(),
                scheme: Scheme::Ftp
            })
        );
    }
}
