//! Mapping of provider-native failures into the common taxonomy.
//!
//! Every adapter owns an explicit table from its native error vocabulary
//! (status codes, error codes, `io::ErrorKind`) to an [`ErrorClass`].
//! Anything a table does not cover becomes `OperationError::Unknown` with the
//! provider message preserved.

use std::fmt::Display;

use unistore_common::{CredentialError, Error, OperationError, Scheme};

/// Taxonomy member a native error maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    PermissionDenied,
    CredentialExpired,
    LengthRequired,
    Unsupported,
    Timeout,
    RateLimited,
    Unavailable,
}

/// A provider-native error that can be classified through a table.
pub trait NativeError: Display {
    /// Taxonomy class, or `None` when the table has no entry.
    fn classify(&self) -> Option<ErrorClass>;
}

/// Look up `key` in a mapping table.
pub fn lookup<K: PartialEq + ?Sized>(table: &[(&K, ErrorClass)], key: &K) -> Option<ErrorClass> {
    table
        .iter()
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, class)| *class)
}

/// Convert a native error into the taxonomy.
///
/// `operation` and the scheme only decorate messages; the class decides the
/// member.
pub fn normalize<E: NativeError>(scheme: Scheme, operation: &str, err: E) -> Error {
    let message = err.to_string();
    let mapped: Error = match err.classify() {
        Some(ErrorClass::NotFound) => OperationError::NotFound(message).into(),
        Some(ErrorClass::PermissionDenied) => OperationError::PermissionDenied(message).into(),
        Some(ErrorClass::CredentialExpired) => CredentialError::Expired { scheme }.into(),
        Some(ErrorClass::LengthRequired) => OperationError::LengthRequired(scheme).into(),
        Some(ErrorClass::Unsupported) => OperationError::Unsupported {
            operation: operation.to_string(),
            scheme,
        }
        .into(),
        Some(ErrorClass::Timeout) => OperationError::Timeout.into(),
        Some(ErrorClass::RateLimited) => OperationError::RateLimited.into(),
        Some(ErrorClass::Unavailable) => OperationError::Unavailable(message).into(),
        None => OperationError::Unknown {
            provider_message: format!("{} {}: {}", scheme, operation, message),
        }
        .into(),
    };

    tracing::debug!(scheme = %scheme, operation, error = %mapped, "Normalized provider error");
    mapped
}

/// Local filesystem errors, classified by `io::ErrorKind`.
pub struct IoFailure(pub std::io::Error);

const IO_TABLE: &[(&std::io::ErrorKind, ErrorClass)] = &[
    (&std::io::ErrorKind::NotFound, ErrorClass::NotFound),
    (&std::io::ErrorKind::PermissionDenied, ErrorClass::PermissionDenied),
    (&std::io::ErrorKind::TimedOut, ErrorClass::Timeout),
    (&std::io::ErrorKind::Interrupted, ErrorClass::Unavailable),
    (&std::io::ErrorKind::WouldBlock, ErrorClass::Unavailable),
    (&std::io::ErrorKind::ConnectionReset, ErrorClass::Unavailable),
    (&std::io::ErrorKind::ConnectionAborted, ErrorClass::Unavailable),
    (&std::io::ErrorKind::BrokenPipe, ErrorClass::Unavailable),
    (&std::io::ErrorKind::Unsupported, ErrorClass::Unsupported),
];

impl Display for IoFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl NativeError for IoFailure {
    fn classify(&self) -> Option<ErrorClass> {
        lookup(IO_TABLE, &self.0.kind())
    }
}

/// Shorthand for normalizing an `io::Error`.
pub fn io_error(scheme: Scheme, operation: &str, err: std::io::Error) -> Error {
    normalize(scheme, operation, IoFailure(err))
}
