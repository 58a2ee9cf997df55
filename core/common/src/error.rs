//! Error taxonomy shared by every unistore component.
//!
//! Callers always receive exactly one named member of this taxonomy. The three
//! families separate configuration mistakes (address, credentials) from
//! service-side failures (operation).

use thiserror::Error;

use crate::types::Scheme;

/// Failures while parsing or normalizing a resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The scheme is unknown or has no registered adapter.
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// The identifier is malformed or escapes the bucket root.
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Failures while resolving provider credentials.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// A required field is not configured.
    #[error("Missing credential for {scheme}: set {variable}")]
    Missing {
        scheme: Scheme,
        /// Environment variable the caller should set.
        variable: String,
    },

    /// A referenced credential source could not be read or parsed.
    #[error("Unreadable credential source {source_name}: {reason}")]
    Unreadable { source_name: String, reason: String },

    /// The credential exists but is no longer valid.
    #[error("Expired credential for {scheme}")]
    Expired { scheme: Scheme },
}

/// Failures while executing an operation against a provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// The adapter does not offer this capability.
    #[error("Operation {operation} is not supported by {scheme}")]
    Unsupported { operation: String, scheme: Scheme },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The provider needs the content length up front.
    #[error("{0} requires a known content length")]
    LengthRequired(Scheme),

    /// Provider-reported checksum or size disagrees with what was sent.
    #[error("Integrity mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out")]
    Timeout,

    #[error("Rate limited by provider")]
    RateLimited,

    /// Provider temporarily unavailable (5xx, dropped connection).
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Native failure with no mapping; the provider message is preserved.
    #[error("Unknown provider error: {provider_message}")]
    Unknown { provider_message: String },
}

impl OperationError {
    /// Whether the transfer engine may retry after this failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OperationError::Timeout | OperationError::RateLimited | OperationError::Unavailable(_)
        )
    }
}

/// Top-level error returned by every unistore operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Operation(#[from] OperationError),
}

impl Error {
    /// Address and credential failures are terminal for the call.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Operation(err) => err.is_transient(),
            Error::Address(_) | Error::Credential(_) => false,
        }
    }

    /// Shorthand for `OperationError::Unsupported`.
    pub fn unsupported(operation: impl Into<String>, scheme: Scheme) -> Self {
        Error::Operation(OperationError::Unsupported {
            operation: operation.into(),
            scheme,
        })
    }

    /// Shorthand for `OperationError::NotFound`.
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::Operation(OperationError::NotFound(what.into()))
    }

    /// Shorthand for `OperationError::Unknown`.
    pub fn unknown(provider_message: impl Into<String>) -> Self {
        Error::Operation(OperationError::Unknown {
            provider_message: provider_message.into(),
        })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Operation(OperationError::NotFound(_)))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(OperationError::Timeout.is_transient());
        assert!(OperationError::RateLimited.is_transient());
        assert!(OperationError::Unavailable("503".to_string()).is_transient());
        assert!(!OperationError::NotFound("k".to_string()).is_transient());
        assert!(!OperationError::Cancelled.is_transient());
        assert!(!OperationError::PermissionDenied("k".to_string()).is_transient());
    }

    #[test]
    fn test_configuration_errors_are_terminal() {
        let err: Error = AddressError::InvalidPath("..".to_string()).into();
        assert!(!err.is_transient());

        let err: Error = CredentialError::Expired { scheme: Scheme::Gcs }.into();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_display_keeps_specific_member() {
        let err: Error = CredentialError::Missing {
            scheme: Scheme::S3,
            variable: "S3_ACCESS_KEY".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "Missing credential for s3: set S3_ACCESS_KEY");

        let err = Error::unknown("teapot");
        assert_eq!(err.to_string(), "Unknown provider error: teapot");
    }
}
