//! GCS JSON API error responses and their classification.

use serde::Deserialize;
use std::fmt;

use crate::normalize::{lookup, ErrorClass, NativeError};

#[derive(Default, Debug, Deserialize)]
#[serde(default)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default)]
struct ErrorDetail {
    message: String,
    errors: Vec<ErrorItem>,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default)]
struct ErrorItem {
    reason: String,
}

/// Reasons: <https://cloud.google.com/storage/docs/json_api/v1/status-codes>
const REASON_TABLE: &[(&str, ErrorClass)] = &[
    ("notFound", ErrorClass::NotFound),
    ("forbidden", ErrorClass::PermissionDenied),
    ("insufficientPermissions", ErrorClass::PermissionDenied),
    ("accountDisabled", ErrorClass::PermissionDenied),
    ("authError", ErrorClass::CredentialExpired),
    ("notImplemented", ErrorClass::Unsupported),
    ("rateLimitExceeded", ErrorClass::RateLimited),
    ("userRateLimitExceeded", ErrorClass::RateLimited),
    ("backendError", ErrorClass::Unavailable),
    ("internalError", ErrorClass::Unavailable),
];

const STATUS_TABLE: &[(&u16, ErrorClass)] = &[
    (&401, ErrorClass::CredentialExpired),
    (&403, ErrorClass::PermissionDenied),
    (&404, ErrorClass::NotFound),
    (&408, ErrorClass::Timeout),
    (&411, ErrorClass::LengthRequired),
    (&429, ErrorClass::RateLimited),
    (&500, ErrorClass::Unavailable),
    (&502, ErrorClass::Unavailable),
    (&503, ErrorClass::Unavailable),
    (&504, ErrorClass::Timeout),
];

/// A failed GCS response.
#[derive(Debug)]
pub struct GcsFailure {
    pub status: u16,
    pub reason: Option<String>,
    pub message: String,
}

impl GcsFailure {
    /// Build from a status and the raw response body.
    pub fn parse(status: u16, raw: &str) -> Self {
        match serde_json::from_str::<ErrorEnvelope>(raw) {
            Ok(envelope) => Self {
                status,
                reason: envelope
                    .error
                    .errors
                    .into_iter()
                    .map(|item| item.reason)
                    .find(|reason| !reason.is_empty()),
                message: envelope.error.message,
            },
            Err(_) => Self {
                status,
                reason: None,
                message: raw.to_string(),
            },
        }
    }
}

impl fmt::Display for GcsFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{} {}: {}", self.status, reason, self.message),
            None if self.message.is_empty() => write!(f, "HTTP {}", self.status),
            None => write!(f, "HTTP {}: {}", self.status, self.message),
        }
    }
}

impl NativeError for GcsFailure {
    fn classify(&self) -> Option<ErrorClass> {
        // 401 always means the bearer token is no longer accepted.
        if self.status == 401 {
            return Some(ErrorClass::CredentialExpired);
        }
        self.reason
            .as_deref()
            .and_then(|reason| lookup(REASON_TABLE, reason))
            .or_else(|| lookup(STATUS_TABLE, &self.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_error() {
        let raw = r#"{
  "error": {
    "code": 429,
    "message": "The rate of change requests to the object is too high.",
    "errors": [
      { "domain": "usageLimits", "reason": "rateLimitExceeded", "message": "slow down" }
    ]
  }
}"#;
        let failure = GcsFailure::parse(429, raw);
        assert_eq!(failure.reason.as_deref(), Some("rateLimitExceeded"));
        assert_eq!(failure.classify(), Some(ErrorClass::RateLimited));
        assert!(failure.to_string().contains("too high"));
    }

    #[test]
    fn test_unauthorized_is_expired() {
        let failure = GcsFailure::parse(401, r#"{"error":{"code":401,"message":"Invalid Credentials","errors":[{"reason":"authError"}]}}"#);
        assert_eq!(failure.classify(), Some(ErrorClass::CredentialExpired));
    }

    #[test]
    fn test_non_json_body_falls_back_to_status() {
        let failure = GcsFailure::parse(503, "<html>unavailable</html>");
        assert!(failure.reason.is_none());
        assert_eq!(failure.classify(), Some(ErrorClass::Unavailable));
        assert_eq!(GcsFailure::parse(409, "").classify(), None);
    }
}
