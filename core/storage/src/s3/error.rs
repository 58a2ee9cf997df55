//! S3 error responses and their classification.

use serde::Deserialize;
use std::fmt;

use crate::normalize::{lookup, ErrorClass, NativeError};

/// Error body returned by S3 and S3-compatible services.
#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct S3ErrorBody {
    pub code: String,
    pub message: String,
    pub request_id: String,
}

/// Error codes: <https://docs.aws.amazon.com/AmazonS3/latest/API/ErrorResponses.html>
const CODE_TABLE: &[(&str, ErrorClass)] = &[
    ("NoSuchKey", ErrorClass::NotFound),
    ("NoSuchBucket", ErrorClass::NotFound),
    ("NoSuchUpload", ErrorClass::NotFound),
    ("AccessDenied", ErrorClass::PermissionDenied),
    ("InvalidAccessKeyId", ErrorClass::PermissionDenied),
    ("SignatureDoesNotMatch", ErrorClass::PermissionDenied),
    ("AccountProblem", ErrorClass::PermissionDenied),
    ("ExpiredToken", ErrorClass::CredentialExpired),
    ("TokenRefreshRequired", ErrorClass::CredentialExpired),
    ("MissingContentLength", ErrorClass::LengthRequired),
    ("NotImplemented", ErrorClass::Unsupported),
    ("SlowDown", ErrorClass::RateLimited),
    ("RequestTimeout", ErrorClass::Timeout),
    ("InternalError", ErrorClass::Unavailable),
    ("ServiceUnavailable", ErrorClass::Unavailable),
    ("OperationAborted", ErrorClass::Unavailable),
];

/// Fallback when the body carries no recognizable code (HEAD, proxies).
const STATUS_TABLE: &[(&u16, ErrorClass)] = &[
    (&401, ErrorClass::PermissionDenied),
    (&403, ErrorClass::PermissionDenied),
    (&404, ErrorClass::NotFound),
    (&408, ErrorClass::Timeout),
    (&411, ErrorClass::LengthRequired),
    (&429, ErrorClass::RateLimited),
    // R2 answers 499 on client disconnects.
    (&499, ErrorClass::Unavailable),
    (&500, ErrorClass::Unavailable),
    (&502, ErrorClass::Unavailable),
    (&503, ErrorClass::Unavailable),
    (&504, ErrorClass::Timeout),
];

/// A failed S3 response.
#[derive(Debug)]
pub struct S3Failure {
    pub status: u16,
    pub body: Option<S3ErrorBody>,
    pub raw: String,
}

impl S3Failure {
    /// Build from a status and the raw response body.
    pub fn parse(status: u16, raw: &str) -> Self {
        let body = quick_xml::de::from_str::<S3ErrorBody>(raw)
            .ok()
            .filter(|body| !body.code.is_empty());
        Self {
            status,
            body,
            raw: raw.to_string(),
        }
    }
}

impl fmt::Display for S3Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            Some(body) if body.message.is_empty() => write!(f, "{} {}", self.status, body.code),
            Some(body) => write!(f, "{} {}: {}", self.status, body.code, body.message),
            None if self.raw.is_empty() => write!(f, "HTTP {}", self.status),
            None => write!(f, "HTTP {}: {}", self.status, self.raw),
        }
    }
}

impl NativeError for S3Failure {
    fn classify(&self) -> Option<ErrorClass> {
        self.body
            .as_ref()
            .and_then(|body| lookup(CODE_TABLE, body.code.as_str()))
            .or_else(|| lookup(STATUS_TABLE, &self.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use unistore_common::{CredentialError, Error, OperationError, Scheme};

    #[test]
    fn test_parse_error_body() {
        let raw = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
  <Code>NoSuchKey</Code>
  <Message>The resource you requested does not exist</Message>
  <Resource>/mybucket/myfoto.jpg</Resource>
  <RequestId>4442587FB7D0A2F9</RequestId>
</Error>"#;

        let failure = S3Failure::parse(404, raw);
        let body = failure.body.as_ref().unwrap();
        assert_eq!(body.code, "NoSuchKey");
        assert_eq!(body.request_id, "4442587FB7D0A2F9");
        assert_eq!(failure.classify(), Some(ErrorClass::NotFound));
    }

    #[test]
    fn test_code_wins_over_status() {
        let raw = "<Error><Code>SlowDown</Code><Message>Reduce your rate</Message></Error>";
        assert_eq!(
            S3Failure::parse(503, raw).classify(),
            Some(ErrorClass::RateLimited)
        );

        let raw = "<Error><Code>ExpiredToken</Code></Error>";
        let err = normalize(Scheme::S3, "get", S3Failure::parse(400, raw));
        assert_eq!(err, Error::Credential(CredentialError::Expired { scheme: Scheme::S3 }));
    }

    #[test]
    fn test_status_fallback() {
        assert_eq!(S3Failure::parse(404, "").classify(), Some(ErrorClass::NotFound));
        assert_eq!(S3Failure::parse(499, "").classify(), Some(ErrorClass::Unavailable));
        assert_eq!(S3Failure::parse(418, "").classify(), None);
    }

    #[test]
    fn test_unmapped_keeps_provider_message() {
        let raw = "<Error><Code>InvalidBucketState</Code><Message>Versioning</Message></Error>";
        let err = normalize(Scheme::R2, "put", S3Failure::parse(409, raw));
        match err {
            Error::Operation(OperationError::Unknown { provider_message }) => {
                assert!(provider_message.contains("InvalidBucketState"));
                assert!(provider_message.contains("Versioning"));
            }
            other => panic!("expected Unknown, got {:?}", other),
        }
    }
}
