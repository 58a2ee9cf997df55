//! HTTP plumbing shared by the S3 and GCS adapters.

use futures::StreamExt;
use reqwest::Client;
use std::fmt;
use std::time::Duration;

use unistore_common::{Error, Result, Scheme};

use crate::adapter::ByteStream;
use crate::normalize::{normalize, ErrorClass, NativeError};

const USER_AGENT: &str = concat!("unistore/", env!("CARGO_PKG_VERSION"));

/// Build the pooled HTTP client used by one adapter.
///
/// Only connection setup and individual socket reads are bounded. A body
/// may take as long as it needs; overall deadlines come from the caller's
/// transfer options.
///
/// # Errors
/// - `Unavailable` if the TLS backend cannot be initialized
pub fn build_client(
    scheme: Scheme,
    connect_timeout: Duration,
    read_timeout: Duration,
    max_connections: usize,
) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .pool_max_idle_per_host(max_connections)
        .build()
        .map_err(|e| normalize(scheme, "init", TransportFailure(e)))
}

/// Failure below the HTTP status layer (DNS, connect, TLS, body read).
pub struct TransportFailure(pub reqwest::Error);

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl NativeError for TransportFailure {
    fn classify(&self) -> Option<ErrorClass> {
        if self.0.is_timeout() {
            Some(ErrorClass::Timeout)
        } else if self.0.is_connect() || self.0.is_request() || self.0.is_body() {
            Some(ErrorClass::Unavailable)
        } else {
            None
        }
    }
}

/// Shorthand for normalizing a transport error.
pub fn transport_error(scheme: Scheme, operation: &str, err: reqwest::Error) -> Error {
    normalize(scheme, operation, TransportFailure(err))
}

/// Stream a response body, normalizing read failures.
pub fn body_stream(scheme: Scheme, response: reqwest::Response) -> ByteStream {
    let stream = response
        .bytes_stream()
        .map(move |chunk| chunk.map_err(|e| transport_error(scheme, "get", e)));
    Box::pin(stream)
}

/// Header value as a string, if present and valid.
pub fn header_str<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}
