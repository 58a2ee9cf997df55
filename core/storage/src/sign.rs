//! Version 4 request signing shared by S3-compatible stores and GCS HMAC keys.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Characters left unescaped by SigV4: `A-Z a-z 0-9 - _ . ~`.
const URI_STRICT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Same as [`URI_STRICT`] but keeps `/` for object paths.
const URI_PATH: &AsciiSet = &URI_STRICT.remove(b'/');

/// SHA-256 of an empty body.
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Provider-specific constants of the V4 algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningFlavor {
    pub algorithm: &'static str,
    pub key_prefix: &'static str,
    pub param_prefix: &'static str,
    pub terminator: &'static str,
    pub service: &'static str,
}

/// AWS Signature Version 4 for S3 and S3-compatible stores.
pub const AWS_S3: SigningFlavor = SigningFlavor {
    algorithm: "AWS4-HMAC-SHA256",
    key_prefix: "AWS4",
    param_prefix: "X-Amz",
    terminator: "aws4_request",
    service: "s3",
};

/// Google Cloud Storage V4 signing with HMAC keys.
pub const GOOG_STORAGE: SigningFlavor = SigningFlavor {
    algorithm: "GOOG4-HMAC-SHA256",
    key_prefix: "GOOG4",
    param_prefix: "X-Goog",
    terminator: "goog4_request",
    service: "storage",
};

/// Key material for one signature. Borrowed from a `Credential`.
#[derive(Clone, Copy)]
pub struct SigningKey<'a> {
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub region: &'a str,
    pub session_token: Option<&'a str>,
}

/// Request description fed into the canonical request.
#[derive(Debug, Clone)]
pub struct RequestToSign<'a> {
    pub method: &'a str,
    /// Already URI-encoded path (see [`encode_path`]).
    pub path: &'a str,
    /// Raw query parameters; encoded while canonicalizing.
    pub query: Vec<(String, String)>,
    /// Lowercase header names with values; must include `host`.
    pub headers: Vec<(String, String)>,
    pub payload_hash: &'a str,
}

/// Encode an object path, keeping `/` separators.
pub fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, URI_PATH).to_string()
}

/// Encode a single component, `/` included.
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, URI_STRICT).to_string()
}

/// Canonical query string: encoded pairs sorted by key, then value.
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (encode_component(k), encode_component(v)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Hex SHA-256 of a payload.
pub fn payload_sha256(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// `yyyymmddThhmmssZ` timestamp used in headers and query parameters.
pub fn long_date(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

fn short_date(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d").to_string()
}

fn hmac(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn scope(flavor: &SigningFlavor, region: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}/{}/{}/{}",
        short_date(now),
        region,
        flavor.service,
        flavor.terminator
    )
}

fn canonical_request(req: &RequestToSign<'_>) -> (String, String) {
    let mut headers: Vec<(String, String)> = req
        .headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    headers.sort();

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        req.method,
        req.path,
        canonical_query(&req.query),
        canonical_headers,
        signed_headers,
        req.payload_hash
    );
    (canonical, signed_headers)
}

/// Compute the signature for a request at `now`.
pub fn signature(
    flavor: &SigningFlavor,
    key: &SigningKey<'_>,
    req: &RequestToSign<'_>,
    now: DateTime<Utc>,
) -> (String, String) {
    let (canonical, signed_headers) = canonical_request(req);
    let scope = scope(flavor, key.region, now);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        flavor.algorithm,
        long_date(now),
        scope,
        payload_sha256(canonical.as_bytes())
    );

    let k_date = hmac(
        format!("{}{}", flavor.key_prefix, key.secret_key).as_bytes(),
        &short_date(now),
    );
    let k_region = hmac(&k_date, key.region);
    let k_service = hmac(&k_region, flavor.service);
    let k_signing = hmac(&k_service, flavor.terminator);

    (hex::encode(hmac(&k_signing, &string_to_sign)), signed_headers)
}

/// `Authorization` header value for a header-signed request.
pub fn authorization_header(
    flavor: &SigningFlavor,
    key: &SigningKey<'_>,
    req: &RequestToSign<'_>,
    now: DateTime<Utc>,
) -> String {
    let (signature, signed_headers) = signature(flavor, key, req, now);
    format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        flavor.algorithm,
        key.access_key,
        scope(flavor, key.region, now),
        signed_headers,
        signature
    )
}

/// Canonical query string of a presigned URL, signature included.
pub fn presigned_query(
    flavor: &SigningFlavor,
    key: &SigningKey<'_>,
    method: &str,
    host: &str,
    path: &str,
    expires_in_secs: u64,
    now: DateTime<Utc>,
) -> String {
    let param = |name: &str| format!("{}-{}", flavor.param_prefix, name);

    let mut query = vec![
        (param("Algorithm"), flavor.algorithm.to_string()),
        (
            param("Credential"),
            format!("{}/{}", key.access_key, scope(flavor, key.region, now)),
        ),
        (param("Date"), long_date(now)),
        (param("Expires"), expires_in_secs.to_string()),
        (param("SignedHeaders"), "host".to_string()),
    ];
    if let Some(token) = key.session_token {
        query.push((param("Security-Token"), token.to_string()));
    }

    let req = RequestToSign {
        method,
        path,
        query: query.clone(),
        headers: vec![("host".to_string(), host.to_string())],
        payload_hash: UNSIGNED_PAYLOAD,
    };
    let (signature, _) = signature(flavor, key, &req, now);
    query.push((param("Signature"), signature));

    canonical_query(&query)
}
