//! Common types used throughout unistore.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::AddressError;

/// Storage backends addressable through a unified identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Local,
    S3,
    Gcs,
    Sftp,
    Ftp,
    R2,
}

impl Scheme {
    /// Every scheme, in declaration order.
    pub const ALL: [Scheme; 6] = [
        Scheme::Local,
        Scheme::S3,
        Scheme::Gcs,
        Scheme::Sftp,
        Scheme::Ftp,
        Scheme::R2,
    ];

    /// Identifier prefix, e.g. `s3` in `s3://bucket/key`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Local => "local",
            Scheme::S3 => "s3",
            Scheme::Gcs => "gcs",
            Scheme::Sftp => "sftp",
            Scheme::Ftp => "ftp",
            Scheme::R2 => "r2",
        }
    }

    /// Parse a scheme name. Matching is case-insensitive.
    pub fn parse(name: &str) -> Option<Self> {
        Scheme::ALL
            .into_iter()
            .find(|scheme| scheme.as_str().eq_ignore_ascii_case(name))
    }

    /// Prefix of the environment variables holding this scheme's credentials.
    pub fn env_prefix(&self) -> String {
        self.as_str().to_ascii_uppercase()
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized, scheme-qualified pointer to a stored object or prefix.
///
/// The key never contains empty, `.` or `..` segments. A trailing `/` is kept
/// because listing treats `dir/` and `dir` differently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceAddress {
    scheme: Scheme,
    bucket: String,
    key: String,
}

impl ResourceAddress {
    /// Build an address, normalizing the key.
    ///
    /// # Errors
    /// - `InvalidPath` if the bucket is empty, `.` or `..`, or the key escapes
    ///   the bucket root
    pub fn new(
        scheme: Scheme,
        bucket: impl Into<String>,
        key: &str,
    ) -> std::result::Result<Self, AddressError> {
        let bucket = bucket.into();
        if bucket.is_empty()
            || bucket == "."
            || bucket == ".."
            || bucket.contains('/')
            || bucket.contains('\0')
        {
            return Err(AddressError::InvalidPath(format!(
                "invalid bucket or host '{}'",
                bucket
            )));
        }
        let key = normalize_key(key)?;
        Ok(Self {
            scheme,
            bucket,
            key,
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Bucket name for object stores, host (with optional port) for sftp/ftp.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the address names a prefix rather than an object.
    pub fn is_prefix(&self) -> bool {
        self.key.is_empty() || self.key.ends_with('/')
    }

    /// Address of another key in the same bucket.
    pub fn with_key(&self, key: &str) -> std::result::Result<Self, AddressError> {
        Self::new(self.scheme, self.bucket.clone(), key)
    }

    /// Last key segment, if any.
    pub fn name(&self) -> Option<&str> {
        self.key
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
    }

    /// Key segments without separators.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.key.split('/').filter(|segment| !segment.is_empty())
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
    }
}

/// Normalize a slash-delimited key.
///
/// Collapses repeated separators, drops `.` segments and resolves `..`
/// against preceding segments.
///
/// # Errors
/// - `InvalidPath` if `..` would climb above the bucket root or the key
///   contains a NUL byte
pub fn normalize_key(raw: &str) -> std::result::Result<String, AddressError> {
    if raw.contains('\0') {
        return Err(AddressError::InvalidPath("key contains NUL byte".to_string()));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(AddressError::InvalidPath(format!(
                        "'{}' escapes the bucket root",
                        raw
                    )));
                }
            }
            other => segments.push(other),
        }
    }

    let mut key = segments.join("/");
    if !key.is_empty() && raw.ends_with('/') {
        key.push('/');
    }
    Ok(key)
}

/// Byte range for partial reads. `end` is exclusive; `None` reads to the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// Range starting at `start` and running to the end of the object.
    pub fn from_offset(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Number of bytes covered, if bounded.
    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end.saturating_sub(self.start))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Same range advanced by `delivered` bytes.
    pub fn advance(&self, delivered: u64) -> Self {
        Self {
            start: self.start + delivered,
            end: self.end,
        }
    }

    /// HTTP `Range` header value (`bytes=start-last`).
    pub fn to_http_header(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end.saturating_sub(1)),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// Provider-reported integrity value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum Checksum {
    /// Lowercase hex MD5 of the whole object.
    Md5 { digest: String },
    /// MD5 over the concatenated binary MD5s of each part, as in
    /// S3 multipart ETags (`<hex>-<parts>`).
    Md5OfParts { digest: String, parts: u32 },
}

impl Checksum {
    /// Interpret an ETag as a checksum when it has one of the MD5 forms.
    pub fn from_etag(etag: &str) -> Option<Self> {
        let etag = etag.trim().trim_matches('"');
        let is_md5 = |s: &str| s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit());

        match etag.split_once('-') {
            Some((digest, parts)) if is_md5(digest) => {
                parts.parse().ok().map(|parts| Checksum::Md5OfParts {
                    digest: digest.to_ascii_lowercase(),
                    parts,
                })
            }
            None if is_md5(etag) => Some(Checksum::Md5 {
                digest: etag.to_ascii_lowercase(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checksum::Md5 { digest } => write!(f, "md5:{}", digest),
            Checksum::Md5OfParts { digest, parts } => write!(f, "md5:{}-{}", digest, parts),
        }
    }
}

/// Metadata for a stored object, as reported by the provider.
///
/// Absent fields reflect what the provider did not report; they are never
/// filled in with guesses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectDescriptor {
    pub address: ResourceAddress,
    pub size: Option<u64>,
    pub etag: Option<String>,
    pub checksum: Option<Checksum>,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
}

impl ObjectDescriptor {
    /// Descriptor carrying only the address.
    pub fn new(address: ResourceAddress) -> Self {
        Self {
            address,
            size: None,
            etag: None,
            checksum: None,
            last_modified: None,
            content_type: None,
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ListPage {
    pub items: Vec<ObjectDescriptor>,
    /// Present when more items follow; pass it back to continue.
    pub next_page_token: Option<String>,
}

/// HTTP method a presigned URL is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PresignMethod {
    Get,
    Put,
}

impl PresignMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresignMethod::Get => "GET",
            PresignMethod::Put => "PUT",
        }
    }
}

/// A time-limited URL that grants access without further credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresignedUrl {
    pub url: String,
    pub method: PresignMethod,
    pub expires_at: DateTime<Utc>,
}

/// Secret string that zeroizes on drop and never prints its value.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the secret for the duration of a request.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_parse() {
        assert_eq!(Scheme::parse("s3"), Some(Scheme::S3));
        assert_eq!(Scheme::parse("GCS"), Some(Scheme::Gcs));
        assert_eq!(Scheme::parse("ftp2"), None);
        assert_eq!(Scheme::R2.env_prefix(), "R2");
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("a//b///c").unwrap(), "a/b/c");
        assert_eq!(normalize_key("/a/./b/").unwrap(), "a/b/");
        assert_eq!(normalize_key("a/../b").unwrap(), "b");
        assert_eq!(normalize_key("").unwrap(), "");
        assert!(normalize_key("../etc").is_err());
        assert!(normalize_key("a/../../etc").is_err());
        assert!(normalize_key("a\0b").is_err());
    }

    #[test]
    fn test_address_accessors() {
        let addr = ResourceAddress::new(Scheme::S3, "bucket", "dir/file.txt").unwrap();
        assert_eq!(addr.name(), Some("file.txt"));
        assert!(!addr.is_prefix());
        assert_eq!(addr.to_string(), "s3://bucket/dir/file.txt");
        assert_eq!(addr.segments().collect::<Vec<_>>(), vec!["dir", "file.txt"]);

        let prefix = addr.with_key("dir/").unwrap();
        assert!(prefix.is_prefix());
        assert_eq!(prefix.name(), Some("dir"));
    }

    #[test]
    fn test_address_rejects_bad_bucket() {
        assert!(ResourceAddress::new(Scheme::S3, "", "key").is_err());
        assert!(ResourceAddress::new(Scheme::S3, "a/b", "key").is_err());
    }

    #[test]
    fn test_byte_range_header() {
        assert_eq!(ByteRange::new(0, Some(10)).to_http_header(), "bytes=0-9");
        assert_eq!(ByteRange::from_offset(5).to_http_header(), "bytes=5-");
        assert_eq!(ByteRange::new(5, Some(10)).advance(3), ByteRange::new(8, Some(10)));
        assert_eq!(ByteRange::new(4, Some(4)).len(), Some(0));
    }

    #[test]
    fn test_checksum_from_etag() {
        assert_eq!(
            Checksum::from_etag("\"9e107d9d372bb6826bd81d3542a419d6\""),
            Some(Checksum::Md5 {
                digest: "9e107d9d372bb6826bd81d3542a419d6".to_string()
            })
        );
        assert_eq!(
            Checksum::from_etag("\"3858f62230ac3c915f300c664312c11f-9\""),
            Some(Checksum::Md5OfParts {
                digest: "3858f62230ac3c915f300c664312c11f".to_string(),
                parts: 9
            })
        );
        assert_eq!(Checksum::from_etag("W/\"abc\""), None);
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = SecretString::new("hunter2");
        assert_eq!(format!("{:?}", secret), "SecretString([REDACTED])");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_descriptor_serialization() {
        let addr = ResourceAddress::new(Scheme::Gcs, "bucket", "k").unwrap();
        let mut descriptor = ObjectDescriptor::new(addr);
        descriptor.size = Some(3);

        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["size"], 3);
        assert_eq!(json["address"]["scheme"], "gcs");
        assert!(json["etag"].is_null());
    }
}
