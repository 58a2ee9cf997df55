//! Signed HTTP requests against an S3-compatible endpoint.

use bytes::Bytes;
use chrono::Utc;
use reqwest::{Client, Method, Response};
use url::Url;

use unistore_common::{AddressError, Result, Scheme, SecretString};

use super::error::S3Failure;
use crate::credentials::Credential;
use crate::http::transport_error;
use crate::normalize::normalize;
use crate::sign::{self, SigningKey, AWS_S3, EMPTY_PAYLOAD_SHA256, UNSIGNED_PAYLOAD};

/// Where requests for one call are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    protocol: String,
    /// Host with optional port.
    host: String,
    region: String,
    path_style: bool,
}

impl Endpoint {
    /// Parse an endpoint URL such as `https://minio.local:9000`.
    pub fn parse(raw: &str, region: &str, path_style: bool) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|e| AddressError::InvalidPath(format!("invalid endpoint '{}': {}", raw, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| AddressError::InvalidPath(format!("endpoint '{}' has no host", raw)))?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(Self {
            protocol: url.scheme().to_string(),
            host,
            region: region.to_string(),
            path_style,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Host serving `bucket`.
    pub fn host_for(&self, bucket: &str) -> String {
        if self.path_style {
            self.host.clone()
        } else {
            format!("{}.{}", bucket, self.host)
        }
    }

    /// URI-encoded request path for `bucket` and `key`.
    pub fn path_for(&self, bucket: &str, key: &str) -> String {
        if self.path_style {
            format!("/{}/{}", sign::encode_component(bucket), sign::encode_path(key))
        } else {
            format!("/{}", sign::encode_path(key))
        }
    }

    /// Full URL with an already canonical query string.
    pub fn url_for(&self, bucket: &str, key: &str, query: &str) -> String {
        let mut url = format!(
            "{}://{}{}",
            self.protocol,
            self.host_for(bucket),
            self.path_for(bucket, key)
        );
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }
        url
    }
}

/// Key material copied out of a credential, owned by long-lived writers.
pub struct SigningMaterial {
    access_key: SecretString,
    secret_key: SecretString,
    session_token: Option<SecretString>,
    region: String,
}

impl SigningMaterial {
    pub fn from_credential(credential: &Credential, region: &str) -> Result<Self> {
        Ok(Self {
            access_key: SecretString::new(credential.require("access_key")?),
            secret_key: SecretString::new(credential.require("secret_key")?),
            session_token: credential.field("session_token").map(SecretString::new),
            region: region.to_string(),
        })
    }

    pub fn key(&self) -> SigningKey<'_> {
        SigningKey {
            access_key: self.access_key.expose(),
            secret_key: self.secret_key.expose(),
            region: &self.region,
            session_token: self.session_token.as_ref().map(SecretString::expose),
        }
    }
}

/// One request before signing.
#[derive(Debug, Clone)]
pub struct S3Request {
    method: Method,
    bucket: String,
    key: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl S3Request {
    pub fn new(method: Method, bucket: &str, key: &str) -> Self {
        Self {
            method,
            bucket: bucket.to_string(),
            key: key.to_string(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    /// Add a header. Names are lowercased and signed.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }
}

/// Thin signing HTTP client shared by the adapter and its writers.
#[derive(Debug, Clone)]
pub struct S3Client {
    http: Client,
    scheme: Scheme,
}

impl S3Client {
    pub fn new(http: Client, scheme: Scheme) -> Self {
        Self { http, scheme }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Sign and send a request; non-success statuses become normalized errors.
    pub async fn send(
        &self,
        endpoint: &Endpoint,
        material: &SigningMaterial,
        request: S3Request,
        operation: &str,
    ) -> Result<Response> {
        let response = self.send_raw(endpoint, material, request, operation).await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let raw = response.text().await.unwrap_or_default();
        Err(normalize(
            self.scheme,
            operation,
            S3Failure::parse(status.as_u16(), &raw),
        ))
    }

    /// Sign and send a request, returning any response the server gives.
    pub async fn send_raw(
        &self,
        endpoint: &Endpoint,
        material: &SigningMaterial,
        request: S3Request,
        operation: &str,
    ) -> Result<Response> {
        let now = Utc::now();
        let host = endpoint.host_for(&request.bucket);
        let path = endpoint.path_for(&request.bucket, &request.key);
        let payload_hash = match &request.body {
            Some(body) if body.len() <= SIGNED_BODY_LIMIT => sign::payload_sha256(body),
            Some(_) => UNSIGNED_PAYLOAD.to_string(),
            None => EMPTY_PAYLOAD_SHA256.to_string(),
        };

        let mut headers = request.headers.clone();
        headers.push(("host".to_string(), host));
        headers.push(("x-amz-date".to_string(), sign::long_date(now)));
        headers.push(("x-amz-content-sha256".to_string(), payload_hash.clone()));
        if let Some(token) = material.key().session_token {
            headers.push(("x-amz-security-token".to_string(), token.to_string()));
        }

        let to_sign = sign::RequestToSign {
            method: request.method.as_str(),
            path: &path,
            query: request.query.clone(),
            headers: headers.clone(),
            payload_hash: &payload_hash,
        };
        let authorization = sign::authorization_header(&AWS_S3, &material.key(), &to_sign, now);

        let url = endpoint.url_for(
            &request.bucket,
            &request.key,
            &sign::canonical_query(&request.query),
        );

        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .header(reqwest::header::AUTHORIZATION, authorization);
        for (name, value) in headers.iter().filter(|(name, _)| name != "host") {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        tracing::debug!(
            scheme = %self.scheme,
            method = %request.method,
            bucket = %request.bucket,
            key = %request.key,
            operation,
            "Sending S3 request"
        );

        builder
            .send()
            .await
            .map_err(|e| transport_error(self.scheme, operation, e))
    }
}

/// Bodies up to this size are hashed into the signature; larger ones are sent unsigned.
const SIGNED_BODY_LIMIT: usize = 64 * 1024;
