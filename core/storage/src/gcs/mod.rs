//! Google Cloud Storage adapter over the JSON API.
//!
//! Requests authenticate with an OAuth2 bearer token (`GCS_ACCESS_TOKEN`).
//! Writes use resumable upload sessions, which need the total size up front.
//! Presigned URLs are signed with HMAC keys when the credential carries them.

mod error;

pub use error::GcsFailure;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

use unistore_common::{
    AddressError, ByteRange, Checksum, Error, ListPage, ObjectDescriptor, OperationError,
    PresignMethod, PresignedUrl, ResourceAddress, Result, Scheme, SecretString,
};

use crate::adapter::{listed_address, ByteStream, Capabilities, ObjectWriter, StorageAdapter};
use crate::credentials::Credential;
use crate::http::{body_stream, build_client, header_str, transport_error};
use crate::normalize::normalize;
use crate::sign::{self, SigningKey, GOOG_STORAGE};

/// Non-final resumable chunks must be a multiple of this size.
pub const CHUNK_ALIGNMENT: usize = 256 * 1024;

const MAX_PRESIGN_SECS: u64 = 7 * 24 * 60 * 60;

const HMAC_REGION: &str = "auto";

/// GCS adapter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcsConfig {
    pub endpoint: String,
    /// Limit on establishing a connection.
    pub connect_timeout_secs: u64,
    /// Limit on a single socket read; streamed bodies are not capped overall.
    #[serde(alias = "timeout_secs")]
    pub read_timeout_secs: u64,
    pub max_connections: usize,
}

impl Default for GcsConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://storage.googleapis.com".to_string(),
            connect_timeout_secs: 10,
            read_timeout_secs: 60,
            max_connections: 16,
        }
    }
}

/// Object resource as returned by the JSON API.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GcsObject {
    name: String,
    /// Decimal string.
    size: String,
    /// Base64 MD5, absent for composite objects.
    md5_hash: Option<String>,
    etag: Option<String>,
    updated: Option<String>,
    content_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ObjectList {
    items: Vec<GcsObject>,
    next_page_token: Option<String>,
}

fn md5_hex(md5_base64: &str) -> Option<String> {
    base64::engine::general_purpose::STANDARD
        .decode(md5_base64)
        .ok()
        .filter(|digest| digest.len() == 16)
        .map(hex::encode)
}

fn describe(address: ResourceAddress, object: GcsObject) -> ObjectDescriptor {
    let mut descriptor = ObjectDescriptor::new(address);
    descriptor.size = object.size.parse().ok();
    descriptor.checksum = object
        .md5_hash
        .as_deref()
        .and_then(md5_hex)
        .map(|digest| Checksum::Md5 { digest });
    descriptor.etag = object.etag;
    descriptor.last_modified = object
        .updated
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc));
    descriptor.content_type = object.content_type;
    descriptor
}

fn bearer(credential: &Credential) -> Result<String> {
    Ok(format!("Bearer {}", credential.require("access_token")?))
}

/// Send a request; non-success statuses become normalized errors.
async fn send(request: RequestBuilder, operation: &str) -> Result<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(Scheme::Gcs, operation, e))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let raw = response.text().await.unwrap_or_default();
    Err(normalize(
        Scheme::Gcs,
        operation,
        GcsFailure::parse(status.as_u16(), &raw),
    ))
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response, operation: &str) -> Result<T> {
    let body = response
        .bytes()
        .await
        .map_err(|e| transport_error(Scheme::Gcs, operation, e))?;
    serde_json::from_slice(&body)
        .map_err(|e| Error::unknown(format!("invalid {} response: {}", operation, e)))
}

/// Google Cloud Storage adapter.
pub struct GcsAdapter {
    config: GcsConfig,
    http: Client,
    permits: Arc<Semaphore>,
}

impl GcsAdapter {
    pub fn new(config: GcsConfig) -> Result<Self> {
        let max_connections = config.max_connections.max(1);
        let http = build_client(
            Scheme::Gcs,
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.read_timeout_secs),
            max_connections,
        )?;

        Ok(Self {
            http,
            permits: Arc::new(Semaphore::new(max_connections)),
            config,
        })
    }

    fn base(&self) -> &str {
        self.config.endpoint.trim_end_matches('/')
    }

    fn bucket_url(&self, bucket: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o",
            self.base(),
            sign::encode_component(bucket)
        )
    }

    fn object_url(&self, address: &ResourceAddress) -> String {
        format!(
            "{}/{}",
            self.bucket_url(address.bucket()),
            sign::encode_component(address.key())
        )
    }

    async fn permit(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::unknown("connection pool closed"))
    }
}

#[async_trait]
impl StorageAdapter for GcsAdapter {
    fn scheme(&self) -> Scheme {
        Scheme::Gcs
    }

    fn name(&self) -> &str {
        "gcs"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            presign: true,
            copy: true,
            requires_content_length: true,
            chunk_alignment: Some(CHUNK_ALIGNMENT),
            max_connections: Some(self.config.max_connections.max(1)),
            ..Capabilities::basic()
        }
    }

    async fn get(
        &self,
        address: &ResourceAddress,
        range: Option<ByteRange>,
        credential: &Credential,
    ) -> Result<ByteStream> {
        if range.is_some_and(|r| r.is_empty()) {
            return Ok(Box::pin(futures::stream::empty()));
        }

        let permit = self.permit().await?;
        let mut request = self
            .http
            .get(self.object_url(address))
            .query(&[("alt", "media")])
            .header(header::AUTHORIZATION, bearer(credential)?);
        if let Some(range) = range.filter(|r| r.start > 0 || r.end.is_some()) {
            request = request.header(header::RANGE, range.to_http_header());
        }

        let response = send(request, "get").await?;
        let stream = body_stream(Scheme::Gcs, response).map(move |chunk| {
            let _held = &permit;
            chunk
        });
        Ok(Box::pin(stream))
    }

    async fn open_writer(
        &self,
        address: &ResourceAddress,
        expected_size: Option<u64>,
        credential: &Credential,
    ) -> Result<Box<dyn ObjectWriter>> {
        let total = expected_size.ok_or(OperationError::LengthRequired(Scheme::Gcs))?;
        let token = SecretString::new(bearer(credential)?);
        let permit = self.permit().await?;

        Ok(Box::new(ResumableWriter {
            http: self.http.clone(),
            init_url: format!(
                "{}/upload/storage/v1/b/{}/o",
                self.base(),
                sign::encode_component(address.bucket())
            ),
            token,
            address: address.clone(),
            total,
            received: 0,
            session_uri: None,
            completed: None,
            _permit: permit,
        }))
    }

    async fn list(
        &self,
        prefix: &ResourceAddress,
        page_token: Option<&str>,
        page_size: usize,
        credential: &Credential,
    ) -> Result<ListPage> {
        let _permit = self.permit().await?;

        let mut query = vec![("maxResults", page_size.clamp(1, 1000).to_string())];
        if !prefix.key().is_empty() {
            query.push(("prefix", prefix.key().to_string()));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let request = self
            .http
            .get(self.bucket_url(prefix.bucket()))
            .query(&query)
            .header(header::AUTHORIZATION, bearer(credential)?);
        let listing: ObjectList = read_json(send(request, "list").await?, "list").await?;

        let items: Vec<ObjectDescriptor> = listing
            .items
            .into_iter()
            .filter_map(|object| {
                let address = listed_address(prefix, &object.name)?;
                Some(describe(address, object))
            })
            .collect();

        Ok(ListPage {
            items,
            next_page_token: listing.next_page_token,
        })
    }

    async fn delete(&self, address: &ResourceAddress, credential: &Credential) -> Result<()> {
        let _permit = self.permit().await?;
        let request = self
            .http
            .delete(self.object_url(address))
            .header(header::AUTHORIZATION, bearer(credential)?);
        send(request, "delete").await?;

        tracing::debug!(address = %address, "Deleted GCS object");
        Ok(())
    }

    async fn stat(
        &self,
        address: &ResourceAddress,
        credential: &Credential,
    ) -> Result<ObjectDescriptor> {
        let _permit = self.permit().await?;
        let request = self
            .http
            .get(self.object_url(address))
            .header(header::AUTHORIZATION, bearer(credential)?);
        let object: GcsObject = read_json(send(request, "stat").await?, "stat").await?;
        Ok(describe(address.clone(), object))
    }

    async fn presign(
        &self,
        address: &ResourceAddress,
        method: PresignMethod,
        expires_in: Duration,
        credential: &Credential,
    ) -> Result<PresignedUrl> {
        let key = SigningKey {
            access_key: credential.require("hmac_access_id")?,
            secret_key: credential.require("hmac_secret")?,
            region: HMAC_REGION,
            session_token: None,
        };

        let base = Url::parse(self.base()).map_err(|e| {
            AddressError::InvalidPath(format!("invalid endpoint '{}': {}", self.base(), e))
        })?;
        let host = match (base.host_str(), base.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(AddressError::InvalidPath(format!(
                    "endpoint '{}' has no host",
                    self.base()
                ))
                .into())
            }
        };

        let secs = expires_in.as_secs().clamp(1, MAX_PRESIGN_SECS);
        let now = Utc::now();
        let path = format!(
            "/{}/{}",
            sign::encode_component(address.bucket()),
            sign::encode_path(address.key())
        );
        let query = sign::presigned_query(
            &GOOG_STORAGE,
            &key,
            method.as_str(),
            &host,
            &path,
            secs,
            now,
        );

        Ok(PresignedUrl {
            url: format!("{}://{}{}?{}", base.scheme(), host, path, query),
            method,
            expires_at: now + chrono::Duration::seconds(secs as i64),
        })
    }

    async fn copy(
        &self,
        from: &ResourceAddress,
        to: &ResourceAddress,
        credential: &Credential,
    ) -> Result<ObjectDescriptor> {
        let _permit = self.permit().await?;
        let url = format!(
            "{}/copyTo/b/{}/o/{}",
            self.object_url(from),
            sign::encode_component(to.bucket()),
            sign::encode_component(to.key())
        );
        let request = self
            .http
            .post(url)
            .header(header::AUTHORIZATION, bearer(credential)?)
            .json(&serde_json::json!({}));
        let object: GcsObject = read_json(send(request, "copy").await?, "copy").await?;
        Ok(describe(to.clone(), object))
    }
}

/// Resumable upload session; one `PUT` with `Content-Range` per chunk.
struct ResumableWriter {
    http: Client,
    init_url: String,
    token: SecretString,
    address: ResourceAddress,
    total: u64,
    /// Highest byte offset sent so far.
    received: u64,
    session_uri: Option<String>,
    completed: Option<ObjectDescriptor>,
    _permit: OwnedSemaphorePermit,
}

impl ResumableWriter {
    async fn session_uri(&mut self) -> Result<String> {
        if let Some(uri) = &self.session_uri {
            return Ok(uri.clone());
        }

        let request = self
            .http
            .post(&self.init_url)
            .query(&[("uploadType", "resumable")])
            .header(header::AUTHORIZATION, self.token.expose())
            .header("X-Upload-Content-Length", self.total.to_string())
            .json(&serde_json::json!({ "name": self.address.key() }));
        let response = send(request, "put").await?;

        let uri = header_str(&response, "location")
            .ok_or_else(|| Error::unknown("resumable upload response without Location"))?
            .to_string();

        tracing::debug!(address = %self.address, total = self.total, "Started resumable upload");
        self.session_uri = Some(uri.clone());
        Ok(uri)
    }

    /// Send one range; records the object once the upload completes.
    async fn put_range(&mut self, content_range: String, body: Bytes) -> Result<()> {
        let uri = self.session_uri().await?;
        let response = self
            .http
            .put(&uri)
            .header(header::CONTENT_RANGE, content_range)
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error(Scheme::Gcs, "put", e))?;

        let status = response.status();
        if status == StatusCode::PERMANENT_REDIRECT {
            // 308 Resume Incomplete: more chunks expected.
            return Ok(());
        }
        if status == StatusCode::OK || status == StatusCode::CREATED {
            let object: GcsObject = read_json(response, "put").await?;
            self.completed = Some(describe(self.address.clone(), object));
            return Ok(());
        }

        let raw = response.text().await.unwrap_or_default();
        Err(normalize(
            Scheme::Gcs,
            "put",
            GcsFailure::parse(status.as_u16(), &raw),
        ))
    }
}

#[async_trait]
impl ObjectWriter for ResumableWriter {
    async fn write_chunk(&mut self, _index: u64, offset: u64, chunk: Bytes) -> Result<()> {
        if chunk.is_empty() || self.completed.is_some() {
            return Ok(());
        }

        let end = offset + chunk.len() as u64;
        if end > self.total {
            return Err(OperationError::IntegrityMismatch {
                expected: format!("{} bytes", self.total),
                actual: format!("at least {} bytes", end),
            }
            .into());
        }

        let content_range = format!("bytes {}-{}/{}", offset, end - 1, self.total);
        self.put_range(content_range, chunk).await?;
        self.received = self.received.max(end);
        Ok(())
    }

    async fn finish(&mut self) -> Result<ObjectDescriptor> {
        if let Some(descriptor) = &self.completed {
            return Ok(descriptor.clone());
        }

        if self.total == 0 {
            self.put_range("bytes */0".to_string(), Bytes::new()).await?;
        }

        self.completed.clone().ok_or_else(|| {
            OperationError::IntegrityMismatch {
                expected: format!("{} bytes", self.total),
                actual: format!("{} bytes", self.received),
            }
            .into()
        })
    }

    async fn abort(&mut self) -> Result<()> {
        let Some(uri) = self.session_uri.take() else {
            return Ok(());
        };

        // GCS answers a cancelled session with 499.
        self.http
            .delete(&uri)
            .send()
            .await
            .map_err(|e| transport_error(Scheme::Gcs, "abort", e))?;
        tracing::debug!(address = %self.address, "Cancelled resumable upload");
        Ok(())
    }
}
