//! Storage adapter trait definition.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tracing::warn;

use unistore_common::{
    ByteRange, Error, ListPage, ObjectDescriptor, OperationError, PresignMethod, PresignedUrl,
    ResourceAddress, Result, Scheme,
};

use crate::credentials::Credential;

/// Byte stream type for upload/download operations.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Default chunk size for streamed writes (5 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Default number of items per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Individual operations an adapter may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Get,
    Put,
    List,
    Delete,
    Stat,
    Presign,
    Copy,
    RangeRead,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Get => "get",
            Capability::Put => "put",
            Capability::List => "list",
            Capability::Delete => "delete",
            Capability::Stat => "stat",
            Capability::Presign => "presign",
            Capability::Copy => "copy",
            Capability::RangeRead => "range read",
        }
    }
}

/// Capability declaration of an adapter.
///
/// The facade consults this before dispatching so unsupported operations
/// fail fast instead of surfacing as provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub get: bool,
    pub put: bool,
    pub list: bool,
    pub delete: bool,
    pub stat: bool,
    pub presign: bool,
    pub copy: bool,
    pub range_read: bool,
    /// Writes must declare their total size up front.
    pub requires_content_length: bool,
    /// Smallest chunk the provider accepts (except the last one).
    pub min_chunk_size: Option<usize>,
    /// Chunks must be a multiple of this size (except the last one).
    pub chunk_alignment: Option<usize>,
    /// Upper bound on parallel connections held by the adapter.
    pub max_connections: Option<usize>,
}

impl Capabilities {
    /// Get, put, list, delete, stat and ranged reads.
    pub const fn basic() -> Self {
        Self {
            get: true,
            put: true,
            list: true,
            delete: true,
            stat: true,
            presign: false,
            copy: false,
            range_read: true,
            requires_content_length: false,
            min_chunk_size: None,
            chunk_alignment: None,
            max_connections: None,
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Get => self.get,
            Capability::Put => self.put,
            Capability::List => self.list,
            Capability::Delete => self.delete,
            Capability::Stat => self.stat,
            Capability::Presign => self.presign,
            Capability::Copy => self.copy,
            Capability::RangeRead => self.range_read,
        }
    }

    /// Fail with `Unsupported` unless the capability is offered.
    pub fn require(&self, capability: Capability, scheme: Scheme) -> Result<()> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(Error::unsupported(capability.as_str(), scheme))
        }
    }

    /// Chunk size honoring the provider's minimum and alignment.
    pub fn effective_chunk_size(&self, requested: usize) -> usize {
        let mut size = requested.max(1);
        if let Some(min) = self.min_chunk_size {
            size = size.max(min);
        }
        if let Some(align) = self.chunk_alignment.filter(|a| *a > 0) {
            size = size.div_ceil(align) * align;
        }
        size
    }
}

/// Streaming write session opened by [`StorageAdapter::open_writer`].
///
/// `write_chunk` must be idempotent for a given `index` so the transfer
/// engine can resend a chunk after a transient failure.
#[async_trait]
pub trait ObjectWriter: Send {
    /// Write chunk `index` (0-based) starting at byte `offset`.
    async fn write_chunk(&mut self, index: u64, offset: u64, chunk: Bytes) -> Result<()>;

    /// Commit the object and return the provider's view of it.
    async fn finish(&mut self) -> Result<ObjectDescriptor>;

    /// Discard everything written so far, where the provider allows it.
    async fn abort(&mut self) -> Result<()>;
}

/// Storage adapter trait for different backends.
///
/// Credentials are passed into every call; adapters never read them from the
/// environment themselves.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Scheme this adapter serves.
    fn scheme(&self) -> Scheme;

    /// Adapter name for logs (e.g. "s3", "memory").
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Open a stream over the object's bytes, optionally limited to a range.
    ///
    /// # Errors
    /// - `NotFound` if the object does not exist
    /// - Provider failures mapped through the adapter's error table
    async fn get(
        &self,
        address: &ResourceAddress,
        range: Option<ByteRange>,
        credential: &Credential,
    ) -> Result<ByteStream>;

    /// Open a streaming write session.
    ///
    /// # Errors
    /// - `LengthRequired` if the provider needs `expected_size` and it is `None`
    async fn open_writer(
        &self,
        address: &ResourceAddress,
        expected_size: Option<u64>,
        credential: &Credential,
    ) -> Result<Box<dyn ObjectWriter>>;

    /// List objects under a prefix, one page at a time.
    async fn list(
        &self,
        prefix: &ResourceAddress,
        page_token: Option<&str>,
        page_size: usize,
        credential: &Credential,
    ) -> Result<ListPage>;

    /// Delete an object.
    ///
    /// # Errors
    /// - `NotFound` if the object does not exist
    async fn delete(&self, address: &ResourceAddress, credential: &Credential) -> Result<()>;

    /// Get metadata for an object.
    ///
    /// # Errors
    /// - `NotFound` if the object does not exist
    async fn stat(
        &self,
        address: &ResourceAddress,
        credential: &Credential,
    ) -> Result<ObjectDescriptor>;

    /// Upload a whole stream through [`open_writer`](Self::open_writer) without retries.
    async fn put(
        &self,
        address: &ResourceAddress,
        data: ByteStream,
        expected_size: Option<u64>,
        credential: &Credential,
    ) -> Result<ObjectDescriptor> {
        let chunk_size = self.capabilities().effective_chunk_size(DEFAULT_CHUNK_SIZE);
        let mut writer = self.open_writer(address, expected_size, credential).await?;
        let mut chunks = Rechunker::new(data, chunk_size);
        let mut offset = 0u64;
        let mut index = 0u64;

        while let Some(chunk) = chunks.next_chunk().await {
            let written = match chunk {
                Ok(chunk) => {
                    let len = chunk.len() as u64;
                    writer.write_chunk(index, offset, chunk).await.map(|_| len)
                }
                Err(err) => Err(err),
            };
            match written {
                Ok(len) => {
                    offset += len;
                    index += 1;
                }
                Err(err) => {
                    if let Err(abort_err) = writer.abort().await {
                        warn!(address = %address, "Failed to abort write after {}: {}", err, abort_err);
                    }
                    return Err(err);
                }
            }
        }

        writer.finish().await
    }

    /// Issue a time-limited URL for the object.
    async fn presign(
        &self,
        _address: &ResourceAddress,
        _method: PresignMethod,
        _expires_in: Duration,
        _credential: &Credential,
    ) -> Result<PresignedUrl> {
        Err(Error::unsupported(Capability::Presign.as_str(), self.scheme()))
    }

    /// Copy an object within this adapter without moving bytes through the caller.
    async fn copy(
        &self,
        _from: &ResourceAddress,
        _to: &ResourceAddress,
        _credential: &Credential,
    ) -> Result<ObjectDescriptor> {
        Err(Error::unsupported(Capability::Copy.as_str(), self.scheme()))
    }
}

/// Regroups an arbitrary byte stream into fixed-size chunks.
///
/// Every chunk except the last has exactly `chunk_size` bytes. Bytes already
/// buffered survive a dropped `next_chunk` future.
pub struct Rechunker {
    source: ByteStream,
    buffer: BytesMut,
    chunk_size: usize,
    exhausted: bool,
}

impl Rechunker {
    pub fn new(source: ByteStream, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            source,
            buffer: BytesMut::with_capacity(chunk_size),
            chunk_size,
            exhausted: false,
        }
    }

    /// Next chunk, or `None` once the source is drained.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        while !self.exhausted && self.buffer.len() < self.chunk_size {
            match self.source.next().await {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                Some(Err(err)) => {
                    self.exhausted = true;
                    return Some(Err(err));
                }
                None => self.exhausted = true,
            }
        }

        if self.buffer.is_empty() {
            return None;
        }
        let take = self.buffer.len().min(self.chunk_size);
        Some(Ok(self.buffer.split_to(take).freeze()))
    }
}

/// Cut one page out of a complete listing.
///
/// Items are ordered by key; the token is the last key of the previous page,
/// so a page can be re-requested at any time.
pub fn paginate(
    mut items: Vec<ObjectDescriptor>,
    page_token: Option<&str>,
    page_size: usize,
) -> ListPage {
    items.sort_by(|a, b| a.address.key().cmp(b.address.key()));
    items.dedup_by(|a, b| a.address.key() == b.address.key());

    let start = match page_token {
        Some(token) => items.partition_point(|item| item.address.key() <= token),
        None => 0,
    };
    let end = start.saturating_add(page_size.max(1)).min(items.len());

    let next_page_token = if end < items.len() && end > start {
        Some(items[end - 1].address.key().to_string())
    } else {
        None
    };

    ListPage {
        items: items.drain(start..end).collect(),
        next_page_token,
    }
}

/// Collect a byte stream into memory. Intended for small objects and tests.
pub async fn collect_bytes(mut stream: ByteStream) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    while let Some(chunk) = stream.next().await {
        data.extend_from_slice(&chunk?);
    }
    Ok(data)
}

/// Stream yielding the given chunks.
pub fn stream_from_chunks(chunks: Vec<Bytes>) -> ByteStream {
    Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))
}

/// Address of a key reported by a provider listing.
///
/// Keys that do not survive normalization (`..` segments, empty segments)
/// cannot be addressed again, so they are skipped with a warning.
pub fn listed_address(prefix: &ResourceAddress, key: &str) -> Option<ResourceAddress> {
    match prefix.with_key(key) {
        Ok(address) if address.key() == key => Some(address),
        Ok(address) => {
            warn!(
                key,
                normalized = address.key(),
                "Skipping listed key that does not round-trip"
            );
            None
        }
        Err(err) => {
            warn!(key, "Skipping listed key: {}", err);
            None
        }
    }
}

/// Map a missing object into `NotFound` with the address in the message.
pub fn not_found(address: &ResourceAddress) -> Error {
    Error::Operation(OperationError::NotFound(address.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(key: &str) -> ObjectDescriptor {
        ObjectDescriptor::new(ResourceAddress::new(Scheme::S3, "b", key).unwrap())
    }

    #[test]
    fn test_effective_chunk_size() {
        let mut caps = Capabilities::basic();
        assert_eq!(caps.effective_chunk_size(10), 10);

        caps.min_chunk_size = Some(64);
        assert_eq!(caps.effective_chunk_size(10), 64);

        caps.min_chunk_size = None;
        caps.chunk_alignment = Some(256);
        assert_eq!(caps.effective_chunk_size(300), 512);
        assert_eq!(caps.effective_chunk_size(0), 256);
    }

    #[test]
    fn test_require_capability() {
        let caps = Capabilities::basic();
        assert!(caps.require(Capability::Get, Scheme::Ftp).is_ok());
        let err = caps.require(Capability::Presign, Scheme::Ftp).unwrap_err();
        assert!(matches!(
            err,
            Error::Operation(OperationError::Unsupported { scheme: Scheme::Ftp, .. })
        ));
    }

    #[test]
    fn test_paginate_walks_every_item_once() {
        let items: Vec<_> = ["c", "a", "e", "b", "d"].iter().map(|k| descriptor(k)).collect();

        let first = paginate(items.clone(), None, 2);
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.next_page_token.as_deref(), Some("b"));

        let second = paginate(items.clone(), first.next_page_token.as_deref(), 2);
        assert_eq!(second.next_page_token.as_deref(), Some("d"));

        let third = paginate(items, second.next_page_token.as_deref(), 2);
        assert_eq!(third.items.len(), 1);
        assert_eq!(third.items[0].address.key(), "e");
        assert!(third.next_page_token.is_none());
    }

    #[test]
    fn test_paginate_empty() {
        let page = paginate(Vec::new(), None, 10);
        assert!(page.items.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn test_listed_address_skips_keys_that_do_not_round_trip() {
        let prefix = ResourceAddress::new(Scheme::S3, "b", "logs/").unwrap();

        let address = listed_address(&prefix, "logs/2024/01.txt").unwrap();
        assert_eq!(address.key(), "logs/2024/01.txt");
        assert_eq!(listed_address(&prefix, "dir/").unwrap().key(), "dir/");

        assert!(listed_address(&prefix, "../x").is_none());
        assert!(listed_address(&prefix, "a//b").is_none());
        assert!(listed_address(&prefix, "a/./b").is_none());
    }

    #[tokio::test]
    async fn test_rechunker_regroups() {
        let source = stream_from_chunks(vec![
            Bytes::from_static(b"abc"),
            Bytes::from_static(b"defgh"),
            Bytes::from_static(b"i"),
        ]);
        let mut chunks = Rechunker::new(source, 4);

        let mut out = Vec::new();
        while let Some(chunk) = chunks.next_chunk().await {
            out.push(chunk.unwrap());
        }

        assert_eq!(
            out,
            vec![
                Bytes::from_static(b"abcd"),
                Bytes::from_static(b"efgh"),
                Bytes::from_static(b"i")
            ]
        );
    }
}
