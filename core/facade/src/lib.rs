//! Unified storage facade.
//!
//! [`Storage`] is the single entry point: it resolves the address, resolves
//! credentials for the scheme, picks the adapter, checks that the adapter
//! offers the operation and delegates to the transfer engine.
//!
//! Storage is stateless apart from its configuration, cheap to clone and
//! safe to share between tasks. Concurrent writers to one address follow the
//! provider's semantics: the last completed write wins.

pub mod config;

pub use config::{ConfigError, StorageConfig};

use bytes::Bytes;
use futures::StreamExt;
use std::fmt;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use unistore_common::{
    AddressResolver, ByteRange, ListPage, ObjectDescriptor, PresignMethod, PresignedUrl,
    ResourceAddress, Result, Scheme,
};
use unistore_storage::normalize::io_error;
use unistore_storage::{
    create_default_registry, stream_from_chunks, AdapterRegistry, ByteStream, Capability,
    Credential, CredentialResolver, EnvSource, ProcessEnv, RegistryError, StorageAdapter,
};
use unistore_transfer::{TransferEngine, TransferOptions};

/// Data handed to a write.
pub struct Payload {
    data: ByteStream,
    size: Option<u64>,
}

impl Payload {
    /// Stream of unknown or declared size.
    pub fn new(data: ByteStream, size: Option<u64>) -> Self {
        Self { data, size }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let size = bytes.len() as u64;
        Self::new(stream_from_chunks(vec![bytes]), Some(size))
    }

    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// Stream a local file, declaring its current size.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| io_error(Scheme::Local, "read", e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| io_error(Scheme::Local, "read", e))?
            .len();
        let stream = ReaderStream::new(file)
            .map(|chunk| chunk.map_err(|e| io_error(Scheme::Local, "read", e)));
        Ok(Self::new(Box::pin(stream), Some(size)))
    }

    /// Declared size, if known.
    pub fn size(&self) -> Option<u64> {
        self.size
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload").field("size", &self.size).finish()
    }
}

/// Operation accepted by [`Storage::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Get { range: Option<ByteRange> },
    /// Write the payload; a missing payload writes an empty object.
    Put,
    List {
        page_token: Option<String>,
        page_size: Option<usize>,
    },
    Delete,
    Stat,
    Presign {
        method: PresignMethod,
        expires_in: Duration,
    },
    /// Copy the addressed object to `to`.
    Copy { to: String },
}

/// Result of [`Storage::execute`], one variant per operation kind.
pub enum Output {
    Stream(ByteStream),
    Object(ObjectDescriptor),
    Page(ListPage),
    /// Whether an object was removed.
    Deleted(bool),
    Presigned(PresignedUrl),
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Stream(_) => f.write_str("Stream(..)"),
            Output::Object(descriptor) => f.debug_tuple("Object").field(descriptor).finish(),
            Output::Page(page) => f.debug_tuple("Page").field(page).finish(),
            Output::Deleted(deleted) => f.debug_tuple("Deleted").field(deleted).finish(),
            Output::Presigned(url) => f.debug_tuple("Presigned").field(url).finish(),
        }
    }
}

/// Resolved inputs of one call.
struct Target {
    address: ResourceAddress,
    credential: Credential,
    adapter: Arc<dyn StorageAdapter>,
}

struct Inner<E> {
    registry: AdapterRegistry,
    resolver: AddressResolver,
    credentials: CredentialResolver<E>,
    engine: TransferEngine,
    list_page_size: usize,
}

/// Provider-agnostic object storage.
pub struct Storage<E: EnvSource = ProcessEnv> {
    inner: Arc<Inner<E>>,
}

impl<E: EnvSource> Clone for Storage<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Storage<ProcessEnv> {
    /// Storage over the default adapters, reading credentials from the
    /// process environment.
    ///
    /// # Errors
    /// - An adapter cannot be created from `config.adapters`
    pub fn new(config: StorageConfig) -> std::result::Result<Self, RegistryError> {
        let registry = create_default_registry(&config.adapters)?;
        Ok(Self::with_registry(registry, config))
    }

    /// Storage over a custom registry.
    pub fn with_registry(registry: AdapterRegistry, config: StorageConfig) -> Self {
        Self::with_env(registry, ProcessEnv, config)
    }
}

impl<E: EnvSource> Storage<E> {
    /// Storage over a custom registry and variable source.
    pub fn with_env(registry: AdapterRegistry, env: E, config: StorageConfig) -> Self {
        let resolver = registry.resolver();
        Self {
            inner: Arc::new(Inner {
                registry,
                resolver,
                credentials: CredentialResolver::new(env),
                engine: TransferEngine::new(config.transfer),
                list_page_size: config.list_page_size.max(1),
            }),
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.inner.registry
    }

    pub fn engine(&self) -> &TransferEngine {
        &self.inner.engine
    }

    /// Parse a unified identifier against the registered schemes.
    pub fn resolve(&self, uri: &str) -> Result<ResourceAddress> {
        Ok(self.inner.resolver.resolve(uri)?)
    }

    /// Address, then credentials, then adapter and capability.
    fn prepare(&self, uri: &str, capability: Capability) -> Result<Target> {
        let address = self.resolve(uri)?;
        self.target(address, capability)
    }

    fn target(&self, address: ResourceAddress, capability: Capability) -> Result<Target> {
        let credential = self.inner.credentials.resolve(address.scheme())?;
        let adapter = self.inner.registry.get(address.scheme())?;
        adapter.capabilities().require(capability, address.scheme())?;
        Ok(Target {
            address,
            credential,
            adapter,
        })
    }

    /// Run any operation by value.
    pub async fn execute(
        &self,
        uri: &str,
        operation: Operation,
        payload: Option<Payload>,
    ) -> Result<Output> {
        self.execute_with(uri, operation, payload, TransferOptions::new())
            .await
    }

    /// [`execute`](Self::execute) with cancellation and deadline.
    pub async fn execute_with(
        &self,
        uri: &str,
        operation: Operation,
        payload: Option<Payload>,
        options: TransferOptions,
    ) -> Result<Output> {
        match operation {
            Operation::Get { range } => self.get_with(uri, range, options).await.map(Output::Stream),
            Operation::Put => {
                let payload = payload.unwrap_or_else(Payload::empty);
                self.put_with(uri, payload, options).await.map(Output::Object)
            }
            Operation::List {
                page_token,
                page_size,
            } => self
                .list_with(uri, page_token.as_deref(), page_size, options)
                .await
                .map(Output::Page),
            Operation::Delete => self.delete_with(uri, options).await.map(Output::Deleted),
            Operation::Stat => self.stat_with(uri, options).await.map(Output::Object),
            Operation::Presign { method, expires_in } => self
                .presign_with(uri, method, expires_in, options)
                .await
                .map(Output::Presigned),
            Operation::Copy { to } => self.copy_with(uri, &to, options).await.map(Output::Object),
        }
    }

    /// Stream a whole object.
    pub async fn get(&self, uri: &str) -> Result<ByteStream> {
        self.get_with(uri, None, TransferOptions::new()).await
    }

    /// Stream part of an object.
    pub async fn get_range(&self, uri: &str, range: ByteRange) -> Result<ByteStream> {
        self.get_with(uri, Some(range), TransferOptions::new()).await
    }

    /// # Errors
    /// - `Unsupported` if a range is requested from an adapter without ranged reads
    /// - `NotFound` if the object does not exist
    pub async fn get_with(
        &self,
        uri: &str,
        range: Option<ByteRange>,
        options: TransferOptions,
    ) -> Result<ByteStream> {
        let target = self.prepare(uri, Capability::Get)?;
        if range.is_some() {
            target
                .adapter
                .capabilities()
                .require(Capability::RangeRead, target.address.scheme())?;
        }
        debug!(address = %target.address, ?range, "get");
        self.inner
            .engine
            .download(target.adapter, target.address, range, target.credential, options)
            .await
    }

    pub async fn put(&self, uri: &str, payload: Payload) -> Result<ObjectDescriptor> {
        self.put_with(uri, payload, TransferOptions::new()).await
    }

    /// Write an object, replacing any existing one.
    ///
    /// # Errors
    /// - `LengthRequired` if the provider needs a size and the payload has none
    /// - `IntegrityMismatch` if the provider's checksum or size disagrees
    pub async fn put_with(
        &self,
        uri: &str,
        payload: Payload,
        options: TransferOptions,
    ) -> Result<ObjectDescriptor> {
        let target = self.prepare(uri, Capability::Put)?;
        let report = self
            .inner
            .engine
            .upload(
                target.adapter.as_ref(),
                &target.address,
                payload.data,
                payload.size,
                &target.credential,
                &options,
            )
            .await?;
        info!(
            address = %target.address,
            bytes = report.handle.bytes_transferred(),
            "put"
        );
        Ok(report.descriptor)
    }

    /// First page of a listing, or the page after `page_token`.
    pub async fn list(&self, uri: &str, page_token: Option<&str>) -> Result<ListPage> {
        self.list_with(uri, page_token, None, TransferOptions::new())
            .await
    }

    pub async fn list_with(
        &self,
        uri: &str,
        page_token: Option<&str>,
        page_size: Option<usize>,
        options: TransferOptions,
    ) -> Result<ListPage> {
        let target = self.prepare(uri, Capability::List)?;
        let page_size = page_size.unwrap_or(self.inner.list_page_size).max(1);
        self.inner
            .engine
            .run("list", &options, || {
                target
                    .adapter
                    .list(&target.address, page_token, page_size, &target.credential)
            })
            .await
    }

    /// Every object under a prefix, following page tokens.
    pub async fn list_all(&self, uri: &str) -> Result<Vec<ObjectDescriptor>> {
        let mut items = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .list_with(uri, token.as_deref(), None, TransferOptions::new())
                .await?;
            items.extend(page.items);
            match page.next_page_token {
                Some(next) if token.as_deref() != Some(next.as_str()) => token = Some(next),
                _ => return Ok(items),
            }
        }
    }

    /// Delete an object. Returns `false` when it did not exist.
    pub async fn delete(&self, uri: &str) -> Result<bool> {
        self.delete_with(uri, TransferOptions::new()).await
    }

    pub async fn delete_with(&self, uri: &str, options: TransferOptions) -> Result<bool> {
        let target = self.prepare(uri, Capability::Delete)?;
        let result = self
            .inner
            .engine
            .run("delete", &options, || {
                target.adapter.delete(&target.address, &target.credential)
            })
            .await;
        match result {
            Ok(()) => {
                info!(address = %target.address, "delete");
                Ok(true)
            }
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub async fn stat(&self, uri: &str) -> Result<ObjectDescriptor> {
        self.stat_with(uri, TransferOptions::new()).await
    }

    pub async fn stat_with(&self, uri: &str, options: TransferOptions) -> Result<ObjectDescriptor> {
        let target = self.prepare(uri, Capability::Stat)?;
        self.inner
            .engine
            .run("stat", &options, || {
                target.adapter.stat(&target.address, &target.credential)
            })
            .await
    }

    /// Time-limited URL for downloading or uploading an object.
    pub async fn presign(
        &self,
        uri: &str,
        method: PresignMethod,
        expires_in: Duration,
    ) -> Result<PresignedUrl> {
        self.presign_with(uri, method, expires_in, TransferOptions::new())
            .await
    }

    pub async fn presign_with(
        &self,
        uri: &str,
        method: PresignMethod,
        expires_in: Duration,
        options: TransferOptions,
    ) -> Result<PresignedUrl> {
        let target = self.prepare(uri, Capability::Presign)?;
        self.inner
            .engine
            .run("presign", &options, || {
                target
                    .adapter
                    .presign(&target.address, method, expires_in, &target.credential)
            })
            .await
    }

    /// Copy `from` to `to`.
    pub async fn copy(&self, from: &str, to: &str) -> Result<ObjectDescriptor> {
        self.copy_with(from, to, TransferOptions::new()).await
    }

    /// Server-side copy when both addresses share an adapter that supports it;
    /// otherwise the bytes stream through the engine.
    pub async fn copy_with(
        &self,
        from: &str,
        to: &str,
        options: TransferOptions,
    ) -> Result<ObjectDescriptor> {
        let source_address = self.resolve(from)?;
        let destination_address = self.resolve(to)?;

        if source_address.scheme() == destination_address.scheme() {
            let adapter = self.inner.registry.get(source_address.scheme())?;
            if adapter.capabilities().copy {
                let target = self.target(source_address, Capability::Copy)?;
                let descriptor = self
                    .inner
                    .engine
                    .run("copy", &options, || {
                        target.adapter.copy(
                            &target.address,
                            &destination_address,
                            &target.credential,
                        )
                    })
                    .await?;
                info!(from = %target.address, to = %destination_address, "server-side copy");
                return Ok(descriptor);
            }
        }

        let source = self.target(source_address, Capability::Get)?;
        let destination = self.target(destination_address, Capability::Put)?;

        let size = self
            .inner
            .engine
            .run("stat", &options, || {
                source.adapter.stat(&source.address, &source.credential)
            })
            .await?
            .size;

        debug!(from = %source.address, to = %destination.address, "streamed copy");
        // Both ends share one adapter and its connection slots.
        let same_adapter = source.address.scheme() == destination.address.scheme();
        let stream = self
            .inner
            .engine
            .download(
                source.adapter,
                source.address,
                None,
                source.credential,
                options.clone(),
            )
            .await?;

        let stream = if same_adapter {
            spool(stream).await?
        } else {
            stream
        };

        let report = self
            .inner
            .engine
            .upload(
                destination.adapter.as_ref(),
                &destination.address,
                stream,
                size,
                &destination.credential,
                &options,
            )
            .await?;
        Ok(report.descriptor)
    }
}

/// Drain a stream into an anonymous temp file and stream it back.
///
/// The source stream is dropped before this returns.
async fn spool(mut stream: ByteStream) -> Result<ByteStream> {
    let file = tempfile::tempfile().map_err(|e| io_error(Scheme::Local, "spool", e))?;
    let mut file = tokio::fs::File::from_std(file);
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?)
            .await
            .map_err(|e| io_error(Scheme::Local, "spool", e))?;
    }
    drop(stream);
    file.flush()
        .await
        .map_err(|e| io_error(Scheme::Local, "spool", e))?;
    file.seek(SeekFrom::Start(0))
        .await
        .map_err(|e| io_error(Scheme::Local, "spool", e))?;

    let stream = ReaderStream::new(file)
        .map(|chunk| chunk.map_err(|e| io_error(Scheme::Local, "spool", e)));
    Ok(Box::pin(stream))
}
