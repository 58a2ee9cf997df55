//! Session-oriented adapters (SFTP, FTP).
//!
//! These protocols expose a file system over a stateful connection rather
//! than an object API. [`SessionAdapter`] turns any [`RemoteSession`] into a
//! [`StorageAdapter`]:
//! - the number of open sessions is bounded by a semaphore; streams and
//!   writers hold their permit until dropped
//! - reads are offset reads in fixed blocks
//! - writes go to a hidden temp file that is renamed over the target on
//!   `finish` (last writer wins)
//! - listings walk directories recursively and paginate by key
//!
//! The wire client is plugged in through [`SessionConnector`]. Paths are
//! relative to the login directory and use `/` separators.
//!
//! Session adapters are not part of the default registry because each needs
//! a connector. Build one with [`SessionAdapter::sftp`] or
//! [`SessionAdapter::ftp`] and hand it to
//! [`AdapterRegistry::register`](crate::registry::AdapterRegistry::register)
//! next to the defaults. [`MemoryFileServer`] is an in-process connector for
//! either protocol.

pub mod ftp;
pub mod memory;
pub mod sftp;

pub use ftp::FtpError;
pub use memory::{MemoryFileServer, MemorySession};
pub use sftp::SftpError;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use unistore_common::{
    ByteRange, Error, ListPage, ObjectDescriptor, ResourceAddress, Result, Scheme,
};

use crate::adapter::{
    listed_address, not_found, paginate, ByteStream, Capabilities, ObjectWriter, StorageAdapter,
};
use crate::credentials::Credential;
use crate::normalize::{normalize, ErrorClass, NativeError};

const READ_BLOCK: usize = 256 * 1024;
const TEMP_SUFFIX: &str = ".part";

/// Default number of concurrent sessions per adapter.
pub const DEFAULT_MAX_SESSIONS: usize = 4;

/// File or directory reported by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Entry name for `list_dir`, full path for `stat`.
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
    pub modified: Option<DateTime<Utc>>,
}

/// One authenticated connection to a file server.
#[async_trait]
pub trait RemoteSession: Send {
    type Error: NativeError + Send + Sync + 'static;

    async fn stat(&mut self, path: &str) -> std::result::Result<RemoteEntry, Self::Error>;

    /// Direct children of a directory.
    async fn list_dir(&mut self, path: &str) -> std::result::Result<Vec<RemoteEntry>, Self::Error>;

    /// Read up to `len` bytes at `offset`. An empty result means end of file.
    async fn read_at(
        &mut self,
        path: &str,
        offset: u64,
        len: usize,
    ) -> std::result::Result<Bytes, Self::Error>;

    /// Write at `offset`, creating the file when missing.
    async fn write_at(
        &mut self,
        path: &str,
        offset: u64,
        data: &[u8],
    ) -> std::result::Result<(), Self::Error>;

    async fn create_dir_all(&mut self, path: &str) -> std::result::Result<(), Self::Error>;

    async fn rename(&mut self, from: &str, to: &str) -> std::result::Result<(), Self::Error>;

    async fn remove(&mut self, path: &str) -> std::result::Result<(), Self::Error>;
}

/// Protocol error vocabulary shared by session servers.
pub trait ProtocolError: NativeError + fmt::Debug + Send + Sync + 'static {
    /// The path does not exist.
    fn no_such_file(path: &str) -> Self;

    /// Login or access refused.
    fn access_denied(message: &str) -> Self;
}

/// Opens sessions for a host (`host` or `host:port`).
#[async_trait]
pub trait SessionConnector: Send + Sync + 'static {
    type Session: RemoteSession + 'static;

    async fn connect(
        &self,
        host: &str,
        credential: &Credential,
    ) -> std::result::Result<Self::Session, <Self::Session as RemoteSession>::Error>;
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

fn describe(address: &ResourceAddress, entry: &RemoteEntry) -> ObjectDescriptor {
    let mut descriptor = ObjectDescriptor::new(address.clone());
    descriptor.size = Some(entry.size);
    descriptor.last_modified = entry.modified;
    descriptor
}

/// Adapter over a pluggable session client.
pub struct SessionAdapter<C: SessionConnector> {
    scheme: Scheme,
    connector: Arc<C>,
    permits: Arc<Semaphore>,
    max_sessions: usize,
}

impl<C> SessionAdapter<C>
where
    C: SessionConnector,
    C::Session: RemoteSession<Error = SftpError>,
{
    /// Adapter for `sftp://` addresses.
    pub fn sftp(connector: C, max_sessions: usize) -> Self {
        Self::new(Scheme::Sftp, connector, max_sessions)
    }
}

impl<C> SessionAdapter<C>
where
    C: SessionConnector,
    C::Session: RemoteSession<Error = FtpError>,
{
    /// Adapter for `ftp://` addresses.
    pub fn ftp(connector: C, max_sessions: usize) -> Self {
        Self::new(Scheme::Ftp, connector, max_sessions)
    }
}

impl<C: SessionConnector> SessionAdapter<C> {
    fn new(scheme: Scheme, connector: C, max_sessions: usize) -> Self {
        let max_sessions = max_sessions.max(1);
        Self {
            scheme,
            connector: Arc::new(connector),
            permits: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
        }
    }

    /// Wait for a free slot, then connect.
    async fn open(
        &self,
        address: &ResourceAddress,
        credential: &Credential,
        operation: &str,
    ) -> Result<(C::Session, OwnedSemaphorePermit)> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::unknown("session pool closed"))?;

        let session = self
            .connector
            .connect(address.bucket(), credential)
            .await
            .map_err(|e| normalize(self.scheme, operation, e))?;

        tracing::debug!(scheme = %self.scheme, host = %address.bucket(), operation, "Opened session");
        Ok((session, permit))
    }

    /// Stat a path that must be a regular file.
    async fn stat_file(
        &self,
        session: &mut C::Session,
        address: &ResourceAddress,
        operation: &str,
    ) -> Result<RemoteEntry> {
        let entry = session
            .stat(address.key())
            .await
            .map_err(|e| normalize(self.scheme, operation, e))?;
        if entry.is_dir {
            return Err(not_found(address));
        }
        Ok(entry)
    }
}

struct ReadState<S> {
    session: S,
    scheme: Scheme,
    path: String,
    offset: u64,
    end: u64,
    done: bool,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl<C: SessionConnector> StorageAdapter for SessionAdapter<C> {
    fn scheme(&self) -> Scheme {
        self.scheme
    }

    fn name(&self) -> &str {
        self.scheme.as_str()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            max_connections: Some(self.max_sessions),
            ..Capabilities::basic()
        }
    }

    async fn get(
        &self,
        address: &ResourceAddress,
        range: Option<ByteRange>,
        credential: &Credential,
    ) -> Result<ByteStream> {
        let (mut session, permit) = self.open(address, credential, "get").await?;
        let entry = self.stat_file(&mut session, address, "get").await?;

        let range = range.unwrap_or(ByteRange::from_offset(0));
        let end = range.end.unwrap_or(entry.size).min(entry.size);
        let state = ReadState {
            session,
            scheme: self.scheme,
            path: address.key().to_string(),
            offset: range.start,
            end,
            done: false,
            _permit: permit,
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            if state.done || state.offset >= state.end {
                return None;
            }
            let want = (state.end - state.offset).min(READ_BLOCK as u64) as usize;
            match state.session.read_at(&state.path, state.offset, want).await {
                Ok(bytes) if bytes.is_empty() => None,
                Ok(bytes) => {
                    state.offset += bytes.len() as u64;
                    Some((Ok(bytes), state))
                }
                Err(e) => {
                    state.done = true;
                    let err = normalize(state.scheme, "get", e);
                    Some((Err(err), state))
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn open_writer(
        &self,
        address: &ResourceAddress,
        _expected_size: Option<u64>,
        credential: &Credential,
    ) -> Result<Box<dyn ObjectWriter>> {
        let name = address.name().ok_or_else(|| not_found(address))?.to_string();
        let (mut session, permit) = self.open(address, credential, "put").await?;

        let dir = parent_of(address.key()).to_string();
        if !dir.is_empty() {
            session
                .create_dir_all(&dir)
                .await
                .map_err(|e| normalize(self.scheme, "put", e))?;
        }

        let temp = join(&dir, &format!(".{}.{}{}", name, Uuid::new_v4(), TEMP_SUFFIX));
        Ok(Box::new(SessionWriter {
            session,
            scheme: self.scheme,
            address: address.clone(),
            target: address.key().to_string(),
            temp,
            touched: false,
            committed: false,
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
        let (mut session, _permit) = self.open(prefix, credential, "list").await?;

        let mut items = Vec::new();
        let mut pending = vec![parent_of(prefix.key()).to_string()];

        while let Some(dir) = pending.pop() {
            let entries = match session.list_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if dir.is_empty() || e.classify() != Some(ErrorClass::NotFound) => {
                    return Err(normalize(self.scheme, "list", e))
                }
                Err(_) => continue,
            };

            for entry in entries {
                let key = join(&dir, &entry.path);
                if entry.is_dir {
                    let dir_prefix = format!("{}/", key);
                    if dir_prefix.starts_with(prefix.key()) || prefix.key().starts_with(&dir_prefix)
                    {
                        pending.push(key);
                    }
                } else if !is_temp_file(&entry.path) && key.starts_with(prefix.key()) {
                    if let Some(address) = listed_address(prefix, &key) {
                        items.push(describe(&address, &entry));
                    }
                }
            }
        }

        Ok(paginate(items, page_token, page_size))
    }

    async fn delete(&self, address: &ResourceAddress, credential: &Credential) -> Result<()> {
        let (mut session, _permit) = self.open(address, credential, "delete").await?;
        self.stat_file(&mut session, address, "delete").await?;
        session
            .remove(address.key())
            .await
            .map_err(|e| normalize(self.scheme, "delete", e))?;

        tracing::debug!(address = %address, "Deleted remote file");
        Ok(())
    }

    async fn stat(
        &self,
        address: &ResourceAddress,
        credential: &Credential,
    ) -> Result<ObjectDescriptor> {
        let (mut session, _permit) = self.open(address, credential, "stat").await?;
        let entry = self.stat_file(&mut session, address, "stat").await?;
        Ok(describe(address, &entry))
    }
}

/// Temp-file-then-rename writer holding its own session.
struct SessionWriter<S> {
    session: S,
    scheme: Scheme,
    address: ResourceAddress,
    target: String,
    temp: String,
    touched: bool,
    committed: bool,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl<S: RemoteSession + 'static> ObjectWriter for SessionWriter<S> {
    async fn write_chunk(&mut self, _index: u64, offset: u64, chunk: Bytes) -> Result<()> {
        self.session
            .write_at(&self.temp, offset, &chunk)
            .await
            .map_err(|e| normalize(self.scheme, "put", e))?;
        self.touched = true;
        Ok(())
    }

    async fn finish(&mut self) -> Result<ObjectDescriptor> {
        if !self.committed {
            if !self.touched {
                self.write_chunk(0, 0, Bytes::new()).await?;
            }

            match self.session.remove(&self.target).await {
                Ok(()) => {}
                Err(e) if e.classify() == Some(ErrorClass::NotFound) => {}
                Err(e) => return Err(normalize(self.scheme, "put", e)),
            }
            self.session
                .rename(&self.temp, &self.target)
                .await
                .map_err(|e| normalize(self.scheme, "put", e))?;
            self.committed = true;
        }

        let entry = self
            .session
            .stat(&self.target)
            .await
            .map_err(|e| normalize(self.scheme, "put", e))?;

        tracing::debug!(address = %self.address, size = entry.size, "Committed remote file");
        Ok(describe(&self.address, &entry))
    }

    async fn abort(&mut self) -> Result<()> {
        if self.committed || !self.touched {
            return Ok(());
        }
        match self.session.remove(&self.temp).await {
            Ok(()) => Ok(()),
            Err(e) if e.classify() == Some(ErrorClass::NotFound) => Ok(()),
            Err(e) => Err(normalize(self.scheme, "abort", e)),
        }
    }
}
