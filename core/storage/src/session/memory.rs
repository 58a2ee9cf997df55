//! In-process file server for session adapters.
//!
//! [`MemoryFileServer`] plays the role of an SFTP or FTP server: it hands out
//! sessions over one shared file map and reports failures in the protocol's
//! own vocabulary, so the error tables run exactly as against a real server.
//! Directories are implied by file paths.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ProtocolError, RemoteEntry, RemoteSession, SessionConnector};
use crate::credentials::Credential;

type Files = Arc<Mutex<BTreeMap<String, Vec<u8>>>>;

#[derive(Debug, Default)]
struct Counters {
    open: AtomicUsize,
    peak: AtomicUsize,
}

fn lock(files: &Files) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
    files.lock().unwrap_or_else(|e| e.into_inner())
}

/// Connector serving every host from one in-memory file map.
///
/// `E` selects the protocol: `MemoryFileServer<SftpError>` for
/// [`SessionAdapter::sftp`](super::SessionAdapter::sftp),
/// `MemoryFileServer<FtpError>` for [`SessionAdapter::ftp`](super::SessionAdapter::ftp).
pub struct MemoryFileServer<E> {
    files: Files,
    counters: Arc<Counters>,
    password: Option<String>,
    _protocol: PhantomData<fn() -> E>,
}

impl<E> Default for MemoryFileServer<E> {
    fn default() -> Self {
        Self {
            files: Arc::new(Mutex::new(BTreeMap::new())),
            counters: Arc::new(Counters::default()),
            password: None,
            _protocol: PhantomData,
        }
    }
}

impl<E> Clone for MemoryFileServer<E> {
    fn clone(&self) -> Self {
        Self {
            files: Arc::clone(&self.files),
            counters: Arc::clone(&self.counters),
            password: self.password.clone(),
            _protocol: PhantomData,
        }
    }
}

impl<E> MemoryFileServer<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject logins whose `password` field differs.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Every stored path, temp files included.
    pub fn paths(&self) -> Vec<String> {
        lock(&self.files).keys().cloned().collect()
    }

    /// Contents of a file.
    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.files).get(path).cloned()
    }

    /// Sessions currently connected.
    pub fn open_sessions(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    /// Most sessions ever connected at once.
    pub fn peak_sessions(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<E: ProtocolError> SessionConnector for MemoryFileServer<E> {
    type Session = MemorySession<E>;

    async fn connect(&self, _host: &str, credential: &Credential) -> Result<Self::Session, E> {
        if let Some(expected) = &self.password {
            if credential.field("password") != Some(expected.as_str()) {
                return Err(E::access_denied("login incorrect"));
            }
        }
        let now = self.counters.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(now, Ordering::SeqCst);
        Ok(MemorySession {
            files: Arc::clone(&self.files),
            counters: Arc::clone(&self.counters),
            _protocol: PhantomData,
        })
    }
}

/// Session handed out by [`MemoryFileServer`].
pub struct MemorySession<E> {
    files: Files,
    counters: Arc<Counters>,
    _protocol: PhantomData<fn() -> E>,
}

impl<E> Drop for MemorySession<E> {
    fn drop(&mut self) {
        self.counters.open.fetch_sub(1, Ordering::SeqCst);
    }
}

fn file_entry(path: &str, data: &[u8]) -> RemoteEntry {
    RemoteEntry {
        path: path.to_string(),
        size: data.len() as u64,
        is_dir: false,
        modified: None,
    }
}

fn dir_entry(path: &str) -> RemoteEntry {
    RemoteEntry {
        path: path.to_string(),
        size: 0,
        is_dir: true,
        modified: None,
    }
}

#[async_trait]
impl<E: ProtocolError> RemoteSession for MemorySession<E> {
    type Error = E;

    async fn stat(&mut self, path: &str) -> Result<RemoteEntry, E> {
        let files = lock(&self.files);
        if let Some(data) = files.get(path) {
            return Ok(file_entry(path, data));
        }
        let dir = format!("{}/", path);
        if files.keys().any(|k| k.starts_with(&dir)) {
            return Ok(dir_entry(path));
        }
        Err(E::no_such_file(path))
    }

    async fn list_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>, E> {
        let files = lock(&self.files);
        let dir = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };

        let mut entries: BTreeMap<String, RemoteEntry> = BTreeMap::new();
        for (key, data) in files.iter().filter(|(k, _)| k.starts_with(&dir)) {
            let rest = &key[dir.len()..];
            let entry = match rest.split_once('/') {
                Some((child, _)) => dir_entry(child),
                None => file_entry(rest, data),
            };
            entries.insert(entry.path.clone(), entry);
        }
        if entries.is_empty() && !path.is_empty() {
            return Err(E::no_such_file(path));
        }
        Ok(entries.into_values().collect())
    }

    async fn read_at(&mut self, path: &str, offset: u64, len: usize) -> Result<Bytes, E> {
        let files = lock(&self.files);
        let data = files.get(path).ok_or_else(|| E::no_such_file(path))?;
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len).min(data.len());
        Ok(Bytes::copy_from_slice(&data[start..end]))
    }

    async fn write_at(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<(), E> {
        let mut files = lock(&self.files);
        let file = files.entry(path.to_string()).or_default();
        let start = offset as usize;
        let end = start + data.len();
        if file.len() < end {
            file.resize(end, 0);
        }
        file[start..end].copy_from_slice(data);
        Ok(())
    }

    async fn create_dir_all(&mut self, _path: &str) -> Result<(), E> {
        Ok(())
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), E> {
        let mut files = lock(&self.files);
        let data = files.remove(from).ok_or_else(|| E::no_such_file(from))?;
        files.insert(to.to_string(), data);
        Ok(())
    }

    async fn remove(&mut self, path: &str) -> Result<(), E> {
        lock(&self.files)
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| E::no_such_file(path))
    }
}
