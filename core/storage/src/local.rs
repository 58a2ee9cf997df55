//! Local filesystem storage adapter.
//!
//! Buckets are directories under the adapter root and keys are relative paths
//! inside them. Writes land in a hidden temp file next to the target and are
//! renamed into place on `finish`, so readers never observe a partial object.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use unistore_common::{ByteRange, ListPage, ObjectDescriptor, ResourceAddress, Result, Scheme};

use crate::adapter::{
    not_found, paginate, ByteStream, Capabilities, ObjectWriter, StorageAdapter,
};
use crate::credentials::Credential;
use crate::normalize::io_error;

const READ_BUFFER: usize = 64 * 1024;
const TEMP_SUFFIX: &str = ".part";

/// Local filesystem storage adapter.
pub struct LocalAdapter {
    root: PathBuf,
}

impl LocalAdapter {
    /// Create a new local adapter with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied or other filesystem failures
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root).map_err(|e| io_error(Scheme::Local, "init", e))?;
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_path(&self, address: &ResourceAddress) -> PathBuf {
        self.root.join(address.bucket())
    }

    /// Convert an address to a filesystem path.
    fn to_fs_path(&self, address: &ResourceAddress) -> PathBuf {
        let mut fs_path = self.bucket_path(address);
        for segment in address.segments() {
            fs_path.push(segment);
        }
        fs_path
    }

    async fn file_metadata(
        &self,
        address: &ResourceAddress,
        operation: &str,
    ) -> Result<std::fs::Metadata> {
        let fs_meta = fs::metadata(self.to_fs_path(address))
            .await
            .map_err(|e| io_error(Scheme::Local, operation, e))?;
        if !fs_meta.is_file() {
            return Err(not_found(address));
        }
        Ok(fs_meta)
    }
}

fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

/// Build a descriptor from filesystem metadata.
fn describe(address: &ResourceAddress, fs_meta: &std::fs::Metadata) -> ObjectDescriptor {
    let mut descriptor = ObjectDescriptor::new(address.clone());
    descriptor.size = Some(fs_meta.len());
    descriptor.last_modified = fs_meta.modified().ok().map(DateTime::<Utc>::from);
    descriptor
}

#[async_trait]
impl StorageAdapter for LocalAdapter {
    fn scheme(&self) -> Scheme {
        Scheme::Local
    }

    fn name(&self) -> &str {
        "local"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            copy: true,
            ..Capabilities::basic()
        }
    }

    async fn get(
        &self,
        address: &ResourceAddress,
        range: Option<ByteRange>,
        _credential: &Credential,
    ) -> Result<ByteStream> {
        self.file_metadata(address, "get").await?;

        let mut file = fs::File::open(self.to_fs_path(address))
            .await
            .map_err(|e| io_error(Scheme::Local, "get", e))?;

        let range = range.unwrap_or(ByteRange::from_offset(0));
        if range.start > 0 {
            file.seek(SeekFrom::Start(range.start))
                .await
                .map_err(|e| io_error(Scheme::Local, "get", e))?;
        }
        let reader = file.take(range.len().unwrap_or(u64::MAX));

        let stream = ReaderStream::with_capacity(reader, READ_BUFFER)
            .map(|chunk| chunk.map_err(|e| io_error(Scheme::Local, "get", e)));
        Ok(Box::pin(stream))
    }

    async fn open_writer(
        &self,
        address: &ResourceAddress,
        _expected_size: Option<u64>,
        _credential: &Credential,
    ) -> Result<Box<dyn ObjectWriter>> {
        let name = address
            .name()
            .ok_or_else(|| not_found(address))?
            .to_string();
        let target = self.to_fs_path(address);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(Scheme::Local, "put", e))?;
        }

        let temp = target.with_file_name(format!(".{}.{}{}", name, Uuid::new_v4(), TEMP_SUFFIX));
        let file = fs::File::create(&temp)
            .await
            .map_err(|e| io_error(Scheme::Local, "put", e))?;

        tracing::debug!(address = %address, temp = %temp.display(), "Opened local writer");

        Ok(Box::new(LocalWriter {
            address: address.clone(),
            target,
            temp,
            file: Some(file),
            committed: false,
        }))
    }

    async fn list(
        &self,
        prefix: &ResourceAddress,
        page_token: Option<&str>,
        page_size: usize,
        _credential: &Credential,
    ) -> Result<ListPage> {
        let bucket_root = self.bucket_path(prefix);
        if !bucket_root.is_dir() {
            return Ok(ListPage::default());
        }

        let mut items = Vec::new();
        let mut pending = vec![(bucket_root, String::new())];

        while let Some((dir, dir_key)) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| io_error(Scheme::Local, "list", e))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| io_error(Scheme::Local, "list", e))?
            {
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    tracing::warn!(path = %entry.path().display(), "Skipping non UTF-8 file name");
                    continue;
                };
                let key = format!("{}{}", dir_key, name);
                let fs_meta = entry
                    .metadata()
                    .await
                    .map_err(|e| io_error(Scheme::Local, "list", e))?;

                if fs_meta.is_dir() {
                    let dir_prefix = format!("{}/", key);
                    if dir_prefix.starts_with(prefix.key()) || prefix.key().starts_with(&dir_prefix)
                    {
                        pending.push((entry.path(), dir_prefix));
                    }
                } else if fs_meta.is_file() && !is_temp_file(&name) && key.starts_with(prefix.key())
                {
                    let address = prefix.with_key(&key)?;
                    items.push(describe(&address, &fs_meta));
                }
            }
        }

        Ok(paginate(items, page_token, page_size))
    }

    async fn delete(&self, address: &ResourceAddress, _credential: &Credential) -> Result<()> {
        self.file_metadata(address, "delete").await?;

        fs::remove_file(self.to_fs_path(address))
            .await
            .map_err(|e| io_error(Scheme::Local, "delete", e))?;

        tracing::debug!(address = %address, "Deleted local object");
        Ok(())
    }

    async fn stat(
        &self,
        address: &ResourceAddress,
        _credential: &Credential,
    ) -> Result<ObjectDescriptor> {
        let fs_meta = self.file_metadata(address, "stat").await?;
        Ok(describe(address, &fs_meta))
    }

    async fn copy(
        &self,
        from: &ResourceAddress,
        to: &ResourceAddress,
        credential: &Credential,
    ) -> Result<ObjectDescriptor> {
        self.file_metadata(from, "copy").await?;

        let to_path = self.to_fs_path(to);
        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(Scheme::Local, "copy", e))?;
        }

        fs::copy(self.to_fs_path(from), &to_path)
            .await
            .map_err(|e| io_error(Scheme::Local, "copy", e))?;

        self.stat(to, credential).await
    }
}

/// Write session backed by a temp file beside the target.
struct LocalWriter {
    address: ResourceAddress,
    target: PathBuf,
    temp: PathBuf,
    file: Option<fs::File>,
    committed: bool,
}

impl LocalWriter {
    fn file(&mut self) -> Result<&mut fs::File> {
        let address = &self.address;
        self.file.as_mut().ok_or_else(|| not_found(address))
    }
}

#[async_trait]
impl ObjectWriter for LocalWriter {
    async fn write_chunk(&mut self, _index: u64, offset: u64, chunk: Bytes) -> Result<()> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| io_error(Scheme::Local, "put", e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| io_error(Scheme::Local, "put", e))?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<ObjectDescriptor> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| io_error(Scheme::Local, "put", e))?;
            file.sync_all()
                .await
                .map_err(|e| io_error(Scheme::Local, "put", e))?;
            fs::rename(&self.temp, &self.target)
                .await
                .map_err(|e| io_error(Scheme::Local, "put", e))?;
            self.committed = true;
        }

        let fs_meta = fs::metadata(&self.target)
            .await
            .map_err(|e| io_error(Scheme::Local, "put", e))?;

        tracing::debug!(address = %self.address, size = fs_meta.len(), "Committed local object");
        Ok(describe(&self.address, &fs_meta))
    }

    async fn abort(&mut self) -> Result<()> {
        self.file = None;
        if self.committed {
            return Ok(());
        }
        match fs::remove_file(&self.temp).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(Scheme::Local, "abort", e)),
        }
    }
}

impl Drop for LocalWriter {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}
