//! In-memory storage adapter.
//!
//! Serves any scheme, which makes it the injected fake for engine and facade
//! tests. All data lives in the adapter and is lost on drop.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use unistore_common::{
    ByteRange, Checksum, ListPage, ObjectDescriptor, ResourceAddress, Result, Scheme,
};

use crate::adapter::{
    not_found, paginate, ByteStream, Capabilities, ObjectWriter, StorageAdapter,
};
use crate::credentials::Credential;

const DEFAULT_READ_BLOCK: usize = 64 * 1024;

type ObjectKey = (String, String);

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    md5: String,
    last_modified: DateTime<Utc>,
}

type Objects = Arc<RwLock<HashMap<ObjectKey, StoredObject>>>;

fn object_key(address: &ResourceAddress) -> ObjectKey {
    (address.bucket().to_string(), address.key().to_string())
}

fn describe(address: &ResourceAddress, object: &StoredObject) -> ObjectDescriptor {
    let mut descriptor = ObjectDescriptor::new(address.clone());
    descriptor.size = Some(object.data.len() as u64);
    descriptor.etag = Some(object.md5.clone());
    descriptor.checksum = Some(Checksum::Md5 {
        digest: object.md5.clone(),
    });
    descriptor.last_modified = Some(object.last_modified);
    descriptor
}

/// In-memory storage adapter.
pub struct MemoryAdapter {
    scheme: Scheme,
    objects: Objects,
    capabilities: Capabilities,
    read_block: usize,
}

impl MemoryAdapter {
    /// Create an empty adapter answering for `scheme`.
    pub fn new(scheme: Scheme) -> Self {
        Self {
            scheme,
            objects: Arc::new(RwLock::new(HashMap::new())),
            capabilities: Capabilities {
                copy: true,
                ..Capabilities::basic()
            },
            read_block: DEFAULT_READ_BLOCK,
        }
    }

    /// Override the declared capabilities.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Size of the blocks yielded by `get`.
    pub fn with_read_block(mut self, read_block: usize) -> Self {
        self.read_block = read_block.max(1);
        self
    }

    /// Number of stored objects across all buckets.
    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, address: &ResourceAddress) -> Result<StoredObject> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&object_key(address))
            .cloned()
            .ok_or_else(|| not_found(address))
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    fn scheme(&self) -> Scheme {
        self.scheme
    }

    fn name(&self) -> &str {
        "memory"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn get(
        &self,
        address: &ResourceAddress,
        range: Option<ByteRange>,
        _credential: &Credential,
    ) -> Result<ByteStream> {
        let object = self.lookup(address)?;
        let len = object.data.len() as u64;

        let range = range.unwrap_or(ByteRange::from_offset(0));
        let start = range.start.min(len) as usize;
        let end = range.end.unwrap_or(len).clamp(range.start.min(len), len) as usize;
        let data = object.data.slice(start..end);

        let blocks: Vec<Bytes> = (0..data.len())
            .step_by(self.read_block)
            .map(|offset| data.slice(offset..(offset + self.read_block).min(data.len())))
            .collect();

        Ok(Box::pin(futures::stream::iter(blocks.into_iter().map(Ok))))
    }

    async fn open_writer(
        &self,
        address: &ResourceAddress,
        _expected_size: Option<u64>,
        _credential: &Credential,
    ) -> Result<Box<dyn ObjectWriter>> {
        if address.name().is_none() {
            return Err(not_found(address));
        }
        Ok(Box::new(MemoryWriter {
            objects: Arc::clone(&self.objects),
            address: address.clone(),
            parts: BTreeMap::new(),
        }))
    }

    async fn list(
        &self,
        prefix: &ResourceAddress,
        page_token: Option<&str>,
        page_size: usize,
        _credential: &Credential,
    ) -> Result<ListPage> {
        let items = {
            let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
            objects
                .iter()
                .filter(|((bucket, key), _)| {
                    bucket == prefix.bucket() && key.starts_with(prefix.key())
                })
                .map(|((_, key), object)| Ok(describe(&prefix.with_key(key)?, object)))
                .collect::<Result<Vec<_>>>()?
        };

        Ok(paginate(items, page_token, page_size))
    }

    async fn delete(&self, address: &ResourceAddress, _credential: &Credential) -> Result<()> {
        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&object_key(address))
            .map(|_| ())
            .ok_or_else(|| not_found(address))
    }

    async fn stat(
        &self,
        address: &ResourceAddress,
        _credential: &Credential,
    ) -> Result<ObjectDescriptor> {
        let object = self.lookup(address)?;
        Ok(describe(address, &object))
    }

    async fn copy(
        &self,
        from: &ResourceAddress,
        to: &ResourceAddress,
        _credential: &Credential,
    ) -> Result<ObjectDescriptor> {
        let mut object = self.lookup(from)?;
        object.last_modified = Utc::now();
        let descriptor = describe(to, &object);

        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(object_key(to), object);
        Ok(descriptor)
    }
}

/// Buffers chunks by index and publishes the object on `finish`.
struct MemoryWriter {
    objects: Objects,
    address: ResourceAddress,
    parts: BTreeMap<u64, (u64, Bytes)>,
}

#[async_trait]
impl ObjectWriter for MemoryWriter {
    async fn write_chunk(&mut self, index: u64, offset: u64, chunk: Bytes) -> Result<()> {
        self.parts.insert(index, (offset, chunk));
        Ok(())
    }

    async fn finish(&mut self) -> Result<ObjectDescriptor> {
        let size = self
            .parts
            .values()
            .map(|(offset, chunk)| offset + chunk.len() as u64)
            .max()
            .unwrap_or(0) as usize;

        let mut data = vec![0u8; size];
        for (offset, chunk) in self.parts.values() {
            let start = *offset as usize;
            data[start..start + chunk.len()].copy_from_slice(chunk);
        }

        let object = StoredObject {
            md5: format!("{:x}", md5::compute(&data)),
            data: Bytes::from(data),
            last_modified: Utc::now(),
        };
        let descriptor = describe(&self.address, &object);

        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(object_key(&self.address), object);

        tracing::debug!(address = %self.address, size, "Stored in-memory object");
        Ok(descriptor)
    }

    async fn abort(&mut self) -> Result<()> {
        self.parts.clear();
        Ok(())
    }
}
