//! Fault-injecting adapter wrapper for engine tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use unistore_common::{
    ByteRange, Checksum, Error, ListPage, ObjectDescriptor, OperationError, ResourceAddress, Result,
    Scheme,
};
use unistore_storage::{
    ByteStream, Capabilities, Credential, MemoryAdapter, ObjectWriter, StorageAdapter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFault {
    Healthy,
    /// Next stream yields this many blocks, then `Unavailable`.
    FailAfter(usize),
    /// Next stream never yields.
    Stall,
}

#[derive(Default)]
struct Counters {
    open_streams: AtomicUsize,
}

/// Wraps a [`MemoryAdapter`] and injects failures on demand.
pub struct FlakyAdapter {
    pub inner: MemoryAdapter,
    /// Chunk index whose writes fail.
    pub fail_writes_at: AtomicU64,
    /// Remaining transient failures for that chunk.
    pub fail_writes: AtomicU32,
    /// Every write fails with `PermissionDenied`.
    pub deny_writes: AtomicBool,
    /// `finish` reports a wrong checksum.
    pub corrupt_checksum: AtomicBool,
    /// `finish` reports a multipart checksum.
    pub report_parts: AtomicBool,
    pub writes: Arc<AtomicU32>,
    pub aborts: Arc<AtomicU32>,
    counters: Arc<Counters>,
    read_fault: Mutex<ReadFault>,
    ranges: Mutex<Vec<Option<ByteRange>>>,
}

impl FlakyAdapter {
    pub fn new(inner: MemoryAdapter) -> Self {
        Self {
            inner,
            fail_writes_at: AtomicU64::new(0),
            fail_writes: AtomicU32::new(0),
            deny_writes: AtomicBool::new(false),
            corrupt_checksum: AtomicBool::new(false),
            report_parts: AtomicBool::new(false),
            writes: Arc::new(AtomicU32::new(0)),
            aborts: Arc::new(AtomicU32::new(0)),
            counters: Arc::new(Counters::default()),
            read_fault: Mutex::new(ReadFault::Healthy),
            ranges: Mutex::new(Vec::new()),
        }
    }

    /// Apply `fault` to the next `get`.
    pub fn set_read_fault(&self, fault: ReadFault) {
        *self.read_fault.lock().unwrap() = fault;
    }

    /// Ranges passed to every `get` so far.
    pub fn ranges(&self) -> Vec<Option<ByteRange>> {
        self.ranges.lock().unwrap().clone()
    }

    /// Streams returned by `get` and not yet dropped.
    pub fn open_streams(&self) -> usize {
        self.counters.open_streams.load(Ordering::SeqCst)
    }
}

/// Decrements the open stream count when the stream is dropped.
struct OpenStreamGuard(Arc<Counters>);

impl Drop for OpenStreamGuard {
    fn drop(&mut self) {
        self.0.open_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageAdapter for FlakyAdapter {
    fn scheme(&self) -> Scheme {
        self.inner.scheme()
    }

    fn name(&self) -> &str {
        "flaky"
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    async fn get(
        &self,
        address: &ResourceAddress,
        range: Option<ByteRange>,
        credential: &Credential,
    ) -> Result<ByteStream> {
        self.ranges.lock().unwrap().push(range);
        let fault = std::mem::replace(&mut *self.read_fault.lock().unwrap(), ReadFault::Healthy);

        let stream: ByteStream = match fault {
            ReadFault::Stall => Box::pin(futures::stream::pending()),
            ReadFault::FailAfter(blocks) => {
                let inner = self.inner.get(address, range, credential).await?;
                let failure = futures::stream::once(async {
                    Err::<Bytes, Error>(
                        OperationError::Unavailable("connection reset".to_string()).into(),
                    )
                });
                Box::pin(inner.take(blocks).chain(failure))
            }
            ReadFault::Healthy => self.inner.get(address, range, credential).await?,
        };

        self.counters.open_streams.fetch_add(1, Ordering::SeqCst);
        let guard = OpenStreamGuard(self.counters.clone());
        Ok(Box::pin(stream.map(move |item| {
            let _ = &guard;
            item
        })))
    }

    async fn open_writer(
        &self,
        address: &ResourceAddress,
        expected_size: Option<u64>,
        credential: &Credential,
    ) -> Result<Box<dyn ObjectWriter>> {
        let inner = self
            .inner
            .open_writer(address, expected_size, credential)
            .await?;
        Ok(Box::new(FlakyWriter {
            inner,
            fail_at: self.fail_writes_at.load(Ordering::SeqCst),
            failures_left: self.fail_writes.load(Ordering::SeqCst),
            deny: self.deny_writes.load(Ordering::SeqCst),
            corrupt: self.corrupt_checksum.load(Ordering::SeqCst),
            report_parts: self.report_parts.load(Ordering::SeqCst),
            part_digests: BTreeMap::new(),
            writes: self.writes.clone(),
            aborts: self.aborts.clone(),
        }))
    }

    async fn list(
        &self,
        prefix: &ResourceAddress,
        page_token: Option<&str>,
        page_size: usize,
        credential: &Credential,
    ) -> Result<ListPage> {
        self.inner.list(prefix, page_token, page_size, credential).await
    }

    async fn delete(&self, address: &ResourceAddress, credential: &Credential) -> Result<()> {
        self.inner.delete(address, credential).await
    }

    async fn stat(
        &self,
        address: &ResourceAddress,
        credential: &Credential,
    ) -> Result<ObjectDescriptor> {
        self.inner.stat(address, credential).await
    }
}

struct FlakyWriter {
    inner: Box<dyn ObjectWriter>,
    fail_at: u64,
    failures_left: u32,
    deny: bool,
    corrupt: bool,
    report_parts: bool,
    part_digests: BTreeMap<u64, [u8; 16]>,
    writes: Arc<AtomicU32>,
    aborts: Arc<AtomicU32>,
}

#[async_trait]
impl ObjectWriter for FlakyWriter {
    async fn write_chunk(&mut self, index: u64, offset: u64, chunk: Bytes) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.deny {
            return Err(OperationError::PermissionDenied("write denied".to_string()).into());
        }
        if index == self.fail_at && self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(OperationError::Unavailable("503 Service Unavailable".to_string()).into());
        }
        self.part_digests.insert(index, md5::compute(&chunk).0);
        self.inner.write_chunk(index, offset, chunk).await
    }

    async fn finish(&mut self) -> Result<ObjectDescriptor> {
        let mut descriptor = self.inner.finish().await?;
        if self.report_parts {
            let concatenated: Vec<u8> = self.part_digests.values().flatten().copied().collect();
            descriptor.checksum = Some(Checksum::Md5OfParts {
                digest: format!("{:x}", md5::compute(&concatenated)),
                parts: self.part_digests.len() as u32,
            });
        }
        if self.corrupt {
            descriptor.checksum = Some(Checksum::Md5 {
                digest: "0123456789abcdef0123456789abcdef".to_string(),
            });
        }
        Ok(descriptor)
    }

    async fn abort(&mut self) -> Result<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.inner.abort().await
    }
}
