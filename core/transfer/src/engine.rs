//! Transfer engine: chunked streaming with per-chunk retry.
//!
//! Uploads regroup the caller's stream into fixed-size chunks and hand them to
//! the adapter's [`ObjectWriter`]; a transient failure resends only the
//! current chunk. Downloads regroup the provider's frames into chunks of the
//! same size and re-open the adapter stream at the current offset after a
//! transient failure. Both honor [`TransferOptions`].

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use unistore_common::{
    ByteRange, Error, ObjectDescriptor, OperationError, ResourceAddress, Result,
};
use unistore_storage::{
    ByteStream, Capability, Credential, ObjectWriter, Rechunker, StorageAdapter,
    DEFAULT_CHUNK_SIZE,
};

use crate::checksum::RollingChecksum;
use crate::handle::{Direction, TransferHandle};
use crate::options::TransferOptions;
use crate::retry::{Backoff, RetryConfig, RetryExecutor};

/// Transfer engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Requested chunk size; raised to the adapter's minimum and alignment.
    pub chunk_size: usize,
    /// Retries per chunk (or per single-shot call) after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
        }
    }
}

impl TransferConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries)
            .with_initial_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
    }
}

/// Outcome of a completed upload.
#[derive(Debug)]
pub struct UploadReport {
    /// The provider's view of the stored object.
    pub descriptor: ObjectDescriptor,
    pub handle: TransferHandle,
}

/// Drives streaming reads and writes through storage adapters.
#[derive(Debug, Clone, Default)]
pub struct TransferEngine {
    config: TransferConfig,
    retry: RetryConfig,
}

impl TransferEngine {
    pub fn new(config: TransferConfig) -> Self {
        let retry = config.retry_config();
        Self { config, retry }
    }

    /// Replace the retry policy derived from the config.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Run a single-shot call (stat, list, delete, presign, copy) with retry.
    pub async fn run<F, Fut, T>(&self, label: &str, options: &TransferOptions, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        RetryExecutor::new(self.retry.clone())
            .execute(label, options, operation)
            .await
    }

    /// Upload `data` to `address` in chunks.
    ///
    /// # Preconditions
    /// - `expected_size` is given when the adapter requires a content length
    ///
    /// # Postconditions
    /// - The object is committed and its checksum matched the bytes sent
    ///
    /// # Errors
    /// - `LengthRequired` if the adapter needs a size and none was given
    /// - `IntegrityMismatch` if the byte count differs from `expected_size`
    ///   (the write is aborted) or the provider checksum differs after commit
    ///   (the object is left in place)
    /// - `Cancelled` / `Timeout` from `options`; nothing is rolled back
    /// - The first permanent adapter failure, after aborting the write
    pub async fn upload(
        &self,
        adapter: &dyn StorageAdapter,
        address: &ResourceAddress,
        data: ByteStream,
        expected_size: Option<u64>,
        credential: &Credential,
        options: &TransferOptions,
    ) -> Result<UploadReport> {
        let capabilities = adapter.capabilities();
        capabilities.require(Capability::Put, adapter.scheme())?;
        if capabilities.requires_content_length && expected_size.is_none() {
            return Err(OperationError::LengthRequired(adapter.scheme()).into());
        }

        let chunk_size = capabilities.effective_chunk_size(self.config.chunk_size);
        let mut handle = TransferHandle::new(address.clone(), Direction::Write, chunk_size);

        let opened = self
            .run("open writer", options, || {
                adapter.open_writer(address, expected_size, credential)
            })
            .await;
        let mut writer = match opened {
            Ok(writer) => writer,
            Err(err) => {
                handle.fail(&err);
                return Err(err);
            }
        };

        match self
            .write_chunks(writer.as_mut(), data, chunk_size, expected_size, options, &mut handle)
            .await
        {
            Ok(descriptor) => {
                handle.complete();
                info!(
                    address = %address,
                    bytes = handle.bytes_transferred(),
                    chunks = handle.chunks(),
                    "Upload complete"
                );
                Ok(UploadReport { descriptor, handle })
            }
            Err(err) => {
                handle.fail(&err);
                Err(err)
            }
        }
    }

    async fn write_chunks(
        &self,
        writer: &mut dyn ObjectWriter,
        data: ByteStream,
        chunk_size: usize,
        expected_size: Option<u64>,
        options: &TransferOptions,
        handle: &mut TransferHandle,
    ) -> Result<ObjectDescriptor> {
        let mut chunks = Rechunker::new(data, chunk_size);
        let mut checksum = RollingChecksum::new();
        let mut offset = 0u64;
        let mut index = 0u64;

        loop {
            let chunk = match options.guard(chunks.next_chunk()).await? {
                None => break,
                Some(Ok(chunk)) => chunk,
                Some(Err(err)) => return Err(abort(writer, err).await),
            };

            if let Some(expected) = expected_size {
                if offset + chunk.len() as u64 > expected {
                    let err = size_mismatch(expected, offset + chunk.len() as u64);
                    return Err(abort(writer, err).await);
                }
            }

            checksum.update(&chunk);
            let len = chunk.len() as u64;
            self.write_chunk(writer, index, offset, chunk, options, handle)
                .await?;
            handle.chunk_done(len);
            offset += len;
            index += 1;
        }

        if let Some(expected) = expected_size {
            if offset != expected {
                return Err(abort(writer, size_mismatch(expected, offset)).await);
            }
        }

        let descriptor = match options.guard(writer.finish()).await? {
            Ok(descriptor) => descriptor,
            Err(err) => return Err(abort(writer, err).await),
        };

        if let Some(size) = descriptor.size {
            if size != offset {
                return Err(size_mismatch(offset, size));
            }
        }
        checksum.finalize().verify(descriptor.checksum.as_ref())?;

        Ok(descriptor)
    }

    /// Send one chunk, retrying transient failures of this chunk only.
    async fn write_chunk(
        &self,
        writer: &mut dyn ObjectWriter,
        index: u64,
        offset: u64,
        chunk: Bytes,
        options: &TransferOptions,
        handle: &mut TransferHandle,
    ) -> Result<()> {
        let mut backoff = Backoff::new(self.retry.clone());

        loop {
            handle.record_attempt(index, backoff.retries() + 1, backoff.last_delay());

            match options
                .guard(writer.write_chunk(index, offset, chunk.clone()))
                .await?
            {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            chunk = index,
                            attempt = backoff.retries(),
                            "Chunk write failed: {}. Retrying in {:?}...",
                            err,
                            delay
                        );
                        options.sleep(delay).await?;
                    }
                    None => return Err(abort(writer, err).await),
                },
                Err(err) => return Err(abort(writer, err).await),
            }
        }
    }

    /// Open a download of `address`, optionally limited to `range`.
    ///
    /// Every item except the last carries exactly the effective chunk size.
    /// The first request is made before returning so that `NotFound` and
    /// permission failures surface here. The stream owns the credential and
    /// the transfer handle; dropping it closes the adapter connection.
    ///
    /// # Errors
    /// - `Unsupported` if a range is requested from an adapter without ranged reads
    /// - Adapter failures after retries; `Cancelled` / `Timeout` from `options`
    pub async fn download(
        &self,
        adapter: Arc<dyn StorageAdapter>,
        address: ResourceAddress,
        range: Option<ByteRange>,
        credential: Credential,
        options: TransferOptions,
    ) -> Result<ByteStream> {
        let capabilities = adapter.capabilities();
        capabilities.require(Capability::Get, adapter.scheme())?;
        if range.is_some() {
            capabilities.require(Capability::RangeRead, adapter.scheme())?;
        }

        let chunk_size = capabilities.effective_chunk_size(self.config.chunk_size);
        let mut handle = TransferHandle::new(address.clone(), Direction::Read, chunk_size);
        handle.record_attempt(0, 1, Duration::ZERO);
        let stream = self
            .run("get", &options, || adapter.get(&address, range, &credential))
            .await;
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                handle.fail(&err);
                return Err(err);
            }
        };

        let state = ReadState {
            can_reopen: capabilities.range_read,
            adapter,
            address,
            credential,
            options,
            retry: self.retry.clone(),
            remaining: range.unwrap_or(ByteRange::from_offset(0)),
            stream: Some(stream),
            chunk_size,
            buffer: BytesMut::new(),
            handle,
            finished: false,
        };

        Ok(Box::pin(futures::stream::unfold(state, ReadState::next)))
    }
}

/// Abort `writer` after `err`, keeping `err` as the reported failure.
async fn abort(writer: &mut dyn ObjectWriter, err: Error) -> Error {
    if let Err(abort_err) = writer.abort().await {
        warn!("Failed to abort write after {}: {}", err, abort_err);
    }
    err
}

fn size_mismatch(expected: u64, actual: u64) -> Error {
    OperationError::IntegrityMismatch {
        expected: format!("{} bytes", expected),
        actual: format!("{} bytes", actual),
    }
    .into()
}

struct ReadState {
    adapter: Arc<dyn StorageAdapter>,
    address: ResourceAddress,
    credential: Credential,
    options: TransferOptions,
    retry: RetryConfig,
    can_reopen: bool,
    /// Part of the requested range not yet delivered.
    remaining: ByteRange,
    stream: Option<ByteStream>,
    chunk_size: usize,
    /// Bytes received but not yet yielded.
    buffer: BytesMut,
    handle: TransferHandle,
    finished: bool,
}

impl ReadState {
    /// Yield the next chunk, re-opening after transient failures.
    ///
    /// The retry budget starts fresh for every chunk.
    async fn next(mut self) -> Option<(Result<Bytes>, Self)> {
        if self.finished {
            return None;
        }
        if self.buffer.len() >= self.chunk_size {
            return self.deliver();
        }
        let mut backoff = Backoff::new(self.retry.clone());

        loop {
            let failure = match self.stream.as_mut() {
                Some(stream) => match self.options.guard(stream.next()).await {
                    Err(stop) => return self.stop(stop),
                    Ok(Some(Ok(bytes))) => {
                        self.remaining = self.remaining.advance(bytes.len() as u64);
                        self.buffer.extend_from_slice(&bytes);
                        if self.buffer.len() >= self.chunk_size {
                            return self.deliver();
                        }
                        continue;
                    }
                    Ok(None) => return self.finish(),
                    Ok(Some(Err(err))) => err,
                },
                None => {
                    let reopened = self
                        .options
                        .guard(self.adapter.get(
                            &self.address,
                            Some(self.remaining),
                            &self.credential,
                        ))
                        .await;
                    match reopened {
                        Err(stop) => return self.stop(stop),
                        Ok(Ok(stream)) => {
                            self.stream = Some(stream);
                            continue;
                        }
                        Ok(Err(err)) => err,
                    }
                }
            };

            // Drop the broken stream before waiting.
            self.stream = None;
            if !failure.is_transient() || !self.can_reopen {
                return self.stop(failure);
            }
            if self.remaining.is_empty() {
                return self.finish();
            }
            let Some(delay) = backoff.next_delay() else {
                return self.stop(failure);
            };

            let chunk = self.handle.chunks();
            warn!(
                address = %self.address,
                offset = self.remaining.start,
                "Read failed: {}. Re-opening in {:?}...",
                failure,
                delay
            );
            self.handle
                .record_attempt(chunk, backoff.retries() + 1, delay);
            if let Err(stop) = self.options.sleep(delay).await {
                return self.stop(stop);
            }
        }
    }

    /// Yield one full chunk from the buffer.
    fn deliver(mut self) -> Option<(Result<Bytes>, Self)> {
        let chunk = self.buffer.split_to(self.chunk_size).freeze();
        self.handle.chunk_done(chunk.len() as u64);
        Some((Ok(chunk), self))
    }

    /// End of data: yield whatever is buffered as the last chunk.
    fn finish(mut self) -> Option<(Result<Bytes>, Self)> {
        self.stream = None;
        self.finished = true;
        let tail = (!self.buffer.is_empty()).then(|| self.buffer.split().freeze());
        if let Some(tail) = &tail {
            self.handle.chunk_done(tail.len() as u64);
        }
        self.handle.complete();
        debug!(
            address = %self.address,
            bytes = self.handle.bytes_transferred(),
            chunks = self.handle.chunks(),
            "Download complete"
        );
        tail.map(|tail| (Ok(tail), self))
    }

    /// Yield `err` as the final item.
    fn stop(mut self, err: Error) -> Option<(Result<Bytes>, Self)> {
        self.stream = None;
        self.finished = true;
        self.handle.fail(&err);
        Some((Err(err), self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::TransferState;
    use crate::testing::{FlakyAdapter, ReadFault};
    use std::sync::atomic::Ordering;
    use unistore_common::{Checksum, Scheme};
    use unistore_storage::{collect_bytes, stream_from_chunks, Capabilities, MemoryAdapter};

    fn addr(key: &str) -> ResourceAddress {
        ResourceAddress::new(Scheme::S3, "bucket", key).unwrap()
    }

    fn credential() -> Credential {
        Credential::anonymous(Scheme::S3)
    }

    fn engine(chunk_size: usize) -> TransferEngine {
        TransferEngine::new(TransferConfig {
            chunk_size,
            ..TransferConfig::default()
        })
        .with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(20)),
        )
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn source(data: &[u8], piece: usize) -> ByteStream {
        stream_from_chunks(
            data.chunks(piece)
                .map(Bytes::copy_from_slice)
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_round_trip_independent_of_chunk_size() {
        let data = payload(10_000);
        for chunk_size in [1, 7, 1024, 10_000, 65_536] {
            let adapter: Arc<dyn StorageAdapter> =
                Arc::new(MemoryAdapter::new(Scheme::S3).with_read_block(333));
            let engine = engine(chunk_size);
            let options = TransferOptions::new();

            let report = engine
                .upload(
                    adapter.as_ref(),
                    &addr("blob"),
                    source(&data, 999),
                    Some(data.len() as u64),
                    &credential(),
                    &options,
                )
                .await
                .unwrap();
            assert_eq!(report.descriptor.size, Some(data.len() as u64));
            assert_eq!(
                report.handle.chunks(),
                data.len().div_ceil(chunk_size) as u64
            );

            let stream = engine
                .download(adapter, addr("blob"), None, credential(), options)
                .await
                .unwrap();
            assert_eq!(collect_bytes(stream).await.unwrap(), data);
        }
    }

    #[tokio::test]
    async fn test_two_transient_failures_then_success() {
        let adapter = FlakyAdapter::new(MemoryAdapter::new(Scheme::S3));
        adapter.fail_writes.store(2, Ordering::SeqCst);
        let engine = engine(4);

        let report = engine
            .upload(
                &adapter,
                &addr("flaky"),
                source(b"abcd", 4),
                None,
                &credential(),
                &TransferOptions::new(),
            )
            .await
            .unwrap();

        let attempts: Vec<_> = report.handle.attempts_for(0).collect();
        assert_eq!(attempts.len(), 3);
        assert_eq!(
            attempts.iter().map(|a| a.attempt).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(attempts.windows(2).all(|pair| pair[0].delay <= pair[1].delay));
        assert_eq!(report.handle.state(), TransferState::Completed);
    }

    #[tokio::test]
    async fn test_retry_resends_only_current_chunk() {
        let adapter = FlakyAdapter::new(MemoryAdapter::new(Scheme::S3));
        adapter.fail_writes_at.store(2, Ordering::SeqCst);
        adapter.fail_writes.store(1, Ordering::SeqCst);
        let engine = engine(2);

        let report = engine
            .upload(
                &adapter,
                &addr("chunks"),
                source(b"aabbccdd", 3),
                None,
                &credential(),
                &TransferOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.handle.attempts_for(0).count(), 1);
        assert_eq!(report.handle.attempts_for(1).count(), 1);
        assert_eq!(report.handle.attempts_for(2).count(), 2);
        assert_eq!(report.handle.attempts_for(3).count(), 1);
        assert_eq!(adapter.writes.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_permanent_failure_aborts() {
        let adapter = FlakyAdapter::new(MemoryAdapter::new(Scheme::S3));
        adapter.deny_writes.store(true, Ordering::SeqCst);
        let engine = engine(4);

        let err = engine
            .upload(
                &adapter,
                &addr("denied"),
                source(b"abcdefgh", 8),
                None,
                &credential(),
                &TransferOptions::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Operation(OperationError::PermissionDenied(_))
        ));
        assert_eq!(adapter.writes.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.aborts.load(Ordering::SeqCst), 1);
        assert!(adapter.inner.is_empty());
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let adapter = FlakyAdapter::new(MemoryAdapter::new(Scheme::S3));
        adapter.fail_writes.store(100, Ordering::SeqCst);
        let engine = engine(4);

        let err = engine
            .upload(
                &adapter,
                &addr("exhausted"),
                source(b"abcd", 4),
                None,
                &credential(),
                &TransferOptions::new(),
            )
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(adapter.writes.load(Ordering::SeqCst), 4);
        assert_eq!(adapter.aborts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_size_mismatch_is_integrity_error() {
        let adapter = MemoryAdapter::new(Scheme::S3);
        let engine = engine(4);

        for expected in [3u64, 10] {
            let err = engine
                .upload(
                    &adapter,
                    &addr("sized"),
                    source(b"abcdef", 6),
                    Some(expected),
                    &credential(),
                    &TransferOptions::new(),
                )
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                Error::Operation(OperationError::IntegrityMismatch { .. })
            ));
        }
        assert!(adapter.is_empty());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_leaves_object() {
        let adapter = FlakyAdapter::new(MemoryAdapter::new(Scheme::S3));
        adapter.corrupt_checksum.store(true, Ordering::SeqCst);
        let engine = engine(4);

        let err = engine
            .upload(
                &adapter,
                &addr("corrupt"),
                source(b"abcdef", 6),
                None,
                &credential(),
                &TransferOptions::new(),
            )
            .await
            .unwrap_err();

        match err {
            Error::Operation(OperationError::IntegrityMismatch { expected, actual }) => {
                assert_ne!(expected, actual);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(adapter.inner.len(), 1);
    }

    #[tokio::test]
    async fn test_length_required() {
        let adapter = MemoryAdapter::new(Scheme::Gcs).with_capabilities(Capabilities {
            requires_content_length: true,
            ..Capabilities::basic()
        });

        let err = engine(4)
            .upload(
                &adapter,
                &addr("unsized"),
                source(b"abcd", 4),
                None,
                &credential(),
                &TransferOptions::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err,
            Error::Operation(OperationError::LengthRequired(Scheme::Gcs))
        );
    }

    #[tokio::test]
    async fn test_cancelled_upload() {
        let adapter = MemoryAdapter::new(Scheme::S3);
        let options = TransferOptions::new();
        options.cancel.cancel();

        let err = engine(4)
            .upload(
                &adapter,
                &addr("cancelled"),
                source(b"abcd", 4),
                None,
                &credential(),
                &options,
            )
            .await
            .unwrap_err();

        assert_eq!(err, Error::Operation(OperationError::Cancelled));
        assert!(adapter.is_empty());
    }

    #[tokio::test]
    async fn test_download_reopens_at_offset() {
        let inner = MemoryAdapter::new(Scheme::S3).with_read_block(4);
        let adapter = Arc::new(FlakyAdapter::new(inner));
        let data = payload(20);
        engine(64)
            .upload(
                adapter.as_ref(),
                &addr("reopen"),
                source(&data, 20),
                None,
                &credential(),
                &TransferOptions::new(),
            )
            .await
            .unwrap();

        adapter.set_read_fault(ReadFault::FailAfter(2));
        let stream = engine(64)
            .download(
                adapter.clone(),
                addr("reopen"),
                None,
                credential(),
                TransferOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(collect_bytes(stream).await.unwrap(), data);
        assert_eq!(adapter.ranges(), vec![None, Some(ByteRange::from_offset(8))]);
    }

    #[tokio::test]
    async fn test_download_range() {
        let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new(Scheme::S3));
        let engine = engine(64);
        engine
            .upload(
                adapter.as_ref(),
                &addr("ranged"),
                source(b"0123456789", 10),
                None,
                &credential(),
                &TransferOptions::new(),
            )
            .await
            .unwrap();

        let stream = engine
            .download(
                adapter,
                addr("ranged"),
                Some(ByteRange::new(2, Some(6))),
                credential(),
                TransferOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(collect_bytes(stream).await.unwrap(), b"2345");
    }

    #[tokio::test]
    async fn test_download_regroups_provider_frames() {
        let inner = MemoryAdapter::new(Scheme::S3).with_read_block(3);
        let adapter = Arc::new(FlakyAdapter::new(inner));
        let data = payload(23);
        engine(64)
            .upload(
                adapter.as_ref(),
                &addr("frames"),
                source(&data, 23),
                None,
                &credential(),
                &TransferOptions::new(),
            )
            .await
            .unwrap();

        // A reopen in the middle must not disturb the chunk boundaries.
        adapter.set_read_fault(ReadFault::FailAfter(3));
        let mut stream = engine(5)
            .download(adapter.clone(), addr("frames"), None, credential(), TransferOptions::new())
            .await
            .unwrap();

        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.unwrap());
        }
        let lengths: Vec<_> = chunks.iter().map(Bytes::len).collect();
        assert_eq!(lengths, vec![5, 5, 5, 5, 3]);
        assert_eq!(chunks.concat(), data);
        assert_eq!(adapter.ranges(), vec![None, Some(ByteRange::from_offset(9))]);
    }

    #[tokio::test]
    async fn test_download_missing_object() {
        let adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new(Scheme::S3));
        let err = engine(64)
            .download(adapter, addr("missing"), None, credential(), TransferOptions::new())
            .await
            .err()
            .unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cancel_mid_download_closes_stream() {
        let inner = MemoryAdapter::new(Scheme::S3).with_read_block(4);
        let adapter = Arc::new(FlakyAdapter::new(inner));
        let data = payload(16);
        engine(64)
            .upload(
                adapter.as_ref(),
                &addr("cancel"),
                source(&data, 16),
                None,
                &credential(),
                &TransferOptions::new(),
            )
            .await
            .unwrap();

        let options = TransferOptions::new();
        let cancel = options.cancel.clone();
        let mut stream = engine(4)
            .download(adapter.clone(), addr("cancel"), None, credential(), options)
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.as_ref(), &data[..4]);
        assert_eq!(adapter.open_streams(), 1);

        cancel.cancel();
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err, Error::Operation(OperationError::Cancelled));
        assert_eq!(adapter.open_streams(), 0);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_download_deadline() {
        let inner = MemoryAdapter::new(Scheme::S3);
        let adapter = Arc::new(FlakyAdapter::new(inner));
        engine(64)
            .upload(
                adapter.as_ref(),
                &addr("slow"),
                source(b"data", 4),
                None,
                &credential(),
                &TransferOptions::new(),
            )
            .await
            .unwrap();

        adapter.set_read_fault(ReadFault::Stall);
        let options = TransferOptions::new().with_timeout(Duration::from_millis(20));
        let mut stream = engine(64)
            .download(adapter, addr("slow"), None, credential(), options)
            .await
            .unwrap();

        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err, Error::Operation(OperationError::Timeout));
    }

    #[tokio::test]
    async fn test_multipart_checksum_matches() {
        let adapter = FlakyAdapter::new(MemoryAdapter::new(Scheme::S3));
        adapter.report_parts.store(true, Ordering::SeqCst);

        let report = engine(3)
            .upload(
                &adapter,
                &addr("parts"),
                source(b"abcdefgh", 8),
                None,
                &credential(),
                &TransferOptions::new(),
            )
            .await
            .unwrap();

        assert!(matches!(
            report.descriptor.checksum,
            Some(Checksum::Md5OfParts { parts: 3, .. })
        ));
    }
}
