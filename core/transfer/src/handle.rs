//! Per-transfer progress record.

use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use unistore_common::{Error, OperationError, ResourceAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Open,
    Completed,
    Failed,
    Cancelled,
}

/// One attempt at moving a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkAttempt {
    /// Chunk index within the transfer.
    pub chunk: u64,
    /// 1-based attempt number for this chunk.
    pub attempt: u32,
    /// Backoff waited before this attempt.
    pub delay: Duration,
}

/// State of one in-flight transfer.
///
/// Owned by exactly the transfer that created it; it is deliberately not
/// `Clone`. Dropping it logs the release.
#[derive(Debug)]
pub struct TransferHandle {
    id: Uuid,
    address: ResourceAddress,
    direction: Direction,
    chunk_size: usize,
    bytes_transferred: u64,
    chunks: u64,
    state: TransferState,
    attempts: Vec<ChunkAttempt>,
}

impl TransferHandle {
    pub fn new(address: ResourceAddress, direction: Direction, chunk_size: usize) -> Self {
        let handle = Self {
            id: Uuid::new_v4(),
            address,
            direction,
            chunk_size,
            bytes_transferred: 0,
            chunks: 0,
            state: TransferState::Open,
            attempts: Vec::new(),
        };
        debug!(
            id = %handle.id,
            address = %handle.address,
            direction = ?direction,
            chunk_size,
            "Opened transfer"
        );
        handle
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn address(&self) -> &ResourceAddress {
        &self.address
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// Chunks fully transferred so far.
    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn attempts(&self) -> &[ChunkAttempt] {
        &self.attempts
    }

    /// Attempts recorded for one chunk.
    pub fn attempts_for(&self, chunk: u64) -> impl Iterator<Item = &ChunkAttempt> {
        self.attempts.iter().filter(move |a| a.chunk == chunk)
    }

    pub(crate) fn record_attempt(&mut self, chunk: u64, attempt: u32, delay: Duration) {
        self.attempts.push(ChunkAttempt {
            chunk,
            attempt,
            delay,
        });
    }

    pub(crate) fn chunk_done(&mut self, len: u64) {
        self.bytes_transferred += len;
        self.chunks += 1;
    }

    pub(crate) fn complete(&mut self) {
        self.state = TransferState::Completed;
    }

    /// Mark the transfer as ended by `err`.
    pub(crate) fn fail(&mut self, err: &Error) {
        self.state = match err {
            Error::Operation(OperationError::Cancelled) => TransferState::Cancelled,
            _ => TransferState::Failed,
        };
    }
}

impl Drop for TransferHandle {
    fn drop(&mut self) {
        // A handle dropped while still open was abandoned by its consumer.
        if self.state == TransferState::Open {
            self.state = TransferState::Cancelled;
        }
        debug!(
            id = %self.id,
            state = ?self.state,
            bytes = self.bytes_transferred,
            chunks = self.chunks,
            "Released transfer"
        );
    }
}
