//! Transfer engine for unistore.
//!
//! Moves bytes between callers and storage adapters: fixed-size chunking,
//! per-chunk retry with exponential backoff, MD5 verification after upload,
//! and cancellation or deadlines on every streaming call.

pub mod checksum;
pub mod engine;
pub mod handle;
pub mod options;
pub mod retry;

#[cfg(test)]
mod testing;

pub use checksum::{LocalChecksum, RollingChecksum};
pub use engine::{TransferConfig, TransferEngine, UploadReport};
pub use handle::{ChunkAttempt, Direction, TransferHandle, TransferState};
pub use options::TransferOptions;
pub use retry::{Backoff, RetryConfig, RetryExecutor};
pub use tokio_util::sync::CancellationToken;
