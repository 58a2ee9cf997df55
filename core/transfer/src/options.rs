//! Per-transfer cancellation and deadline.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use unistore_common::{OperationError, Result};

/// Cancellation signal and optional deadline for one transfer.
///
/// Cloning shares the cancellation token, so a caller can keep a clone and
/// cancel a transfer that owns the other.
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
}

impl TransferOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fail with `Timeout` once `deadline` has passed.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail if the transfer was cancelled or its deadline passed.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(OperationError::Cancelled.into());
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(OperationError::Timeout.into()),
            _ => Ok(()),
        }
    }

    /// Drive `fut` until it completes, the transfer is cancelled or the
    /// deadline passes.
    ///
    /// The outer error is only ever `Cancelled` or `Timeout`; `fut` is dropped
    /// when it fires, which closes whatever connection it held.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output> {
        self.check()?;
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(OperationError::Cancelled.into()),
            _ = deadline => Err(OperationError::Timeout.into()),
            output = fut => Ok(output),
        }
    }

    /// Sleep for `delay`, waking early on cancellation or deadline.
    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        self.guard(tokio::time::sleep(delay)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unistore_common::Error;

    #[tokio::test]
    async fn test_guard_passes_output_through() {
        let options = TransferOptions::new();
        let output = options.guard(async { 7 }).await.unwrap();
        assert_eq!(output, 7);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let options = TransferOptions::new();
        options.cancel.cancel();

        let result = options.guard(async { 7 }).await;
        assert_eq!(result, Err(Error::Operation(OperationError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_sleep() {
        let options = TransferOptions::new();
        let cancel = options.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let result = options.sleep(Duration::from_secs(60)).await;
        assert_eq!(result, Err(Error::Operation(OperationError::Cancelled)));
    }

    #[tokio::test]
    async fn test_deadline_times_out() {
        let options = TransferOptions::new().with_timeout(Duration::from_millis(10));

        let result = options.guard(std::future::pending::<()>()).await;
        assert_eq!(result, Err(Error::Operation(OperationError::Timeout)));
        assert!(options.check().is_err());
    }
}
