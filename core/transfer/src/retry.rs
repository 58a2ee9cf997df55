//! Retry strategy with exponential backoff for transient errors.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use unistore_common::Result;

use crate::options::TransferOptions;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first one.
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay (cap for exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Set initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate delay for a given attempt number.
    ///
    /// `min(initial × multiplier^attempt, max)`, plus up to 25% jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            capped_delay * (1.0 + rand::random::<f64>() * 0.25)
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Retry budget for one unit of work (a chunk, or a single call).
///
/// Delays never decrease, even when jitter would make a later one shorter.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    retries: u32,
    last_delay: Duration,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            retries: 0,
            last_delay: Duration::ZERO,
        }
    }

    /// Delay before the next retry, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.config.max_retries {
            return None;
        }
        let delay = self
            .config
            .delay_for_attempt(self.retries)
            .max(self.last_delay);
        self.retries += 1;
        self.last_delay = delay;
        Some(delay)
    }

    /// Retries handed out so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Delay handed out by the last `next_delay`, zero before the first retry.
    pub fn last_delay(&self) -> Duration {
        self.last_delay
    }
}

/// Retry executor for running operations with retry logic.
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute an operation with retry logic.
    ///
    /// Transient failures are retried according to the config; anything
    /// else is returned at once. Cancellation and the deadline interrupt both
    /// the operation and the wait between attempts.
    pub async fn execute<F, Fut, T>(
        &self,
        label: &str,
        options: &TransferOptions,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = Backoff::new(self.config.clone());

        loop {
            match options.guard(operation()).await? {
                Ok(result) => {
                    if backoff.retries() > 0 {
                        debug!("{} succeeded after {} retries", label, backoff.retries());
                    }
                    return Ok(result);
                }
                Err(err) if err.is_transient() => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            "{} attempt {} failed: {}. Retrying in {:?}...",
                            label,
                            backoff.retries(),
                            err,
                            delay
                        );
                        options.sleep(delay).await?;
                    }
                    None => {
                        warn!(
                            "{} failed after {} attempts: {}",
                            label,
                            backoff.retries() + 1,
                            err
                        );
                        return Err(err);
                    }
                },
                Err(err) => return Err(err),
            }
        }
    }

    /// Get the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
