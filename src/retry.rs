//! Retry logic with exponential backoff
//!
//! Failed transfer attempts are retried only when the task was created with
//! `retry: true` and the failure is transient. Between attempts the caller's
//! hook runs first (the agent uses it to move the task to RETRYING and notify
//! subscribers), then the controller sleeps for an exponentially growing,
//! optionally jittered delay.
//!
//! # Example
//!
//! ```no_run
//! use request_agent::config::RetryConfig;
//! use request_agent::retry::{IsRetryable, retry_with_backoff};
//!
//! #[derive(Debug)]
//! struct Flaky;
//!
//! impl std::fmt::Display for Flaky {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         f.write_str("flaky")
//!     }
//! }
//!
//! impl IsRetryable for Flaky {
//!     fn is_retryable(&self) -> bool {
//!         true
//!     }
//! }
//!
//! # async fn example() -> Result<(), Flaky> {
//! let config = RetryConfig::default();
//! retry_with_backoff(&config, true, |_| async { true }, |_attempt| async {
//!     Ok::<_, Flaky>(())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::TransferError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, refused connections, server overload) return `true`.
/// Permanent failures (missing resource, unreadable local file) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for TransferError {
    fn is_retryable(&self) -> bool {
        match self {
            TransferError::Connect(_) | TransferError::Timeout(_) | TransferError::Request(_) => {
                true
            }
            // 408 Request Timeout, 429 Too Many Requests and server errors
            TransferError::Status { status } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            TransferError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            TransferError::BuildClient(_)
            | TransferError::Redirect(_)
            | TransferError::UnsupportedRange
            | TransferError::UnknownSize
            | TransferError::UploadFile { .. } => false,
        }
    }
}

/// Information handed to the retry hook before each delay
#[derive(Clone, Debug)]
pub struct RetryAttempt {
    /// The attempt that just failed (1-based)
    pub attempt: u32,
    /// Display form of the failure
    pub error: String,
    /// How long the controller will wait before the next attempt
    pub delay: Duration,
}

/// Exponential backoff schedule
#[derive(Clone, Debug)]
pub struct Backoff {
    config: RetryConfig,
    retries: u32,
    delay: Duration,
}

impl Backoff {
    /// Start a fresh schedule
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            config: config.clone(),
            retries: 0,
            delay: config.initial_delay,
        }
    }

    /// Delay before the next retry, or `None` once `max_attempts` retries were handed out
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.config.max_attempts {
            return None;
        }
        self.retries += 1;

        let base = self.delay.min(self.config.max_delay);
        let next = Duration::from_secs_f64(base.as_secs_f64() * self.config.backoff_multiplier);
        self.delay = next.min(self.config.max_delay);

        Some(if self.config.jitter {
            add_jitter(base)
        } else {
            base
        })
    }

    /// Number of retries handed out so far
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

/// Execute an async operation, retrying transient failures with backoff
///
/// # Arguments
///
/// * `config` - Retry configuration (max attempts, delays, backoff multiplier, jitter)
/// * `enabled` - The task's `retry` flag; when false the first failure is final
/// * `on_retry` - Runs before each delay; returning `false` abandons the retry
///   and surfaces the failure
/// * `operation` - Async closure receiving the 1-based attempt number
///
/// # Returns
///
/// The successful result, or the last error once retries are disabled,
/// exhausted, abandoned by the hook, or the error is permanent.
pub async fn retry_with_backoff<F, Fut, H, HFut, T, E>(
    config: &RetryConfig,
    enabled: bool,
    mut on_retry: H,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    H: FnMut(RetryAttempt) -> HFut,
    HFut: Future<Output = bool>,
    E: IsRetryable + std::fmt::Display,
{
    let mut backoff = Backoff::new(config);
    let mut attempt = 1;

    loop {
        let error = match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => e,
        };

        if !enabled {
            tracing::debug!(error = %error, "Retry disabled, failing immediately");
            return Err(error);
        }
        if !error.is_retryable() {
            tracing::error!(error = %error, "Operation failed with non-retryable error");
            return Err(error);
        }
        let Some(delay) = backoff.next_delay() else {
            tracing::error!(
                error = %error,
                attempts = attempt,
                "Operation failed after all retry attempts exhausted"
            );
            return Err(error);
        };

        tracing::warn!(
            error = %error,
            attempt,
            max_attempts = config.max_attempts,
            delay_ms = delay.as_millis(),
            "Operation failed, retrying"
        );

        let proceed = on_retry(RetryAttempt {
            attempt,
            error: error.to_string(),
            delay,
        })
        .await;
        if !proceed {
            return Err(error);
        }

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The result is uniformly distributed between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
