//! Exponential-backoff retries for store calls.
//!
//! Only errors that classify as [`RetryStrategy::Retry`] are repeated; a
//! [`RetryStrategy::Fail`] error is returned after the first attempt.

use std::{future::Future, time::Duration};

use kimi_core::{Classify, RetryStrategy};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts including the first. Zero is treated as one.
  pub max_attempts:    u32,
  /// Delay before the second attempt; doubles after every retry.
  pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts:    Self::DEFAULT_MAX_ATTEMPTS,
      initial_backoff: Self::DEFAULT_INITIAL_BACKOFF,
    }
  }
}

impl RetryPolicy {
  const DEFAULT_MAX_ATTEMPTS: u32 = 3;
  const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(200);

  pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
    Self {
      max_attempts,
      initial_backoff,
    }
  }

  /// The delay after failed attempt number `attempt` (1-based).
  pub fn backoff(&self, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    self.initial_backoff.saturating_mul(factor)
  }

  /// Run `operation` until it succeeds, fails permanently, or the attempt
  /// budget is spent. `description` is only used for logging.
  pub async fn run<T, E, F, Fut>(&self, description: &str, mut operation: F) -> Result<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + Classify + Send + Sync + 'static,
  {
    let max_attempts = self.max_attempts.max(1);
    let mut attempt = 0;

    loop {
      attempt += 1;
      tracing::trace!("{description} (attempt {attempt}/{max_attempts})");

      let e = match operation().await {
        Ok(value) => return Ok(value),
        Err(e) => e,
      };

      match e.retry_strategy() {
        RetryStrategy::Fail => return Err(Error::Store(Box::new(e))),
        RetryStrategy::Retry if attempt >= max_attempts => {
          tracing::error!(
            error = %e,
            "giving up on {description} after {max_attempts} attempts"
          );
          return Err(Error::RetriesExhausted {
            operation: description.to_owned(),
            attempts:  attempt,
            source:    Box::new(e),
          });
        }
        RetryStrategy::Retry => {
          let backoff = self.backoff(attempt);
          tracing::warn!(
            error = %e,
            "retrying {description} (attempt {attempt}/{max_attempts}) after {backoff:?}"
          );
          tokio::time::sleep(backoff).await;
        }
      }
    }
  }
}
