use crate::error::Error;
use crate::shutdown::Shutdown;
use serde::Deserialize;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Re-runs a whole operation while it fails with a retryable [`Error`],
/// sleeping with exponential backoff between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RetryPolicy {
  /// Total attempts, including the first one.
  pub max_attempts: u32,
  /// Delay before the first retry.
  pub backoff_millis: u64,
  /// Factor applied to the delay after every retry.
  pub backoff_exponent: f64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    RetryPolicy {
      max_attempts: 5,
      backoff_millis: 1000,
      backoff_exponent: 2.0,
    }
  }
}

impl RetryPolicy {
  /// Never retries.
  pub fn none() -> Self {
    RetryPolicy {
      max_attempts: 1,
      ..Self::default()
    }
  }

  fn next_delay(&self, delay: Duration) -> Duration {
    let factor = self.backoff_exponent.max(1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor)
      .unwrap_or(MAX_BACKOFF)
      .min(MAX_BACKOFF)
  }

  pub async fn run<T, F, Fut>(
    &self,
    what: &str,
    shutdown: &Shutdown,
    mut operation: F,
  ) -> Result<T, Error>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
  {
    let max_attempts = self.max_attempts.max(1);
    let mut delay = Duration::from_millis(self.backoff_millis);
    let mut attempt = 1;

    loop {
      match operation().await {
        Ok(value) => return Ok(value),
        Err(err) if attempt < max_attempts && err.is_retryable() => {
          warn!(
            operation = %what,
            attempt,
            max_attempts,
            error = %err,
            "Attempt failed, retrying in {:?}",
            delay
          );
          shutdown.sleep(delay).await?;
          delay = self.next_delay(delay);
          attempt += 1;
        }
        Err(err) => return Err(err),
      }
    }
  }
}
