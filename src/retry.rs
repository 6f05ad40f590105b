use backoff::backoff::Backoff;
use backoff::exponential::ExponentialBackoff;
use backoff::SystemClock;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::types::Result;

/// Bounded exponential-backoff retry for fallible async operations.
///
/// Runs the operation up to `max_retries` total attempts; the delay after
/// attempt `n` is `min(base_delay * exponential_base^n, max_delay)`. The
/// last error is returned once attempts are exhausted.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBackoff<SystemClock> {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            randomization_factor: 0.0,
            multiplier: self.exponential_base,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Executes `op`, retrying on failure. `label` names the operation in
    /// the logs.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.backoff();
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(
                            "{} succeeded on attempt {}/{}",
                            label,
                            attempt + 1,
                            self.max_retries
                        );
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if attempt + 1 < self.max_retries {
                        let delay = backoff
                            .next_backoff()
                            .unwrap_or(self.max_delay);
                        warn!(
                            "{} failed (attempt {}/{}): {}. Retrying in {:.1}s",
                            label,
                            attempt + 1,
                            self.max_retries,
                            e,
                            delay.as_secs_f64()
                        );
                        last_error = Some(e);
                        tokio::time::sleep(delay).await;
                    } else {
                        error!(
                            "{} failed after {} attempts: {}",
                            label, self.max_retries, e
                        );
                        last_error = Some(e);
                    }
                }
            }
        }

        Err(last_error.expect("at least one attempt was made"))
    }
}
