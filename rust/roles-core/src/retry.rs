// rust/roles-core/src/retry.rs

//! Backoff policy for rendezvous traffic.
//!
//! Used both for polling the store while peers are still registering and
//! for (re)connecting to a remote store.

use std::time::Duration;

use crate::config::RendezvousConfig;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (e.g., 2.0 for exponential backoff).
    pub backoff_multiplier: f64,
    /// Whether to add random jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Polling policy for peers that have not registered yet.
    ///
    /// Polling is bounded by the rendezvous deadline rather than by an
    /// attempt count, so `max_retries` is unbounded here.
    pub fn polling(config: &RendezvousConfig) -> Self {
        Self {
            max_retries: u32::MAX,
            initial_delay: Duration::from_millis(config.poll_initial_delay_ms),
            max_delay: Duration::from_millis(config.poll_max_delay_ms),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Connection policy for a remote rendezvous store.
    pub fn connect(config: &RendezvousConfig) -> Self {
        Self {
            max_retries: config.connect_retries,
            initial_delay: Duration::from_millis(config.connect_retry_delay_ms),
            max_delay: config.timeout(),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Calculates the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt >= self.max_retries {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter {
            // Add up to 25% jitter
            let jitter_factor = 1.0 + (rand_simple(attempt) * 0.25);
            delay_secs * jitter_factor
        } else {
            delay_secs
        };

        Duration::from_secs_f64(final_delay)
    }

    /// Returns true if more retries are allowed for the given attempt.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Deterministic pseudo-random value in [0, 1) seeded by the attempt number.
fn rand_simple(seed: u32) -> f64 {
    let x = seed.wrapping_mul(1103515245).wrapping_add(12345);
    (x as f64) / (u32::MAX as f64)
}

/// Represents a retryable operation result.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded.
    Ok(T),
    /// Operation failed but can be retried.
    Retry(E),
    /// Operation failed and should not be retried.
    Fail(E),
}

/// Execute an async operation with retries.
pub async fn retry_async<T, E, F, Fut>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = RetryResult<T, E>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            RetryResult::Ok(value) => return Ok(value),
            RetryResult::Fail(error) => return Err(error),
            RetryResult::Retry(error) => {
                if !config.should_retry(attempt) {
                    return Err(error);
                }

                let delay = config.delay_for_attempt(attempt);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
