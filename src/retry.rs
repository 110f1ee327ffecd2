//! Retry helpers for shard connection bring-up
//!
//! Two policies are used during init: exponential backoff (optionally
//! jittered, capped) around connection attempts, and a fixed-delay retry
//! around the initial account query. Business transactions are never retried
//! here; a failed transaction fails its batch.

use crate::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Exponential backoff helper
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    current_attempt: u32,
    jitter: bool,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff
    pub fn new(base_delay_ms: u64, max_attempts: u32) -> Self {
        ExponentialBackoff {
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_secs(60),
            max_attempts,
            current_attempt: 0,
            jitter: false,
        }
    }

    /// Cap every delay at `max_delay`
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Randomize each delay within [delay/2, delay]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Get the next delay, or None if max attempts reached
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_attempts {
            return None;
        }

        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(self.current_attempt))
            .min(self.max_delay);
        self.current_attempt += 1;

        if self.jitter && !delay.is_zero() {
            let millis = delay.as_millis() as u64;
            let jittered = rand::thread_rng().gen_range(millis / 2..=millis);
            return Some(Duration::from_millis(jittered));
        }

        Some(delay)
    }

    /// Check if we have attempts remaining
    pub fn has_attempts(&self) -> bool {
        self.current_attempt < self.max_attempts
    }
}

/// Run `op`, retrying retryable errors according to `backoff`
///
/// Non-retryable errors are returned immediately.
pub async fn retry_with_backoff<F, Fut, T>(
    what: &str,
    mut backoff: ExponentialBackoff,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => match backoff.next_delay() {
                Some(delay) => {
                    warn!("{} failed, retrying in {:?}: {}", what, delay, e);
                    tokio::time::sleep(delay).await;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}

/// Run `op` up to `attempts` times with a fixed `delay` between attempts
///
/// Every error is retried; the last one is returned once attempts run out.
pub async fn retry_fixed<F, Fut, T>(what: &str, attempts: u32, delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!("{} attempt {}/{} failed: {}", what, attempt, attempts, e);
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Internal(format!("{} never ran", what))))
}
