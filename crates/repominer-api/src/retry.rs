// Retry logic with exponential backoff
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Hard ceiling on attempts per request, first one included.
/// Hammering a struggling API harder never made it come back sooner.
pub const MAX_ATTEMPTS: u32 = 5;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one, at most `MAX_ATTEMPTS`
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 200,   // Start with 200ms
            max_delay_ms: 30000,     // Max 30 seconds
            backoff_multiplier: 2.0, // Double each time
        }
    }
}

impl RetryConfig {
    /// Delay before the retry that follows `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms = (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(exponent);
        Duration::from_millis((delay_ms as u64).min(self.max_delay_ms))
    }
}

/// Result of a single attempt
///
/// `Retry` carries the value to hand back if we run out of attempts, so the
/// caller always ends up with something it can classify.
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    Retry {
        fallback: T,
        reason: String,
        retry_after: Option<Duration>,
    },
}

/// Execute an operation with retry logic
///
/// Uses exponential backoff: if an attempt reports a transient failure, we
/// wait progressively longer before trying again. A server-supplied
/// `retry_after` wins over the computed delay, capped at `max_delay_ms`.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, mut operation: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Attempt<T>>,
{
    let max_attempts = config.max_attempts.clamp(1, MAX_ATTEMPTS);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Attempt::Done(result) => {
                if attempt > 1 {
                    debug!("Request succeeded after {} retries", attempt - 1);
                }
                return result;
            }
            Attempt::Retry {
                fallback,
                reason,
                retry_after,
            } => {
                if attempt >= max_attempts {
                    warn!("Request failed after {} attempts: {}", max_attempts, reason);
                    return fallback;
                }

                let cap = Duration::from_millis(config.max_delay_ms);
                let delay = retry_after
                    .map(|hint| hint.min(cap))
                    .unwrap_or_else(|| config.delay_after(attempt));

                warn!(
                    "Request failed (attempt {}/{}): {}. Retrying in {}ms...",
                    attempt,
                    max_attempts,
                    reason,
                    delay.as_millis()
                );

                sleep(delay).await;
            }
        }
    }
}

/// Check if an HTTP status code is retried by the transport
pub fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    // 403 is deliberately absent: quota exhaustion is reported, not retried
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}
