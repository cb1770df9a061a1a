//! Retry with exponential backoff for backend calls.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{GenError, GenResult};

/// Retry policy for generation calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `base * 2^n`.
    pub base_delay: Duration,
    /// Operation name for logging.
    pub operation: String,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            operation: "backend call".to_string(),
        }
    }
}

impl RetryPolicy {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Run an operation under the retry policy.
///
/// Transient failures (5xx, timeout, transport) are retried with
/// exponential backoff; permanent failures (4xx, parse) short-circuit and
/// return immediately.
pub async fn retry<F, Fut, T>(policy: &RetryPolicy, operation: F) -> GenResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = GenResult<T>>,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => {
                debug!("{} failed permanently: {}", policy.operation, e);
                return Err(e);
            }
            Err(e) if attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                attempt += 1;
                warn!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    policy.operation, attempt, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(
                    "{} failed after {} attempts: {}",
                    policy.operation,
                    attempt + 1,
                    e
                );
                return Err(e);
            }
        }
    }
}
