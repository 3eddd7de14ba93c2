//! Bounded exponential-backoff retry.
//!
//! Authorization, not-found and local caller errors (bad arguments, cycles,
//! decode failures) are returned from the first attempt. Anything else,
//! including backend failures with no better classification, is retried.

use std::future::Future;
use std::time::Duration;

use folio_api::StoreError;

use crate::config::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Treated as at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay after the failed attempt with zero-based index `attempt`:
    /// `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().policy()
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        config.policy()
    }
}

/// Run `op` until it succeeds, fails with a non-retriable error, or the
/// attempt ceiling is reached; in the last case the final error is returned.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retriable() => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    tracing::warn!(
                        "[retry] {} failed after {} attempts: {}",
                        operation,
                        attempt,
                        e
                    );
                    return Err(e);
                }
                let delay = policy.delay_for(attempt - 1);
                tracing::warn!(
                    "[retry] {} failed on attempt {}/{}, retrying in {:?}: {}",
                    operation,
                    attempt,
                    max_attempts,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
