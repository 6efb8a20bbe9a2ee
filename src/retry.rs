//! Bounded retry with exponential backoff for single logical operations.
//!
//! Transient failures cost at most `attempts - 1` waits; the caller turns the
//! final error into a single failed audit entry and drops the item rather
//! than re-queueing it.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Runs `attempt` up to `policy.attempts` times, sleeping `base_delay`,
/// `2 * base_delay`, ... between tries. Returns the last error once the
/// attempts are exhausted.
pub async fn with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut attempt: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut delay = policy.base_delay;
    let mut tries = 0u32;

    loop {
        tries += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if tries < policy.attempts.max(1) => {
                tracing::warn!(
                    %err,
                    operation,
                    attempt = tries,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}
