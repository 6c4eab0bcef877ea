//! Retry Policy
//!
//! Exponential backoff with a delay cap, shared by the vision model client
//! and the LLM gateway. Retries only errors the gateway marks retryable.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::domain::gateways::{GatewayError, GatewayResult};

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Per-call timeout.
    pub call_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Delay before the retry following `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        exponential.min(self.max_delay)
    }
}

/// Executes an async operation with timeout and bounded retry.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    op: F,
) -> GatewayResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    let mut last_error: Option<GatewayError> = None;

    for attempt in 0..config.max_attempts {
        let result = match tokio::time::timeout(config.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(format!(
                "{operation} exceeded {:?}",
                config.call_timeout
            ))),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < config.max_attempts => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Gateway call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error
        .unwrap_or_else(|| GatewayError::Transport(format!("{operation} failed with no attempts"))))
}
