//! Retry policy for transient completion errors

use std::time::Duration;

use sheetwise_config::RetryConfig;
use sheetwise_providers::ProviderError;

/// Exponential backoff configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,
    /// Backoff factor (e.g., 2.0 for exponential)
    pub backoff_factor: f64,
    /// Maximum delay for a single wait in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay_ms: config.initial_delay_ms,
            backoff_factor: config.backoff_factor,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            backoff_factor: 1.0,
            max_delay_ms: 0,
        }
    }

    /// Calculate delay before retry `attempt` (1-based count of failures so far)
    ///
    /// A rate-limit response carrying a retry-after hint wins over the
    /// exponential schedule; both are capped at `max_delay_ms`.
    pub fn calculate_delay(&self, attempt: u32, error: &ProviderError) -> Duration {
        if let ProviderError::RateLimited(secs) = error {
            if *secs > 0 {
                return Duration::from_millis(secs.saturating_mul(1000).min(self.max_delay_ms));
            }
        }

        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms = (self.initial_delay_ms as f64 * self.backoff_factor.powi(exponent)) as u64;
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    /// Whether another attempt should follow `attempt` failed ones
    pub fn should_retry(&self, attempt: u32, error: &ProviderError) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }
}
