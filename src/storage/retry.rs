//! Retry budget for the durable counter's compare-and-swap loop.

use backon::ExponentialBuilder;
use std::time::Duration;

/// Exponential backoff settings for compare-and-swap retries.
///
/// The loop makes at most `max_retries + 1` attempts. Both lost races and
/// retryable storage faults consume the same budget.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first.
    pub max_retries: usize,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 32,
            initial_delay_ms: 1,
            max_delay_ms: 50,
        }
    }
}

impl RetryConfig {
    /// Creates a RetryConfig from environment variables.
    ///
    /// Environment variables:
    /// - `SEQLEASE_CAS_MAX_RETRIES`: Maximum retry attempts (default: 32)
    /// - `SEQLEASE_CAS_RETRY_INITIAL_MS`: Initial backoff delay in ms (default: 1)
    /// - `SEQLEASE_CAS_RETRY_MAX_MS`: Maximum backoff delay in ms (default: 50)
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_retries: env_or("SEQLEASE_CAS_MAX_RETRIES", default.max_retries),
            initial_delay_ms: env_or("SEQLEASE_CAS_RETRY_INITIAL_MS", default.initial_delay_ms),
            max_delay_ms: env_or("SEQLEASE_CAS_RETRY_MAX_MS", default.max_delay_ms),
        }
    }

    /// Total attempts the loop is allowed, including the first.
    pub fn max_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }

    /// Creates an exponential backoff builder with jitter.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}

pub(crate) fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
