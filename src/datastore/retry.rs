//! Exponential backoff for datastore RPCs
//!
//! Only transient errors are retried. Missing relations and everything else
//! surface on the first failure.

use crate::config::IngestConfig;
use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::debug;

/// Retry policy for low-level datastore calls
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, first try included
    pub attempts: usize,
    /// Delay before the first retry; doubles afterwards
    pub base_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl From<&IngestConfig> for RetryPolicy {
    fn from(config: &IngestConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            ..Self::default()
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }

    fn delays(&self) -> impl Iterator<Item = Duration> {
        // ExponentialBackoff yields base^n; base 2 scaled by factor gives
        // base_delay, 2*base_delay, 4*base_delay, ...
        let factor = (self.base_delay.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .map(jitter)
            .take(self.attempts.saturating_sub(1))
    }

    /// Run `action`, retrying transient failures
    pub async fn run<T, F, Fut>(&self, operation: &'static str, action: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        RetryIf::spawn(self.delays(), action, |err: &Error| {
            let retry = err.is_transient();
            if retry {
                debug!(operation, error = %err, "Transient datastore error, retrying");
            }
            retry
        })
        .await
    }
}
