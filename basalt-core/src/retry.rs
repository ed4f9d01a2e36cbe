//! Bounded retry with exponential backoff and per-call timeouts

use std::future::Future;
use std::time::Duration;

use log::warn;

use crate::cloud::{CloudError, CloudResult};

/// Upper bound on a single backoff delay
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Largest accepted backoff multiplier
pub const MAX_MULTIPLIER: f64 = 10.0;

/// How cloud calls are retried
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    /// Timeout applied to every single call
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based), capped at
    /// `MAX_BACKOFF`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        match Duration::try_from_secs_f64(secs) {
            Ok(delay) => delay.min(MAX_BACKOFF),
            Err(_) => MAX_BACKOFF,
        }
    }

    /// Run `f` under the call timeout, retrying transient failures
    ///
    /// Timeouts are reported as `CloudError::Timeout` and retried like
    /// connectivity errors. Any other error is returned unchanged.
    pub async fn call<T, F, Fut>(&self, operation: &str, mut f: F) -> CloudResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CloudResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let error = match tokio::time::timeout(self.call_timeout, f()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => CloudError::Timeout {
                    operation: operation.to_string(),
                    secs: self.call_timeout.as_secs(),
                },
            };

            if !error.is_transient() || attempt >= self.max_attempts {
                return Err(error);
            }

            let delay = self.backoff(attempt);
            warn!(
                "{} failed (attempt {}/{}): {}; retrying in {:?}",
                operation, attempt, self.max_attempts, error, delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
