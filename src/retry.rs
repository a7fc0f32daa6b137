//! Retry Policy (§4.5): pure computation deciding whether a particular
//! error/attempt pair should retry and the delay to wait before doing so.

use crate::error::Error;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior. Immutable value type with
/// `with_*`-style consuming builder methods.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
    pub retryable_status_codes: HashSet<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            retryable_status_codes: [429, 500, 502, 503, 504].into_iter().collect(),
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    /// Checks the preconditions `backoffMultiplier >= 1.0` per §6; the
    /// builder already clamps `jitterFactor` to `[0, 1]` on assignment.
    pub fn validate(&self) -> crate::Result<()> {
        if self.backoff_multiplier < 1.0 {
            return Err(Error::config("backoffMultiplier must be >= 1.0"));
        }
        Ok(())
    }

    /// `delay(attempt) = min(initialDelay * multiplier^attempt, maxDelay) * (1 +
    /// jitter)` where `jitter` is drawn from `[-jitterFactor, +jitterFactor]`.
    ///
    /// A negative attempt number yields zero delay.
    pub fn get_delay(&self, attempt: i64) -> Duration {
        if attempt < 0 {
            return Duration::ZERO;
        }

        let base_delay_ms = self.initial_delay.as_millis() as f64;
        let exponential_delay = base_delay_ms * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = exponential_delay.min(self.max_delay.as_millis() as f64);

        if self.jitter_factor == 0.0 {
            return Duration::from_millis(capped_delay.max(0.0) as u64);
        }

        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * self.jitter_factor;
        let final_delay = capped_delay * (1.0 + jitter);
        Duration::from_millis(final_delay.max(0.0) as u64)
    }

    /// Whether `error` at `attempt` should be retried: the error's own
    /// taxonomy classification must say retryable, and attempts must
    /// remain.
    pub fn should_retry(&self, error: &Error, attempt: u32) -> bool {
        if self.max_attempts == 0 {
            return false;
        }
        attempt < self.max_attempts && error.is_retryable()
    }

    /// Whether `code` is in the configurable retryable-status-code set
    /// (default `{429, 500, 502, 503, 504}`).
    pub fn should_retry_status_code(&self, code: u16) -> bool {
        self.retryable_status_codes.contains(&code)
    }
}

/// Retry an async operation with exponential backoff, stopping early on
/// a non-retryable error.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut last_error = None;
    let mut attempt = 0u32;

    loop {
        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(err) => {
                let retry = config.should_retry(&err, attempt);
                last_error = Some(err);
                if !retry {
                    break;
                }
                let delay = config.get_delay(attempt as i64);
                sleep(delay).await;
                attempt += 1;
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::stream("retry failed with no recorded error")))
}
