//! Retry with exponential backoff and jitter for calls into inference backends.
//!
//! Each retry issues a brand-new generation request. Generative calls are
//! not idempotent, so a retried call may return different text; making the
//! wrapped operation safe to repeat is the caller's job.

use log::{error, warn};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::core::config::RetrySettings;
use crate::core::error::{ErrorKind, LlmError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound of the uniform random delay added to every backoff.
    pub jitter: Duration,
    pub retry_on: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            jitter: Duration::from_millis(settings.jitter_ms),
            retry_on: settings.retry_on.clone(),
        }
    }
}

impl RetryPolicy {
    pub fn no_delay(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            jitter: Duration::ZERO,
            retry_on: vec![ErrorKind::Transient],
        }
    }

    pub fn with_retry_on(mut self, kinds: Vec<ErrorKind>) -> Self {
        self.retry_on = kinds;
        self
    }

    pub fn should_retry(&self, err: &LlmError) -> bool {
        self.retry_on.contains(&err.kind())
    }

    /// Backoff before retry number `attempt + 1`, without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(rand::rng().random_range(0.0..self.jitter.as_secs_f64()))
        };
        self.delay_for_attempt(attempt) + jitter
    }
}

/// Passed to every attempt so the operation can vary retry-specific parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    /// Zero for the initial call.
    pub number: u32,
}

impl RetryAttempt {
    pub const FIRST: RetryAttempt = RetryAttempt { number: 0 };

    pub fn is_retry(&self) -> bool {
        self.number > 0
    }

    /// Server-side agent sessions collide when reused, so retries get a suffix.
    pub fn session_id(&self, base: &str) -> String {
        if self.is_retry() {
            format!("{}_retry{}", base, self.number)
        } else {
            base.to_string()
        }
    }

    pub fn trace_enabled(&self) -> bool {
        self.is_retry()
    }
}

/// Runs `operation` until it succeeds, fails with a kind outside
/// `policy.retry_on`, or `policy.max_retries + 1` attempts have been made.
/// The last error is returned unchanged.
pub async fn retry_async<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, LlmError>
where
    F: FnMut(RetryAttempt) -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0u32;

    loop {
        match operation(RetryAttempt { number: attempt }).await {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_retry(&e) && attempt < policy.max_retries => {
                let delay = policy.jittered_delay(attempt);
                warn!(
                    "{} failed ({:?}), retry {}/{} in {:.2}s: {}",
                    operation_name,
                    e.kind(),
                    attempt + 1,
                    policy.max_retries,
                    delay.as_secs_f64(),
                    crate::utils::text::take_chars(&e.to_string(), 100)
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if policy.should_retry(&e) {
                    error!(
                        "{} gave up after {} attempts: {}",
                        operation_name,
                        attempt + 1,
                        e
                    );
                } else {
                    error!("{} failed with non-retryable {:?}: {}", operation_name, e.kind(), e);
                }
                return Err(e);
            }
        }
    }
}
