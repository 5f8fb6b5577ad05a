//! Retry logic with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use crate::fetch::{SourceError, SourceErrorKind};

/// Backoff strategy between attempts of one logical fetch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between attempts.
    Fixed {
        /// Delay between attempts.
        delay: Duration,
    },
    /// Uses an exponential delay between attempts.
    ///
    /// The delay before retry `n` (1-based) is `base * factor^(n-1)`, capped at `max`.
    Exponential {
        /// The delay before the first retry.
        base: Duration,
        /// The multiplicative factor for each subsequent retry.
        factor: f64,
        /// The maximum duration to wait between attempts.
        max: Duration,
        /// Whether to scale the delay by a uniform random factor in `[0.5, 1.0]`.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            factor: 2.0,
            max: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay to wait before retry number `retry` (1 for the second attempt).
    pub fn delay(self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.powi(exponent);
                let capped = if seconds.is_finite() {
                    seconds.min(max.as_secs_f64())
                } else {
                    max.as_secs_f64()
                };

                let scaled = if jitter {
                    capped * (0.5 + fastrand::f64() * 0.5)
                } else {
                    capped
                };
                Duration::from_secs_f64(scaled.max(0.0))
            }
        }
    }
}

/// Bounded retry around one fallible upstream call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first try. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Error kinds that may trigger another attempt.
    pub retry_on: Vec<SourceErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            retry_on: vec![SourceErrorKind::UpstreamUnavailable],
        }
    }
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, base: Duration, factor: f64, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                base,
                factor,
                max,
                jitter: true,
            },
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed { delay },
            ..Self::default()
        }
    }

    /// Single attempt, never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        if let Backoff::Exponential { jitter, .. } = &mut self.backoff {
            *jitter = false;
        }
        self
    }

    pub fn should_retry(&self, error: &SourceError) -> bool {
        error.retryable() && self.retry_on.contains(&error.kind())
    }

    /// Delay before the zero-based attempt index `attempt` (only meaningful for `attempt >= 1`).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent. The returned error carries the attempt count.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 0_u32;

        loop {
            attempts += 1;
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if attempts >= max_attempts || !self.should_retry(&error) {
                return Err(error.with_attempts(attempts));
            }

            let delay = self.delay_before(attempts);
            tracing::warn!(
                attempt = attempts,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "retrying upstream call"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
