use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryPolicy;
use crate::source::SourceId;
use crate::throttling::{Pacing, RateGate};

/// Everything that bounds how hard one source is hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePolicy {
    pub source: SourceId,
    pub max_concurrency: usize,
    pub pacing: Duration,
    /// Requests per minute; 0 disables the quota.
    pub quota_per_minute: u32,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
}

impl SourcePolicy {
    pub fn default_for(source: SourceId) -> Self {
        Self {
            source,
            max_concurrency: 5,
            pacing: Duration::from_millis(100),
            quota_per_minute: 60,
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
        }
    }

    /// No pacing, no quota and no jitter; handy for deterministic runs.
    pub fn unthrottled(source: SourceId) -> Self {
        Self {
            pacing: Duration::ZERO,
            quota_per_minute: 0,
            retry: RetryPolicy::default().without_jitter(),
            ..Self::default_for(source)
        }
    }

    #[must_use]
    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn pacer(&self) -> Pacing {
        Pacing::new(self.pacing)
    }

    pub fn rate_gate(&self) -> RateGate {
        RateGate::per_minute(self.quota_per_minute)
    }

    /// Concurrency never drops below one slot.
    pub fn slots(&self) -> usize {
        self.max_concurrency.max(1)
    }
}
