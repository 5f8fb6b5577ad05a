use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-source request quota shared by every dispatch slot of that source.
///
/// A gate built from a zero quota never waits.
#[derive(Clone, Default)]
pub struct RateGate {
    limiter: Option<Arc<DirectRateLimiter>>,
}

impl std::fmt::Debug for RateGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateGate")
            .field("limited", &self.is_limited())
            .finish()
    }
}

impl RateGate {
    /// Allow `quota` requests per minute with a burst of the same size.
    pub fn per_minute(quota: u32) -> Self {
        Self {
            limiter: NonZeroU32::new(quota)
                .map(|quota| Arc::new(RateLimiter::direct(Quota::per_minute(quota)))),
        }
    }

    pub fn unlimited() -> Self {
        Self { limiter: None }
    }

    pub const fn is_limited(&self) -> bool {
        self.limiter.is_some()
    }

    /// Take one cell if available without waiting.
    pub fn try_acquire(&self) -> bool {
        self.limiter
            .as_ref()
            .map_or(true, |limiter| limiter.check().is_ok())
    }

    /// Wait until the quota admits one more request.
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.limiter {
            if limiter.check().is_err() {
                tracing::debug!("request quota exhausted, waiting for next cell");
                limiter.until_ready().await;
            }
        }
    }
}

/// Fixed pause a dispatch slot takes after each request it sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pacing {
    delay: Duration,
}

impl Pacing {
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub const fn none() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    pub const fn delay(self) -> Duration {
        self.delay
    }

    pub async fn pause(self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}
