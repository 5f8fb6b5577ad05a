use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::fetch::{SourceError, SourceErrorKind};

/// Runtime circuit state for one upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Which error kinds count as breaker failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureClasses {
    pub unavailable: bool,
    pub rejected: bool,
    pub parse: bool,
}

impl FailureClasses {
    /// Every failure the upstream itself is responsible for.
    pub const fn upstream() -> Self {
        Self {
            unavailable: true,
            rejected: true,
            parse: true,
        }
    }

    pub const fn counts(self, kind: SourceErrorKind) -> bool {
        match kind {
            SourceErrorKind::UpstreamUnavailable => self.unavailable,
            SourceErrorKind::UpstreamRejected => self.rejected,
            SourceErrorKind::Parse => self.parse,
            SourceErrorKind::CircuitOpen | SourceErrorKind::Internal => false,
        }
    }
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    /// Time since the last failure after which an open circuit admits a probe.
    pub recovery_timeout: Duration,
    pub trips_on: FailureClasses,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            trips_on: FailureClasses::upstream(),
        }
    }
}

/// Point-in-time view of a breaker for stats and health output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub transitions: u64,
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    transitions: u64,
}

/// Per-source failure isolation.
///
/// `call` never waits on the breaker itself: it either rejects immediately
/// with a `CircuitOpen` error or runs the operation. The lock is never held
/// across an await point.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new("default", CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                transitions: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// Run `operation` through the breaker.
    ///
    /// While HALF_OPEN every error reopens the circuit, including kinds that
    /// do not count towards the threshold when CLOSED.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        self.admit()?;

        let result = operation().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(error)
                if self.config.trips_on.counts(error.kind())
                    || self.state() == CircuitState::HalfOpen =>
            {
                self.record_failure();
            }
            Err(_) => {}
        }
        result
    }

    /// Decide whether a call may proceed, moving OPEN to HALF_OPEN once the recovery timeout has passed.
    fn admit(&self) -> Result<(), SourceError> {
        let mut inner = self.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let recovered = inner
            .last_failure
            .map_or(true, |at| at.elapsed() > self.config.recovery_timeout);
        if !recovered {
            tracing::debug!(breaker = %self.name, "short-circuiting call while open");
            return Err(SourceError::circuit_open(&self.name));
        }

        self.transition(&mut inner, CircuitState::HalfOpen);
        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        let should_open = inner.state == CircuitState::HalfOpen
            || inner.failure_count >= self.config.failure_threshold;
        if should_open && inner.state != CircuitState::Open {
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            transitions: inner.transitions,
        }
    }

    fn transition(&self, inner: &mut CircuitInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.transitions += 1;

        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                ?from,
                failures = inner.failure_count,
                recovery_secs = self.config.recovery_timeout.as_secs_f64(),
                "circuit opened"
            ),
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, ?from, "circuit half-open, probing")
            }
            CircuitState::Closed => tracing::info!(breaker = %self.name, ?from, "circuit closed"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
