use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::adapters::{check_status, SourceEndpoint};
use crate::circuit_breaker::CircuitBreaker;
use crate::domain::RawRecord;
use crate::fetch::{FetchKey, FetchOutcome, FetchRequest, SourceError};
use crate::health::HealthRecord;
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::orchestrator::FetchOrchestrator;
use crate::retry::RetryPolicy;
use crate::source::SourceId;
use crate::source_policy::SourcePolicy;
use crate::stats::{FetchStats, StatsSnapshot};
use crate::throttling::RateGate;

/// One upstream source behind its own breaker, retry policy, quota and stats.
///
/// A logical fetch is `breaker.call(retry.execute(transport))`: retries happen
/// inside one breaker outcome, and an open breaker skips them entirely.
///
/// Sources with a session page get it loaded by [`SourceAdapter::prime_session`]
/// and reloaded whenever the API answers 401/403. Each reload bumps
/// `session_epoch`, so concurrent rejections of the same session renew it once.
pub struct SourceAdapter {
    endpoint: Arc<dyn SourceEndpoint>,
    http_client: Arc<dyn HttpClient>,
    breaker: Arc<CircuitBreaker>,
    stats: Arc<FetchStats>,
    retry: RetryPolicy,
    rate_gate: RateGate,
    request_timeout: Duration,
    orchestrator: FetchOrchestrator,
    session_epoch: AtomicU64,
    session_lock: Mutex<()>,
}

impl std::fmt::Debug for SourceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceAdapter")
            .field("source", &self.source())
            .field("breaker", &self.breaker.snapshot())
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl SourceAdapter {
    pub fn new(
        endpoint: Arc<dyn SourceEndpoint>,
        http_client: Arc<dyn HttpClient>,
        policy: &SourcePolicy,
    ) -> Self {
        let breaker = CircuitBreaker::new(endpoint.source().as_str(), policy.breaker);
        Self {
            endpoint,
            http_client,
            breaker: Arc::new(breaker),
            stats: Arc::new(FetchStats::new()),
            retry: policy.retry.clone(),
            rate_gate: policy.rate_gate(),
            request_timeout: policy.request_timeout,
            orchestrator: FetchOrchestrator::from_policy(policy),
            session_epoch: AtomicU64::new(0),
            session_lock: Mutex::new(()),
        }
    }

    /// Share a breaker owned elsewhere, e.g. one that outlives this adapter.
    #[must_use]
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    #[must_use]
    pub fn with_stats(mut self, stats: Arc<FetchStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn source(&self) -> SourceId {
        self.endpoint.source()
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.source(), self.breaker.snapshot())
    }

    pub async fn fetch_one(&self, request: FetchRequest) -> FetchOutcome {
        let result = self.fetch_record(&request).await;
        self.stats.record_outcome(&result);
        if let Err(error) = &result {
            tracing::debug!(
                source = %self.source(),
                key = %request.key,
                error = %error,
                "fetch failed"
            );
        }
        FetchOutcome::from_result(request, result)
    }

    /// Fetch a batch under this source's concurrency bound and pacing.
    pub async fn fetch_many(&self, requests: Vec<FetchRequest>) -> Vec<FetchOutcome> {
        self.orchestrator
            .run(requests, |request| self.fetch_one(request))
            .await
    }

    /// Load the session page so the following API calls carry fresh cookies.
    ///
    /// Bypasses the breaker and the stats. Returns `true` when the source needs
    /// no session or the page answered 2xx; a failed load is logged and the
    /// API calls go ahead without it.
    pub async fn prime_session(&self) -> bool {
        let _guard = self.session_lock.lock().await;
        self.load_session().await
    }

    /// Number of session loads so far.
    pub fn session_epoch(&self) -> u64 {
        self.session_epoch.load(Ordering::Acquire)
    }

    /// Lightweight reachability check. Bypasses the breaker and the stats.
    pub async fn test_connectivity(&self) -> bool {
        let request = self.endpoint.probe_request();
        match self.transport(request, self.request_timeout).await {
            Ok(response) => response.is_success(),
            Err(error) => {
                tracing::debug!(source = %self.source(), error = %error, "connectivity probe failed");
                false
            }
        }
    }

    /// Time one market-status call outside the breaker; `None` when the source has no status feed.
    pub async fn probe_status(&self, degraded_after: Duration) -> Option<HealthRecord> {
        let request = self.endpoint.status_request()?;
        let started = Instant::now();
        let result = match self.transport(request, self.request_timeout).await {
            Ok(response) => check_status(self.source(), &response)
                .and_then(|()| self.endpoint.parse_status(&response)),
            Err(error) => Err(error),
        };
        let elapsed = started.elapsed();

        Some(HealthRecord::from_probe(
            self.source(),
            result,
            elapsed,
            self.breaker.state(),
            degraded_after,
        ))
    }

    async fn fetch_record(&self, request: &FetchRequest) -> Result<RawRecord, SourceError> {
        if request.source != self.source() {
            return Err(SourceError::internal(format!(
                "{} request routed to {} adapter",
                request.source,
                self.source()
            )));
        }

        let timeout = request.timeout.unwrap_or(self.request_timeout);
        self.breaker
            .call(|| self.retry.execute(|| self.attempt(&request.key, timeout)))
            .await
    }

    /// One transport round-trip plus parsing.
    async fn attempt(&self, key: &FetchKey, timeout: Duration) -> Result<RawRecord, SourceError> {
        let request = self.endpoint.build_request(key)?;
        self.rate_gate.acquire().await;
        self.stats.record_attempt();

        let epoch = self.session_epoch();
        let response = self.transport(request, timeout).await?;
        if response.is_auth_rejection() && self.endpoint.session_request().is_some() {
            self.renew_session(epoch).await;
            return Err(SourceError::unavailable(format!(
                "{} rejected the session with status {}",
                self.source(),
                response.status
            )));
        }
        check_status(self.source(), &response)?;
        self.endpoint.parse_response(key, &response)
    }

    /// Reload the session unless another task already did since `seen_epoch`.
    async fn renew_session(&self, seen_epoch: u64) {
        let _guard = self.session_lock.lock().await;
        if self.session_epoch() != seen_epoch {
            return;
        }
        tracing::info!(source = %self.source(), "session rejected, reloading");
        self.load_session().await;
    }

    /// Caller holds `session_lock`.
    async fn load_session(&self) -> bool {
        let Some(request) = self.endpoint.session_request() else {
            return true;
        };
        let source = self.source();
        let loaded = match self.transport(request, self.request_timeout).await {
            Ok(response) if response.is_success() => true,
            Ok(response) => {
                tracing::warn!(source = %source, status = response.status, "session page refused");
                false
            }
            Err(error) => {
                tracing::warn!(source = %source, error = %error, "session page unreachable");
                false
            }
        };
        self.session_epoch.fetch_add(1, Ordering::AcqRel);
        loaded
    }

    async fn transport(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, SourceError> {
        let source = self.source();
        let request = request.with_timeout(timeout);

        match tokio::time::timeout(timeout, self.http_client.execute(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(error)) if error.retryable() => Err(SourceError::unavailable(format!(
                "{source} transport error: {}",
                error.message()
            ))),
            Ok(Err(error)) => Err(SourceError::rejected(format!(
                "{source} transport error: {}",
                error.message()
            ))),
            Err(_) => Err(SourceError::unavailable(format!(
                "{source} request timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }
}
