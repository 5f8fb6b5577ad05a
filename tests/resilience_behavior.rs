//! Behavior-driven tests for the resilience layer
//!
//! These tests verify HOW one source reacts to a degrading upstream: when the
//! breaker opens and recovers, how long retries wait, and how a batch survives
//! partial failure. Time is paused so every boundary is exact.

mod support;

use std::cell::RefCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use marketpulse_core::{
    Backoff, CircuitBreaker, CircuitBreakerConfig, CircuitState, CoordinatorSettings,
    CycleRequest, FetchRequest, RefreshCoordinator, RetryPolicy, SourceError, SourceErrorKind,
    SourceId, SourcePolicy, Symbol, Warehouse, WarehouseConfig,
};
use tempfile::tempdir;
use tokio::time::{advance, Instant};

use support::{adapter, quote_body, FakeUpstream, MARKET_OPEN};

fn breaker(threshold: u32, recovery: Duration) -> CircuitBreaker {
    CircuitBreaker::new(
        "EX_A",
        CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: recovery,
            ..CircuitBreakerConfig::default()
        },
    )
}

async fn fail(breaker: &CircuitBreaker) -> Result<(), SourceError> {
    breaker
        .call(|| async { Err::<(), _>(SourceError::unavailable("503")) })
        .await
}

async fn succeed(breaker: &CircuitBreaker) -> Result<(), SourceError> {
    breaker.call(|| async { Ok(()) }).await
}

fn symbol_request(symbol: &str) -> FetchRequest {
    FetchRequest::quote(SourceId::ExchangeA, Symbol::parse(symbol).expect("symbol"))
}

// =============================================================================
// Circuit breaker: opening
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_failures_reach_the_threshold_the_nth_failure_opens_the_circuit() {
    for threshold in 1..=6 {
        // Given: A closed breaker with threshold N
        let breaker = breaker(threshold, Duration::from_secs(30));

        // When: N - 1 calls fail
        for _ in 1..threshold {
            let _ = fail(&breaker).await;
        }

        // Then: It is still closed, and the N-th failure opens it
        assert_eq!(breaker.state(), CircuitState::Closed, "threshold {threshold}");
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open, "threshold {threshold}");
        assert_eq!(breaker.failure_count(), threshold);
    }
}

#[tokio::test(start_paused = true)]
async fn when_a_success_interrupts_failures_the_count_starts_over() {
    // Given: A breaker one failure away from opening
    let breaker = breaker(3, Duration::from_secs(30));
    let _ = fail(&breaker).await;
    let _ = fail(&breaker).await;

    // When: A call succeeds
    succeed(&breaker).await.expect("success");

    // Then: Two more failures are not enough to open it
    let _ = fail(&breaker).await;
    let _ = fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn when_the_circuit_is_open_calls_fail_fast_without_running() {
    // Given: An open breaker
    let breaker = breaker(1, Duration::from_secs(30));
    let _ = fail(&breaker).await;
    let invoked = AtomicU32::new(0);
    let counter = &invoked;

    // When: Another call arrives
    let result = breaker
        .call(|| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

    // Then: It is rejected with CircuitOpen and the operation never runs
    let error = result.expect_err("short-circuited");
    assert_eq!(error.kind(), SourceErrorKind::CircuitOpen);
    assert!(!error.retryable());
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Circuit breaker: recovery
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_recovery_timeout_has_not_passed_the_circuit_stays_open() {
    // Given: A breaker opened with a 30s recovery timeout
    let breaker = breaker(1, Duration::from_secs(30));
    let _ = fail(&breaker).await;

    // When: A call is made just before the timeout
    advance(Duration::from_secs(30) - Duration::from_millis(1)).await;
    let early = succeed(&breaker).await;

    // Then: It is short-circuited
    assert_eq!(
        early.expect_err("still open").kind(),
        SourceErrorKind::CircuitOpen
    );
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn when_recovery_timeout_has_passed_one_probe_is_let_through() {
    // Given: A breaker opened with a 30s recovery timeout
    let breaker = breaker(1, Duration::from_secs(30));
    let _ = fail(&breaker).await;
    let observed = std::sync::Mutex::new(None);
    let (slot, probed) = (&observed, &breaker);

    // When: A call is made just after the timeout
    advance(Duration::from_secs(30) + Duration::from_millis(1)).await;
    let result = breaker
        .call(|| async move {
            *slot.lock().expect("observed") = Some(probed.state());
            Ok(())
        })
        .await;

    // Then: It runs as a HALF_OPEN probe and its success closes the circuit
    result.expect("probe allowed");
    assert_eq!(
        *observed.lock().expect("observed"),
        Some(CircuitState::HalfOpen)
    );
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn when_the_half_open_probe_fails_the_circuit_reopens_immediately() {
    // Given: A breaker with threshold 3 that opened and then recovered
    let breaker = breaker(3, Duration::from_secs(10));
    for _ in 0..3 {
        let _ = fail(&breaker).await;
    }
    advance(Duration::from_secs(11)).await;

    // When: The probe fails
    let _ = fail(&breaker).await;

    // Then: The circuit is open again, and the next call short-circuits
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(breaker.failure_count() >= 3);
    assert_eq!(
        succeed(&breaker).await.expect_err("open").kind(),
        SourceErrorKind::CircuitOpen
    );
}

// =============================================================================
// Retry policy
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_retrying_without_jitter_delays_are_exactly_one_then_two_seconds() {
    // Given: maxAttempts=3, base 1s, multiplier 2, max 10s, no jitter
    let policy = RetryPolicy {
        max_attempts: 3,
        backoff: Backoff::Exponential {
            base: Duration::from_secs(1),
            factor: 2.0,
            max: Duration::from_secs(10),
            jitter: false,
        },
        ..RetryPolicy::default()
    };
    let started = Instant::now();
    let stamps = RefCell::new(Vec::new());

    // When: Every attempt fails with a retryable error
    let result: Result<(), SourceError> = policy
        .execute(|| {
            stamps.borrow_mut().push(started.elapsed());
            async { Err(SourceError::unavailable("timeout")) }
        })
        .await;

    // Then: Attempts happen at 0s, 1s and 3s and the error records 3 attempts
    assert_eq!(
        *stamps.borrow(),
        vec![
            Duration::ZERO,
            Duration::from_secs(1),
            Duration::from_secs(3)
        ]
    );
    let error = result.expect_err("exhausted");
    assert_eq!(error.attempts(), 3);
    assert_eq!(error.summary(), "UpstreamUnavailable after 3 attempts");
}

#[tokio::test(start_paused = true)]
async fn when_jitter_is_enabled_each_delay_stays_within_half_to_full() {
    // Given: Jittered exponential backoff capped at 10s
    let backoff = Backoff::Exponential {
        base: Duration::from_secs(1),
        factor: 2.0,
        max: Duration::from_secs(10),
        jitter: true,
    };

    // When / Then: Each sampled delay lies in [0.5, 1.0] of its nominal value
    for (retry, nominal) in [(1, 1.0), (2, 2.0), (3, 4.0), (4, 8.0), (5, 10.0)] {
        for _ in 0..50 {
            let delay = backoff.delay(retry).as_secs_f64();
            assert!(
                delay >= nominal * 0.5 - 1e-9 && delay <= nominal + 1e-9,
                "retry {retry}: {delay}s outside [{}, {nominal}]",
                nominal * 0.5
            );
        }
    }
}

// =============================================================================
// Source adapter: breaker around retries
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_six_fetches_fail_against_threshold_five_the_sixth_never_touches_the_network() {
    // Given: An upstream that is down and a source with threshold 5 and 3 attempts per fetch
    let upstream = FakeUpstream::new();
    upstream.route("symbol=", 503, "service unavailable");
    let source = adapter(
        SourceId::ExchangeA,
        &upstream,
        SourcePolicy::unthrottled(SourceId::ExchangeA),
    );

    // When: Five fetches fail after their full retry budget
    for _ in 0..5 {
        let outcome = source.fetch_one(symbol_request("TCS")).await;
        assert_eq!(
            outcome.error().map(SourceError::kind),
            Some(SourceErrorKind::UpstreamUnavailable)
        );
    }
    let calls_before = upstream.calls();

    // Then: Each fetch counted once, and the sixth short-circuits without I/O
    assert_eq!(calls_before, 15);
    assert_eq!(source.circuit_breaker().state(), CircuitState::Open);

    let sixth = source.fetch_one(symbol_request("TCS")).await;
    assert_eq!(
        sixth.error().map(SourceError::kind),
        Some(SourceErrorKind::CircuitOpen)
    );
    assert_eq!(upstream.calls(), calls_before);

    let stats = source.stats();
    assert_eq!(stats.fetch_count, 6);
    assert_eq!(stats.error_count, 6);
    assert_eq!(stats.short_circuited, 1);
    assert_eq!(stats.attempts, 15);
    assert_eq!(stats.success_rate, 0.0);
}

#[tokio::test(start_paused = true)]
async fn when_connectivity_probes_fail_the_hot_path_breaker_is_untouched() {
    // Given: A status endpoint that drops connections
    let upstream = FakeUpstream::new();
    upstream.drop_connections("marketStatus");
    let policy = SourcePolicy::unthrottled(SourceId::ExchangeA).with_breaker(CircuitBreakerConfig {
        failure_threshold: 1,
        ..CircuitBreakerConfig::default()
    });
    let source = adapter(SourceId::ExchangeA, &upstream, policy);

    // When: Connectivity is probed repeatedly
    for _ in 0..3 {
        assert!(!source.test_connectivity().await);
    }

    // Then: The breaker never counted a failure
    assert_eq!(source.circuit_breaker().state(), CircuitState::Closed);
    assert_eq!(source.circuit_breaker().failure_count(), 0);
}

// =============================================================================
// Fetch orchestration
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_one_of_ten_requests_always_fails_the_batch_still_returns_ten_outcomes() {
    // Given: Ten symbols, concurrency 5, and one symbol whose upstream is always down
    let upstream = FakeUpstream::new();
    upstream.route("symbol=SYM3", 503, "down");
    for index in 0..10 {
        let symbol = format!("SYM{index}");
        upstream.route(&format!("symbol={symbol}"), 200, &quote_body(&symbol, 100.0));
    }
    let source = adapter(
        SourceId::ExchangeA,
        &upstream,
        SourcePolicy::unthrottled(SourceId::ExchangeA).with_concurrency(5),
    );
    let requests = (0..10)
        .map(|index| symbol_request(&format!("SYM{index}")))
        .collect::<Vec<_>>();

    // When: The batch is fetched
    let outcomes = source.fetch_many(requests).await;

    // Then: 9 successes and 1 failure, each request dispatched exactly once per attempt
    assert_eq!(outcomes.len(), 10);
    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_success()).count(), 9);
    let failed = outcomes
        .iter()
        .find(|outcome| !outcome.is_success())
        .expect("one failure");
    assert_eq!(failed.request().key.to_string(), "SYM3");
    assert!(failed.retryable());
    assert_eq!(upstream.calls_to("symbol=SYM3"), 3);
    assert_eq!(upstream.calls(), 9 + 3);
}

#[tokio::test(start_paused = true)]
async fn when_pacing_is_configured_each_slot_waits_between_dispatches() {
    // Given: Two slots, 200ms pacing and four instant upstream replies
    let upstream = FakeUpstream::new();
    upstream.route("marketStatus", 200, MARKET_OPEN);
    for symbol in ["A", "B", "C", "D"] {
        upstream.route(&format!("symbol={symbol}"), 200, &quote_body(symbol, 10.0));
    }
    let mut policy = SourcePolicy::unthrottled(SourceId::ExchangeA).with_concurrency(2);
    policy.pacing = Duration::from_millis(200);
    let source = adapter(SourceId::ExchangeA, &upstream, policy);
    let started = Instant::now();

    // When: Four requests are fetched
    let outcomes = source
        .fetch_many(["A", "B", "C", "D"].map(symbol_request).to_vec())
        .await;

    // Then: Each slot served two requests back to back with a pause after each
    assert_eq!(outcomes.len(), 4);
    assert_eq!(started.elapsed(), Duration::from_millis(400));
}

// =============================================================================
// Exchange session
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_a_cycle_starts_the_exchange_home_page_is_loaded_before_any_api_call() {
    // Given: EX_A with a home page that sets session cookies, and a coordinator over a real warehouse
    let temp = tempdir().expect("tempdir");
    let warehouse = Arc::new(
        Warehouse::open(WarehouseConfig::at(temp.path().join("session.duckdb"))).expect("open"),
    );
    let upstream = FakeUpstream::new();
    upstream.route("symbol=TCS", 200, &quote_body("TCS", 3_890.5));
    upstream.route("symbol=INFY", 200, &quote_body("INFY", 1_500.0));
    upstream.route("marketStatus", 200, MARKET_OPEN);
    upstream.route("https://ex-a.test/", 200, "<html>home</html>");
    let coordinator = RefreshCoordinator::new(warehouse, CoordinatorSettings::default())
        .with_adapter(adapter(
            SourceId::ExchangeA,
            &upstream,
            SourcePolicy::unthrottled(SourceId::ExchangeA),
        ));
    let request = CycleRequest::all()
        .with_sources([SourceId::ExchangeA])
        .with_symbols(Symbol::parse_all(&["TCS", "INFY"]).expect("symbols"));

    // When: Two cycles run back to back
    let first = coordinator.run_cycle(request.clone()).await;
    let first_cycle_calls = upstream.calls();
    let second = coordinator.run_cycle(request).await;

    // Then: Each cycle opens with exactly one home page load, ahead of its quote and status calls
    assert!(first.success && second.success);
    let urls = upstream.urls();
    let home_loads = urls
        .iter()
        .enumerate()
        .filter(|(_, url)| url.as_str() == "https://ex-a.test/")
        .map(|(index, _)| index)
        .collect::<Vec<_>>();
    assert_eq!(home_loads, vec![0, first_cycle_calls]);
    assert_eq!(first_cycle_calls, 4);
    assert!(urls[1..first_cycle_calls]
        .iter()
        .all(|url| url.contains("/api/")));
    let session_epoch = coordinator
        .adapter(SourceId::ExchangeA)
        .expect("EX_A registered")
        .session_epoch();
    assert_eq!(session_epoch, 2);
}
