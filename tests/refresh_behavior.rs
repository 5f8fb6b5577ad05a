//! Behavior-driven tests for refresh cycles
//!
//! These tests verify WHAT a refresh cycle leaves behind: the RefreshRun it
//! reports, the rows it upserts, the health and audit rows it appends, and how
//! failures in one source stay contained to that source.

mod support;

use std::sync::Arc;
use std::time::Duration;

use marketpulse_core::{
    CoordinatorSettings, CycleRequest, HealthRecord, InstrumentRow, QueryGuardrails, RawRecord,
    RefreshCoordinator, RefreshRun, RefreshStore, SourceId, SourcePolicy, Symbol, Warehouse,
    WarehouseConfig, WarehouseError,
};
use marketpulse_warehouse::QuoteRow;
use serde_json::Value;
use tempfile::{tempdir, TempDir};
use tokio::time::Instant;

use support::{adapter, quote_body, FakeUpstream, MARKET_OPEN};

fn open_warehouse() -> (TempDir, Arc<Warehouse>) {
    let temp = tempdir().expect("tempdir");
    let warehouse = Warehouse::open(WarehouseConfig::at(temp.path().join("marketpulse.duckdb")))
        .expect("warehouse open");
    (temp, Arc::new(warehouse))
}

fn scalar(warehouse: &Warehouse, sql: &str) -> Value {
    warehouse
        .execute_query(sql, QueryGuardrails::default())
        .expect("query")
        .rows[0][0]
        .clone()
}

fn symbols(values: &[&str]) -> Vec<Symbol> {
    Symbol::parse_all(values).expect("symbols")
}

fn unthrottled(source: SourceId) -> SourcePolicy {
    SourcePolicy::unthrottled(source)
}

/// Delegates to the warehouse but reports an id collision for one source.
struct CollidingStore {
    inner: Arc<Warehouse>,
    collide_on: SourceId,
}

impl RefreshStore for CollidingStore {
    fn upsert_record(&self, id: i64, record: &RawRecord) -> Result<usize, WarehouseError> {
        if record.source() == self.collide_on {
            return Err(WarehouseError::PrimaryKeyCollision {
                table: "quotes",
                id,
                existing: String::from("OTHER/EX_A"),
            });
        }
        self.inner.upsert_record(id, record)
    }

    fn append_health(&self, id: i64, record: &HealthRecord) -> Result<(), WarehouseError> {
        RefreshStore::append_health(self.inner.as_ref(), id, record)
    }

    fn record_run(&self, run: &RefreshRun) -> Result<(), WarehouseError> {
        self.inner.record_run(run)
    }

    fn top_symbols(&self, source: SourceId, limit: usize) -> Result<Vec<String>, WarehouseError> {
        RefreshStore::top_symbols(self.inner.as_ref(), source, limit)
    }

    fn max_row_id(&self) -> Result<i64, WarehouseError> {
        RefreshStore::max_row_id(self.inner.as_ref())
    }
}

// =============================================================================
// Refresh: partial failure
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_one_symbol_keeps_failing_the_run_itemizes_it_and_keeps_the_other() {
    // Given: Symbol A succeeds and symbol B is unavailable on every attempt
    let (_temp, warehouse) = open_warehouse();
    let upstream = FakeUpstream::new();
    upstream.route("symbol=A", 200, &quote_body("A", 100.0));
    upstream.route("symbol=B", 503, "service unavailable");
    upstream.route("marketStatus", 200, MARKET_OPEN);
    let coordinator = RefreshCoordinator::new(warehouse.clone(), CoordinatorSettings::default())
        .with_adapter(adapter(SourceId::ExchangeA, &upstream, unthrottled(SourceId::ExchangeA)));

    // When: A refresh is requested for ["A", "B"]
    let run = coordinator
        .run_cycle(
            CycleRequest::all()
                .with_sources([SourceId::ExchangeA])
                .with_symbols(symbols(&["A", "B"])),
        )
        .await;

    // Then: One insert, one itemized error, and an unsuccessful run
    assert_eq!(run.inserted(), 1);
    assert_eq!(run.errored(), 1);
    assert!(!run.success);
    assert_eq!(
        run.errors,
        vec![String::from("B: UpstreamUnavailable after 3 attempts")]
    );
    assert_eq!(upstream.calls_to("symbol=B"), 3);

    let stored = warehouse.quote("A", "EX_A").expect("read").expect("A stored");
    assert_eq!(stored.price, 100.0);
    assert!(warehouse.quote("B", "EX_A").expect("read").is_none());
}

#[tokio::test(start_paused = true)]
async fn when_a_whole_source_is_down_the_other_sources_still_refresh() {
    // Given: EX_A is unreachable while EX_B and GOLD answer
    let (_temp, warehouse) = open_warehouse();
    let upstream = FakeUpstream::new();
    upstream.drop_connections("ex-a.test");
    upstream.route("ex-b.test/api/quote?symbol=TCS", 200, r#"{"lastPrice": "3,890.50", "volume": 1200}"#);
    upstream.route("gold-rate", 200, r#"{"ratePerGram": 6100, "previousRate": 6050}"#);
    let coordinator = RefreshCoordinator::new(warehouse.clone(), CoordinatorSettings::default())
        .with_adapter(adapter(SourceId::ExchangeA, &upstream, unthrottled(SourceId::ExchangeA)))
        .with_adapter(adapter(SourceId::ExchangeB, &upstream, unthrottled(SourceId::ExchangeB)))
        .with_adapter(adapter(SourceId::MetalRate, &upstream, unthrottled(SourceId::MetalRate)));

    // When: A full cycle runs for TCS
    let run = coordinator
        .run_cycle(CycleRequest::all().with_symbols(symbols(&["TCS"])))
        .await;

    // Then: EX_B and GOLD are clean, EX_A is reported, and nothing is thrown
    assert!(!run.success);
    assert_eq!(run.sources.len(), 3);
    let ex_a = run.summary(SourceId::ExchangeA).expect("EX_A summary");
    assert_eq!((ex_a.requested, ex_a.inserted, ex_a.errored), (1, 0, 1));
    assert!(run.summary(SourceId::ExchangeB).expect("EX_B").is_clean());
    assert!(run.summary(SourceId::MetalRate).expect("GOLD").is_clean());
    assert_eq!(
        run.errors,
        vec![String::from("TCS: UpstreamUnavailable after 3 attempts")]
    );

    let ex_b = warehouse.quote("TCS", "EX_B").expect("read").expect("EX_B quote");
    assert_eq!(ex_b.price, 3_890.5);
    assert_eq!(
        scalar(&warehouse, "SELECT rate_per_10g FROM metal_rates"),
        Value::from(61_000.0)
    );

    // And: The failed status probe is recorded as DOWN
    let health = ex_a.health.as_ref().expect("EX_A health");
    assert_eq!(health.status.as_str(), "DOWN");
    assert_eq!(
        scalar(&warehouse, "SELECT status FROM system_health WHERE component = 'EX_A market'"),
        Value::from("DOWN")
    );
}

// =============================================================================
// Refresh: storage
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_one_source_is_slow_the_cycle_takes_as_long_as_that_source_alone() {
    // Given: EX_A quotes take 20s to arrive while GOLD answers at once
    let (_temp, warehouse) = open_warehouse();
    let upstream = FakeUpstream::new();
    upstream.route_after(
        "symbol=TCS",
        Duration::from_secs(20),
        200,
        &quote_body("TCS", 3_890.5),
    );
    upstream.route("marketStatus", 200, MARKET_OPEN);
    upstream.route("https://ex-a.test/", 200, "<html>home</html>");
    upstream.route("gold-rate", 200, r#"{"ratePerGram": 6100, "previousRate": 6050}"#);
    let coordinator = RefreshCoordinator::new(warehouse.clone(), CoordinatorSettings::default())
        .with_adapter(adapter(SourceId::ExchangeA, &upstream, unthrottled(SourceId::ExchangeA)))
        .with_adapter(adapter(SourceId::MetalRate, &upstream, unthrottled(SourceId::MetalRate)));
    let started = Instant::now();

    // When: One cycle covers both sources
    let run = coordinator
        .run_cycle(
            CycleRequest::all()
                .with_sources([SourceId::ExchangeA, SourceId::MetalRate])
                .with_symbols(symbols(&["TCS"])),
        )
        .await;

    // Then: GOLD finished without waiting, and the cycle lasted as long as EX_A, not the sum
    assert!(run.success, "{:?}", run.errors);
    let gold = run.summary(SourceId::MetalRate).expect("GOLD summary");
    let ex_a = run.summary(SourceId::ExchangeA).expect("EX_A summary");
    assert_eq!(gold.inserted, 1);
    assert_eq!(gold.duration_ms, 0);
    assert_eq!(ex_a.inserted, 1);
    assert_eq!(ex_a.duration_ms, 20_000);
    assert_eq!(started.elapsed(), Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn when_the_same_quote_is_refreshed_twice_storage_keeps_one_row() {
    // Given: An upstream that always returns TCS at 100
    let (_temp, warehouse) = open_warehouse();
    let upstream = FakeUpstream::new();
    upstream.route("symbol=TCS", 200, &quote_body("TCS", 100.0));
    upstream.route("marketStatus", 200, MARKET_OPEN);
    let coordinator = RefreshCoordinator::new(warehouse.clone(), CoordinatorSettings::default())
        .with_adapter(adapter(SourceId::ExchangeA, &upstream, unthrottled(SourceId::ExchangeA)));
    let request = CycleRequest::all().with_symbols(symbols(&["TCS"]));

    // When: Two cycles run back to back
    let first = coordinator.run_cycle(request.clone()).await;
    let second = coordinator.run_cycle(request).await;

    // Then: Both succeed and exactly one quote row exists
    assert!(first.success && second.success);
    assert_eq!(
        scalar(&warehouse, "SELECT COUNT(*) FROM quotes WHERE symbol = 'TCS' AND source = 'EX_A'"),
        Value::from(1_i64)
    );
    assert_eq!(
        scalar(&warehouse, "SELECT price FROM quotes WHERE symbol = 'TCS'"),
        Value::from(100.0)
    );

    // And: Health is append-only and every run is audited
    assert_eq!(scalar(&warehouse, "SELECT COUNT(*) FROM system_health"), Value::from(2_i64));
    assert_eq!(scalar(&warehouse, "SELECT COUNT(*) FROM refresh_log"), Value::from(2_i64));
    assert_eq!(
        scalar(&warehouse, "SELECT source FROM vw_source_freshness"),
        Value::from("EX_A")
    );
}

#[tokio::test(start_paused = true)]
async fn when_an_id_collides_only_that_source_is_aborted() {
    // Given: A store that reports a primary key collision for EX_A writes
    let (_temp, warehouse) = open_warehouse();
    let upstream = FakeUpstream::new();
    upstream.route("ex-a.test/api/quote-equity", 200, &quote_body("TCS", 100.0));
    upstream.route("marketStatus", 200, MARKET_OPEN);
    upstream.route("ex-b.test/api/quote", 200, r#"{"lastPrice": 101.0}"#);
    let store = Arc::new(CollidingStore {
        inner: warehouse.clone(),
        collide_on: SourceId::ExchangeA,
    });
    let coordinator = RefreshCoordinator::new(store, CoordinatorSettings::default())
        .with_adapter(adapter(SourceId::ExchangeA, &upstream, unthrottled(SourceId::ExchangeA)))
        .with_adapter(adapter(SourceId::ExchangeB, &upstream, unthrottled(SourceId::ExchangeB)));

    // When: Both sources refresh the same symbol
    let run = coordinator
        .run_cycle(CycleRequest::all().with_symbols(symbols(&["TCS"])))
        .await;

    // Then: EX_A is aborted with the collision, EX_B is written normally
    assert!(!run.success);
    let ex_a = run.summary(SourceId::ExchangeA).expect("EX_A");
    assert!(ex_a.aborted);
    assert_eq!(ex_a.errored, 1);
    assert!(ex_a.health.is_none(), "aborted sub-cycle skips the status probe");
    assert_eq!(run.errors.len(), 1);
    assert!(run.errors[0].starts_with("EX_A: primary key collision in quotes"));

    let ex_b = run.summary(SourceId::ExchangeB).expect("EX_B");
    assert_eq!(ex_b.inserted, 1);
    assert!(warehouse.quote("TCS", "EX_B").expect("read").is_some());
    assert!(warehouse.quote("TCS", "EX_A").expect("read").is_none());
}

#[tokio::test(start_paused = true)]
async fn when_stored_ids_are_ahead_of_the_clock_new_rows_continue_after_them() {
    // Given: A warehouse whose largest id is far in the future
    let (_temp, warehouse) = open_warehouse();
    let far_future = i64::MAX / 2;
    warehouse
        .upsert_quote(&stored_quote_row(far_future))
        .expect("seed row");
    let upstream = FakeUpstream::new();
    upstream.route("symbol=TCS", 200, &quote_body("TCS", 100.0));
    let coordinator = RefreshCoordinator::new(warehouse.clone(), CoordinatorSettings::default())
        .with_adapter(adapter(SourceId::ExchangeA, &upstream, unthrottled(SourceId::ExchangeA)));

    // When: A new symbol is refreshed
    let run = coordinator
        .run_cycle(CycleRequest::all().with_symbols(symbols(&["TCS"])))
        .await;

    // Then: The new row gets an id after the stored maximum, not a clock-based one
    assert_eq!(run.inserted(), 1);
    let stored = warehouse.quote("TCS", "EX_A").expect("read").expect("TCS");
    assert!(stored.id > far_future);
}

fn stored_quote_row(id: i64) -> QuoteRow {
    QuoteRow {
        id,
        symbol: String::from("INFY"),
        source: String::from("EX_A"),
        price: 1_500.0,
        change_amount: None,
        change_percent: None,
        volume: None,
        traded_value: None,
        open: None,
        high: None,
        low: None,
        previous_close: None,
        as_of: String::from("2026-03-02 09:15:00"),
    }
}

// =============================================================================
// Refresh: target selection
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_no_symbols_are_given_the_largest_instruments_are_refreshed() {
    // Given: A ranked EX_A universe and a default symbol count of 2
    let (_temp, warehouse) = open_warehouse();
    warehouse
        .upsert_instruments(&[
            InstrumentRow {
                symbol: String::from("ITC"),
                name: String::from("ITC"),
                exchange: Some(String::from("EX_A")),
                market_cap: Some(5.0e12),
            },
            InstrumentRow {
                symbol: String::from("RELIANCE"),
                name: String::from("Reliance Industries"),
                exchange: Some(String::from("EX_A")),
                market_cap: Some(2.0e13),
            },
            InstrumentRow {
                symbol: String::from("TCS"),
                name: String::from("Tata Consultancy Services"),
                exchange: Some(String::from("EX_A")),
                market_cap: Some(1.4e13),
            },
        ])
        .expect("universe");
    let upstream = FakeUpstream::new();
    upstream.route("symbol=RELIANCE", 200, &quote_body("RELIANCE", 2_900.0));
    upstream.route("symbol=TCS", 200, &quote_body("TCS", 3_890.0));
    upstream.route("marketStatus", 200, MARKET_OPEN);
    let settings = CoordinatorSettings {
        default_symbol_count: 2,
        ..CoordinatorSettings::default()
    };
    let coordinator = RefreshCoordinator::new(warehouse.clone(), settings)
        .with_adapter(adapter(SourceId::ExchangeA, &upstream, unthrottled(SourceId::ExchangeA)));

    // When: A default cycle runs
    let run = coordinator.run_cycle(CycleRequest::all()).await;

    // Then: Only the two largest instruments are fetched
    assert!(run.success, "errors: {:?}", run.errors);
    assert_eq!(run.requested(), 2);
    assert_eq!(upstream.calls_to("symbol=ITC"), 0);
}

#[tokio::test(start_paused = true)]
async fn when_the_universe_is_empty_the_seed_symbols_are_refreshed() {
    // Given: An empty warehouse
    let (_temp, warehouse) = open_warehouse();
    let upstream = FakeUpstream::new();
    for symbol in ["RELIANCE", "TCS", "INFY"] {
        upstream.route(&format!("symbol={symbol}"), 200, &quote_body(symbol, 1_000.0));
    }
    upstream.route("marketStatus", 200, MARKET_OPEN);
    let coordinator = RefreshCoordinator::new(warehouse.clone(), CoordinatorSettings::default())
        .with_adapter(adapter(SourceId::ExchangeA, &upstream, unthrottled(SourceId::ExchangeA)));

    // When: A default cycle runs
    let run = coordinator.run_cycle(CycleRequest::all()).await;

    // Then: The seed list is fetched and stored
    assert!(run.success, "errors: {:?}", run.errors);
    assert_eq!(run.inserted(), 3);
    assert_eq!(scalar(&warehouse, "SELECT COUNT(*) FROM quotes"), Value::from(3_i64));
}
