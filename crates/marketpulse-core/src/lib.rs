//! # Marketpulse Core
//!
//! Resilient fetch-and-reconcile pipeline for live market data.
//!
//! ## Overview
//!
//! Marketpulse keeps a local warehouse of equity quotes, metal rates and
//! market-status probes fresh while its upstreams time out, throttle, and go
//! down. This crate provides:
//!
//! - **Per-source circuit breakers** that short-circuit a known-bad upstream
//! - **Retry with bounded exponential backoff and jitter** inside each breaker call
//! - **Bounded fan-out** of a fetch batch with per-slot pacing and a request quota
//! - **Refresh cycles** that run every source concurrently and upsert idempotently
//! - **Cumulative fetch stats** and append-only health records
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Source endpoints (EX_A, EX_B, GOLD): wire requests and payload parsers |
//! | [`circuit_breaker`] | Failure-isolation state machine |
//! | [`config`] | Pipeline configuration (defaults, TOML, environment) |
//! | [`coordinator`] | Refresh cycles and their `RefreshRun` reports |
//! | [`domain`] | Symbols, UTC timestamps, typed records |
//! | [`error`] | Validation, configuration and crate errors |
//! | [`fetch`] | Fetch requests, outcomes and the source error taxonomy |
//! | [`health`] | Market-status health records |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`id_gen`] | Monotonic surrogate key sequence |
//! | [`orchestrator`] | Bounded-concurrency batch dispatch |
//! | [`retry`] | Retry policy and backoff |
//! | [`schedule`] | Per-source refresh timetable |
//! | [`source`] | Source identifiers |
//! | [`source_adapter`] | One source behind its breaker, retry and quota |
//! | [`source_policy`] | Per-source concurrency, pacing and resilience settings |
//! | [`stats`] | Cumulative fetch statistics |
//! | [`store`] | Storage seam used by refresh cycles |
//! | [`throttling`] | Request quota and pacing |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use marketpulse_core::{
//!     CycleRequest, PipelineConfig, RefreshCoordinator, ReqwestHttpClient, Warehouse,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::load(None)?;
//!     let warehouse = Arc::new(Warehouse::open(config.warehouse_config())?);
//!     let coordinator = RefreshCoordinator::from_config(
//!         &config,
//!         warehouse,
//!         Arc::new(ReqwestHttpClient::new()?),
//!     )?;
//!
//!     let run = coordinator.run_cycle(CycleRequest::all()).await;
//!     println!("inserted {} rows, success={}", run.inserted(), run.success);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ Scheduler / CLI      │
//! └──────────┬───────────┘
//!            │ run_cycle
//!            ▼
//! ┌──────────────────────┐     ┌──────────────────┐
//! │ RefreshCoordinator   │────▶│ RefreshStore     │
//! │ (one task per source)│     │ (DuckDB upserts) │
//! └──────────┬───────────┘     └──────────────────┘
//!            │ fetch_many
//!            ▼
//! ┌──────────────────────┐
//! │ FetchOrchestrator    │  semaphore + pacing
//! └──────────┬───────────┘
//!            │ fetch_one
//!            ▼
//! ┌──────────────────────┐     ┌──────────────────┐
//! │ CircuitBreaker       │────▶│ RetryPolicy      │
//! └──────────────────────┘     └────────┬─────────┘
//!                                       │ rate gate + timeout
//!                                       ▼
//!                              ┌──────────────────┐
//!                              │ HttpClient       │
//!                              └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Per-item fetch failures never escape a batch. They come back as
//! [`FetchOutcome::Failure`] carrying a classified [`SourceError`]:
//!
//! ```rust
//! use marketpulse_core::{SourceError, SourceErrorKind};
//!
//! fn describe(error: &SourceError) -> &'static str {
//!     match error.kind() {
//!         SourceErrorKind::CircuitOpen => "skipped: breaker open",
//!         SourceErrorKind::UpstreamUnavailable => "transient, retried",
//!         SourceErrorKind::UpstreamRejected | SourceErrorKind::Parse => "permanent",
//!         SourceErrorKind::Internal => "pipeline bug",
//!     }
//! }
//! ```

pub mod adapters;
pub mod circuit_breaker;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod health;
pub mod http_client;
pub mod id_gen;
pub mod orchestrator;
pub mod retry;
pub mod schedule;
pub mod source;
pub mod source_adapter;
pub mod source_policy;
pub mod stats;
pub mod store;
pub mod throttling;

#[cfg(test)]
mod test_support;

// Source endpoints
pub use adapters::{check_status, endpoint_for, ExchangeA, ExchangeB, MetalRate, SourceEndpoint};

// Circuit breaker
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, FailureClasses,
};

// Configuration
pub use config::PipelineConfig;

// Refresh cycles
pub use coordinator::{
    CoordinatorSettings, CycleRequest, RefreshCoordinator, RefreshRun, SourceSummary,
};

// Domain models
pub use domain::{MetalRateRecord, QuoteRecord, RawRecord, Symbol, UtcDateTime};

// Error types
pub use error::{ConfigError, CoreError, ValidationError};

// Fetch values
pub use fetch::{FetchKey, FetchOutcome, FetchRequest, MetalTarget, SourceError, SourceErrorKind};

// Health
pub use health::{HealthRecord, HealthStatus};

// HTTP client types
pub use http_client::{
    HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient, ResponseFuture,
    TransportFailure,
};

pub use id_gen::IdGenerator;
pub use orchestrator::FetchOrchestrator;
pub use retry::{Backoff, RetryPolicy};
pub use schedule::RefreshSchedule;
pub use source::{SourceId, SourceKind};
pub use source_adapter::SourceAdapter;
pub use source_policy::SourcePolicy;
pub use stats::{FetchStats, StatsSnapshot};
pub use store::RefreshStore;
pub use throttling::{Pacing, RateGate};

// Warehouse (re-exported from marketpulse-warehouse)
pub use marketpulse_warehouse::{
    InstrumentRow, QueryGuardrails, QueryResult, SqlColumn, Warehouse, WarehouseConfig,
    WarehouseError,
};
