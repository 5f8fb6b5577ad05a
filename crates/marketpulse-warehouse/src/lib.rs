//! # Marketpulse Warehouse
//!
//! DuckDB-backed store for the marketpulse refresh pipeline.
//!
//! Every write goes through an idempotent upsert keyed by the natural
//! conflict key of its table, inside a transaction, with parameters bound
//! rather than interpolated. Surrogate ids are supplied by the caller and
//! checked before use: an id that already belongs to a row with a different
//! conflict key is rejected with [`WarehouseError::PrimaryKeyCollision`]
//! instead of touching that row.
//!
//! ## Tables
//!
//! | Table | Conflict key | Description |
//! |-------|--------------|-------------|
//! | `instruments` | `symbol` | Instrument universe, ranked by `market_cap` |
//! | `quotes` | `(symbol, source)` | Latest quote per symbol and source |
//! | `metal_rates` | `(rate_date, location, grade)` | Daily metal rates |
//! | `system_health` | append-only | Status probe results |
//! | `refresh_log` | `(run_id, source)` | Refresh cycle audit |
//!
//! ```rust,no_run
//! use marketpulse_warehouse::{QueryGuardrails, Warehouse};
//!
//! let warehouse = Warehouse::open_default()?;
//! let result = warehouse.execute_query(
//!     "SELECT symbol, price FROM quotes ORDER BY symbol",
//!     QueryGuardrails::default(),
//! )?;
//! println!("{} rows", result.row_count);
//! # Ok::<(), marketpulse_warehouse::WarehouseError>(())
//! ```

pub mod duckdb;
pub mod migrations;
pub mod query;
pub mod views;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use ::duckdb::{Connection, ToSql};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::duckdb::{AccessMode, DuckDbConnectionManager, PooledConnection};
pub use crate::query::{QueryGuardrails, QueryResult, SqlColumn};

/// Errors raised by warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The database could not be reached at all.
    #[error("warehouse unavailable: {0}")]
    Connection(String),

    /// A generated surrogate id is already taken by an unrelated row.
    #[error("primary key collision in {table}: id {id} already belongs to {existing}")]
    PrimaryKeyCollision {
        table: &'static str,
        id: i64,
        existing: String,
    },

    #[error("query rejected: {0}")]
    QueryRejected(String),

    #[error("query timed out after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },
}

impl WarehouseError {
    /// Whether this error invalidates the rest of the current write batch.
    ///
    /// Row-level errors only affect the row being written; collisions and
    /// connectivity failures affect everything after them.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PrimaryKeyCollision { .. } | Self::Connection(_) | Self::Io(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub db_path: PathBuf,
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            db_path: resolve_marketpulse_home().join("warehouse.duckdb"),
            max_pool_size: 4,
        }
    }
}

impl WarehouseConfig {
    pub fn at(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }
}

/// One instrument of the refresh universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentRow {
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub market_cap: Option<f64>,
}

/// Quote row keyed by `(symbol, source)`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRow {
    pub id: i64,
    pub symbol: String,
    pub source: String,
    pub price: f64,
    pub change_amount: Option<f64>,
    pub change_percent: Option<f64>,
    pub volume: Option<i64>,
    pub traded_value: Option<f64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub previous_close: Option<f64>,
    /// `YYYY-MM-DD HH:MM:SS` in UTC.
    pub as_of: String,
}

/// Metal rate row keyed by `(rate_date, location, grade)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetalRateRow {
    pub id: i64,
    /// `YYYY-MM-DD`.
    pub rate_date: String,
    pub location: String,
    pub grade: String,
    pub rate_per_gram: f64,
    pub rate_per_10g: f64,
    pub change_amount: Option<f64>,
    pub change_percent: Option<f64>,
    pub previous_rate: Option<f64>,
    pub source: String,
    pub as_of: String,
}

/// Append-only status probe result.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthRow {
    pub id: i64,
    pub component: String,
    pub status: String,
    pub response_time_ms: Option<i64>,
    pub market_open: Option<bool>,
    pub error_message: Option<String>,
    pub checked_at: String,
}

/// Per-source line of a refresh cycle audit.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshLogRow {
    pub run_id: String,
    pub source: String,
    pub requested: i64,
    pub inserted: i64,
    pub errored: i64,
    pub success: bool,
    pub started_at: String,
    pub finished_at: String,
}

/// Stored quote as read back for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredQuote {
    pub id: i64,
    pub symbol: String,
    pub source: String,
    pub price: f64,
    pub as_of: String,
}

/// Handle to the marketpulse `DuckDB` database.
#[derive(Clone)]
pub struct Warehouse {
    manager: DuckDbConnectionManager,
    // DuckDB allows one writer at a time per row; concurrent sources take turns here.
    write_lock: Arc<Mutex<()>>,
}

impl Warehouse {
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open (creating if needed) the database file and bring its schema up to date.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::open(config.db_path.clone(), config.max_pool_size)
            .map_err(|error| {
                WarehouseError::Connection(format!(
                    "cannot open {}: {error}",
                    config.db_path.display()
                ))
            })?;
        let warehouse = Self {
            manager,
            write_lock: Arc::new(Mutex::new(())),
        };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.connect(AccessMode::ReadWrite)?;
        migrations::apply_migrations(&connection)?;
        views::create_views(&connection)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    /// Run a single read-only statement under `guardrails`.
    pub fn execute_query(
        &self,
        sql: &str,
        guardrails: QueryGuardrails,
    ) -> Result<QueryResult, WarehouseError> {
        let sql = query::prepare_read_only(sql)?;
        let connection = self.connect(AccessMode::ReadOnly)?;
        query::run_guarded(&connection, sql, guardrails)
    }

    /// Insert or update universe rows; returns the number of rows written.
    pub fn upsert_instruments(&self, rows: &[InstrumentRow]) -> Result<usize, WarehouseError> {
        self.write(|connection| {
            let mut written = 0;
            for row in rows {
                let params: [&dyn ToSql; 4] =
                    [&row.symbol, &row.name, &row.exchange, &row.market_cap];
                written += connection.execute(
                    "INSERT INTO instruments (symbol, name, exchange, market_cap, updated_at) \
                     VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP) \
                     ON CONFLICT (symbol) DO UPDATE SET \
                     name = excluded.name, exchange = excluded.exchange, \
                     market_cap = excluded.market_cap, updated_at = excluded.updated_at",
                    params.as_slice(),
                )?;
            }
            Ok(written)
        })
    }

    /// Symbols of `exchange` ranked by market cap, largest first, unknown caps last.
    pub fn top_symbols(&self, exchange: &str, limit: usize) -> Result<Vec<String>, WarehouseError> {
        let connection = self.connect(AccessMode::ReadOnly)?;
        let sql = format!(
            "SELECT symbol FROM instruments \
             WHERE exchange = ? AND is_active \
             ORDER BY market_cap DESC NULLS LAST, symbol \
             LIMIT {limit}"
        );
        let mut statement = connection.prepare(sql.as_str())?;
        let params: [&dyn ToSql; 1] = [&exchange];
        let symbols = statement.query_map(params.as_slice(), |row| row.get::<_, String>(0))?;
        Ok(symbols.collect::<Result<Vec<_>, _>>()?)
    }

    /// Largest surrogate id in use across every id-keyed table, or 0 when empty.
    pub fn max_row_id(&self) -> Result<i64, WarehouseError> {
        let connection = self.connect(AccessMode::ReadOnly)?;
        let max_id = connection.query_row(
            "SELECT COALESCE(MAX(id), 0) FROM ( \
                 SELECT id FROM quotes \
                 UNION ALL SELECT id FROM metal_rates \
                 UNION ALL SELECT id FROM system_health)",
            [],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(max_id)
    }

    /// Upsert one quote on `(symbol, source)`, ensuring its instrument row exists.
    ///
    /// Returns the number of affected quote rows (1 for both insert and update).
    pub fn upsert_quote(&self, row: &QuoteRow) -> Result<usize, WarehouseError> {
        self.write(|connection| {
            let params: [&dyn ToSql; 3] = [&row.symbol, &row.symbol, &row.source];
            connection.execute(
                "INSERT INTO instruments (symbol, name, exchange) VALUES (?, ?, ?) \
                 ON CONFLICT (symbol) DO NOTHING",
                params.as_slice(),
            )?;

            let expected = format!("{}/{}", row.symbol, row.source);
            ensure_id_available(
                connection,
                "quotes",
                "SELECT symbol || '/' || source FROM quotes WHERE id = ?",
                row.id,
                expected.as_str(),
            )?;

            let params: [&dyn ToSql; 13] = [
                &row.id,
                &row.symbol,
                &row.source,
                &row.price,
                &row.change_amount,
                &row.change_percent,
                &row.volume,
                &row.traded_value,
                &row.open,
                &row.high,
                &row.low,
                &row.previous_close,
                &row.as_of,
            ];
            let affected = connection.execute(
                "INSERT INTO quotes \
                 (id, symbol, source, price, change_amount, change_percent, volume, traded_value, \
                  open, high, low, previous_close, as_of, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP), CURRENT_TIMESTAMP) \
                 ON CONFLICT (symbol, source) DO UPDATE SET \
                 price = excluded.price, change_amount = excluded.change_amount, \
                 change_percent = excluded.change_percent, volume = excluded.volume, \
                 traded_value = excluded.traded_value, open = excluded.open, \
                 high = excluded.high, low = excluded.low, \
                 previous_close = excluded.previous_close, as_of = excluded.as_of, \
                 updated_at = excluded.updated_at",
                params.as_slice(),
            )?;
            Ok(affected)
        })
    }

    /// Upsert one metal rate on `(rate_date, location, grade)`.
    pub fn upsert_metal_rate(&self, row: &MetalRateRow) -> Result<usize, WarehouseError> {
        self.write(|connection| {
            let expected = format!("{}/{}/{}", row.rate_date, row.location, row.grade);
            ensure_id_available(
                connection,
                "metal_rates",
                "SELECT CAST(rate_date AS VARCHAR) || '/' || location || '/' || grade \
                 FROM metal_rates WHERE id = ?",
                row.id,
                expected.as_str(),
            )?;

            let params: [&dyn ToSql; 11] = [
                &row.id,
                &row.rate_date,
                &row.location,
                &row.grade,
                &row.rate_per_gram,
                &row.rate_per_10g,
                &row.change_amount,
                &row.change_percent,
                &row.previous_rate,
                &row.source,
                &row.as_of,
            ];
            let affected = connection.execute(
                "INSERT INTO metal_rates \
                 (id, rate_date, location, grade, rate_per_gram, rate_per_10g, change_amount, \
                  change_percent, previous_rate, source, as_of, updated_at) \
                 VALUES (?, CAST(? AS DATE), ?, ?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP), CURRENT_TIMESTAMP) \
                 ON CONFLICT (rate_date, location, grade) DO UPDATE SET \
                 rate_per_gram = excluded.rate_per_gram, rate_per_10g = excluded.rate_per_10g, \
                 change_amount = excluded.change_amount, change_percent = excluded.change_percent, \
                 previous_rate = excluded.previous_rate, source = excluded.source, \
                 as_of = excluded.as_of, updated_at = excluded.updated_at",
                params.as_slice(),
            )?;
            Ok(affected)
        })
    }

    /// Append a health probe result. Health rows are never updated.
    pub fn append_health(&self, row: &HealthRow) -> Result<(), WarehouseError> {
        self.write(|connection| {
            ensure_id_available(
                connection,
                "system_health",
                "SELECT component || '@' || CAST(checked_at AS VARCHAR) FROM system_health WHERE id = ?",
                row.id,
                "",
            )?;

            let params: [&dyn ToSql; 7] = [
                &row.id,
                &row.component,
                &row.status,
                &row.response_time_ms,
                &row.market_open,
                &row.error_message,
                &row.checked_at,
            ];
            connection.execute(
                "INSERT INTO system_health \
                 (id, component, status, response_time_ms, market_open, error_message, checked_at) \
                 VALUES (?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP))",
                params.as_slice(),
            )?;
            Ok(())
        })
    }

    /// Record the per-source lines of a finished refresh cycle.
    pub fn record_refresh(&self, rows: &[RefreshLogRow]) -> Result<(), WarehouseError> {
        if rows.is_empty() {
            return Ok(());
        }

        self.write(|connection| {
            for row in rows {
                let params: [&dyn ToSql; 8] = [
                    &row.run_id,
                    &row.source,
                    &row.requested,
                    &row.inserted,
                    &row.errored,
                    &row.success,
                    &row.started_at,
                    &row.finished_at,
                ];
                connection.execute(
                    "INSERT INTO refresh_log \
                     (run_id, source, requested, inserted, errored, success, started_at, finished_at) \
                     VALUES (?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP)) \
                     ON CONFLICT (run_id, source) DO NOTHING",
                    params.as_slice(),
                )?;
            }
            Ok(())
        })
    }

    pub fn quote(&self, symbol: &str, source: &str) -> Result<Option<StoredQuote>, WarehouseError> {
        let connection = self.connect(AccessMode::ReadOnly)?;
        let mut statement = connection.prepare(
            "SELECT id, symbol, source, price, CAST(as_of AS VARCHAR) \
             FROM quotes WHERE symbol = ? AND source = ?",
        )?;
        let params: [&dyn ToSql; 2] = [&symbol, &source];
        let mut rows = statement.query(params.as_slice())?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        Ok(Some(StoredQuote {
            id: row.get(0)?,
            symbol: row.get(1)?,
            source: row.get(2)?,
            price: row.get(3)?,
            as_of: row.get(4)?,
        }))
    }

    fn connect(&self, mode: AccessMode) -> Result<PooledConnection, WarehouseError> {
        self.manager
            .acquire(mode)
            .map_err(|error| WarehouseError::Connection(error.to_string()))
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `work` inside one transaction on a read-write handle.
    fn write<T>(
        &self,
        work: impl FnOnce(&Connection) -> Result<T, WarehouseError>,
    ) -> Result<T, WarehouseError> {
        let _guard = self.write_guard();
        let connection = self.connect(AccessMode::ReadWrite)?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        match work(&connection) {
            Ok(value) => {
                connection.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback) = connection.execute_batch("ROLLBACK") {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(error)
            }
        }
    }
}

/// Reject `id` when it already belongs to a row whose key differs from `expected_key`.
///
/// An empty `expected_key` marks append-only tables, where any existing row is a collision.
fn ensure_id_available(
    connection: &Connection,
    table: &'static str,
    lookup_sql: &str,
    id: i64,
    expected_key: &str,
) -> Result<(), WarehouseError> {
    let mut statement = connection.prepare(lookup_sql)?;
    let params: [&dyn ToSql; 1] = [&id];
    let mut rows = statement.query(params.as_slice())?;
    let Some(row) = rows.next()? else {
        return Ok(());
    };

    let existing: String = row.get(0)?;
    if !expected_key.is_empty() && existing == expected_key {
        return Ok(());
    }

    tracing::error!(table, id, existing = %existing, "surrogate id already in use");
    Err(WarehouseError::PrimaryKeyCollision {
        table,
        id,
        existing,
    })
}

fn resolve_marketpulse_home() -> PathBuf {
    if let Some(path) = env::var_os("MARKETPULSE_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    match env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".marketpulse"),
        None => PathBuf::from(".marketpulse"),
    }
}
