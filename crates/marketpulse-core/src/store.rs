use marketpulse_warehouse::{
    HealthRow, MetalRateRow, QuoteRow, RefreshLogRow, Warehouse, WarehouseError,
};

use crate::coordinator::RefreshRun;
use crate::domain::{format_date, MetalRateRecord, QuoteRecord, RawRecord};
use crate::health::HealthRecord;
use crate::source::SourceId;

/// Storage seam of the refresh coordinator.
///
/// Implementations may block. The coordinator runs every call on tokio's
/// blocking pool and awaits it before issuing the next one for the same source.
pub trait RefreshStore: Send + Sync {
    /// Upsert one record under surrogate id `id` and return the affected row count.
    fn upsert_record(&self, id: i64, record: &RawRecord) -> Result<usize, WarehouseError>;

    fn append_health(&self, id: i64, record: &HealthRecord) -> Result<(), WarehouseError>;

    fn record_run(&self, run: &RefreshRun) -> Result<(), WarehouseError>;

    /// Top `limit` symbols of a quote source's universe.
    fn top_symbols(&self, source: SourceId, limit: usize) -> Result<Vec<String>, WarehouseError>;

    /// Largest surrogate id already stored, used to seed the id sequence.
    fn max_row_id(&self) -> Result<i64, WarehouseError>;
}

impl RefreshStore for Warehouse {
    fn upsert_record(&self, id: i64, record: &RawRecord) -> Result<usize, WarehouseError> {
        match record {
            RawRecord::Quote(quote) => self.upsert_quote(&quote_row(id, quote)),
            RawRecord::MetalRate(rate) => self.upsert_metal_rate(&metal_rate_row(id, rate)),
        }
    }

    fn append_health(&self, id: i64, record: &HealthRecord) -> Result<(), WarehouseError> {
        Warehouse::append_health(self, &health_row(id, record))
    }

    fn record_run(&self, run: &RefreshRun) -> Result<(), WarehouseError> {
        self.record_refresh(&refresh_log_rows(run))
    }

    fn top_symbols(&self, source: SourceId, limit: usize) -> Result<Vec<String>, WarehouseError> {
        Warehouse::top_symbols(self, source.as_str(), limit)
    }

    fn max_row_id(&self) -> Result<i64, WarehouseError> {
        Warehouse::max_row_id(self)
    }
}

pub fn quote_row(id: i64, quote: &QuoteRecord) -> QuoteRow {
    QuoteRow {
        id,
        symbol: quote.symbol.as_str().to_owned(),
        source: quote.source.as_str().to_owned(),
        price: quote.price,
        change_amount: quote.change_amount,
        change_percent: quote.change_percent,
        volume: quote.volume,
        traded_value: quote.traded_value,
        open: quote.open,
        high: quote.high,
        low: quote.low,
        previous_close: quote.previous_close,
        as_of: quote.as_of.to_storage(),
    }
}

pub fn metal_rate_row(id: i64, rate: &MetalRateRecord) -> MetalRateRow {
    MetalRateRow {
        id,
        rate_date: format_date(rate.date),
        location: rate.location.clone(),
        grade: rate.grade.clone(),
        rate_per_gram: rate.rate_per_gram,
        rate_per_10g: rate.rate_per_10g,
        change_amount: rate.change_amount,
        change_percent: rate.change_percent,
        previous_rate: rate.previous_rate,
        source: rate.source.as_str().to_owned(),
        as_of: rate.as_of.to_storage(),
    }
}

pub fn health_row(id: i64, record: &HealthRecord) -> HealthRow {
    HealthRow {
        id,
        component: record.component.clone(),
        status: record.status.as_str().to_owned(),
        response_time_ms: i64::try_from(record.response_time_ms).ok(),
        market_open: record.market_open,
        error_message: record.error_message.clone(),
        checked_at: record.checked_at.to_storage(),
    }
}

/// One audit row per source summary of `run`.
pub fn refresh_log_rows(run: &RefreshRun) -> Vec<RefreshLogRow> {
    let run_id = run.run_id.to_string();
    let started_at = run.started_at.to_storage();
    let finished_at = run.finished_at.to_storage();

    run.sources
        .iter()
        .map(|summary| RefreshLogRow {
            run_id: run_id.clone(),
            source: summary.source.as_str().to_owned(),
            requested: count(summary.requested),
            inserted: count(summary.inserted),
            errored: count(summary.errored),
            success: summary.is_clean(),
            started_at: started_at.clone(),
            finished_at: finished_at.clone(),
        })
        .collect()
}

fn count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
