use serde::{Deserialize, Serialize};
use time::Date;

use crate::domain::{format_date, Symbol, UtcDateTime};
use crate::source::SourceId;

/// One equity quote as parsed from an exchange payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRecord {
    pub symbol: Symbol,
    pub source: SourceId,
    pub price: f64,
    pub change_amount: Option<f64>,
    pub change_percent: Option<f64>,
    pub volume: Option<i64>,
    pub traded_value: Option<f64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub previous_close: Option<f64>,
    pub as_of: UtcDateTime,
}

/// One daily precious-metal rate for a location and grade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetalRateRecord {
    #[serde(with = "calendar_date")]
    pub date: Date,
    pub location: String,
    pub grade: String,
    pub rate_per_gram: f64,
    pub rate_per_10g: f64,
    pub change_amount: Option<f64>,
    pub change_percent: Option<f64>,
    pub previous_rate: Option<f64>,
    pub source: SourceId,
    pub as_of: UtcDateTime,
}

impl MetalRateRecord {
    /// Build a rate from the per-gram price, deriving the 10g price and the change fields.
    pub fn derive(
        date: Date,
        location: impl Into<String>,
        grade: impl Into<String>,
        rate_per_gram: f64,
        previous_rate: Option<f64>,
        as_of: UtcDateTime,
    ) -> Self {
        let change_amount = previous_rate.map(|previous| rate_per_gram - previous);
        let change_percent = previous_rate
            .filter(|previous| *previous > 0.0)
            .map(|previous| (rate_per_gram - previous) / previous * 100.0);

        Self {
            date,
            location: location.into(),
            grade: grade.into(),
            rate_per_gram,
            rate_per_10g: rate_per_gram * 10.0,
            change_amount,
            change_percent,
            previous_rate,
            source: SourceId::MetalRate,
            as_of,
        }
    }
}

/// Typed payload produced by a source parser.
///
/// The orchestrator and coordinator only ever see this enum; payload shape
/// differences stay inside each source's parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawRecord {
    Quote(QuoteRecord),
    MetalRate(MetalRateRecord),
}

impl RawRecord {
    pub fn source(&self) -> SourceId {
        match self {
            Self::Quote(quote) => quote.source,
            Self::MetalRate(rate) => rate.source,
        }
    }

    /// Natural conflict key, e.g. `TCS@EX_A` or `2026-03-02/Coimbatore/22K`.
    pub fn conflict_key(&self) -> String {
        match self {
            Self::Quote(quote) => format!("{}@{}", quote.symbol, quote.source),
            Self::MetalRate(rate) => {
                format!("{}/{}/{}", format_date(rate.date), rate.location, rate.grade)
            }
        }
    }
}

mod calendar_date {
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    use crate::domain::{format_date, parse_date};

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_date(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let value = String::deserialize(deserializer)?;
        parse_date(&value).map_err(D::Error::custom)
    }
}
