use serde::Deserialize;

use super::{decode, lenient_f64, positive, whole, wrong_key, SourceEndpoint};
use crate::domain::{QuoteRecord, RawRecord, UtcDateTime};
use crate::fetch::{FetchKey, SourceError};
use crate::http_client::{HttpRequest, HttpResponse};
use crate::source::SourceId;

/// Secondary exchange: flat quote objects, numbers often sent as text.
#[derive(Debug, Clone)]
pub struct ExchangeB {
    base_url: String,
}

impl ExchangeB {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

impl SourceEndpoint for ExchangeB {
    fn source(&self) -> SourceId {
        SourceId::ExchangeB
    }

    fn build_request(&self, key: &FetchKey) -> Result<HttpRequest, SourceError> {
        let FetchKey::Symbol(symbol) = key else {
            return Err(wrong_key(self.source(), key));
        };
        Ok(HttpRequest::get(format!(
            "{}/api/quote?symbol={}",
            self.base_url,
            urlencoding::encode(symbol.as_str())
        ))
        .with_header("accept", "application/json")
        .with_header("origin", self.base_url.clone()))
    }

    fn parse_response(
        &self,
        key: &FetchKey,
        response: &HttpResponse,
    ) -> Result<RawRecord, SourceError> {
        let source = self.source();
        let FetchKey::Symbol(symbol) = key else {
            return Err(wrong_key(source, key));
        };
        let body = response.body.as_str();
        let payload: FlatQuote = decode(source, body)?;
        let price = positive(source, body, "lastPrice", payload.last_price)?;

        Ok(RawRecord::Quote(QuoteRecord {
            symbol: symbol.clone(),
            source,
            price,
            change_amount: payload.change,
            change_percent: payload.p_change,
            volume: whole(payload.volume),
            traded_value: None,
            open: payload.open,
            high: payload.high,
            low: payload.low,
            previous_close: payload.previous_close,
            as_of: UtcDateTime::now(),
        }))
    }

    fn probe_request(&self) -> HttpRequest {
        HttpRequest::get(format!("{}/markets.html", self.base_url))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlatQuote {
    #[serde(default, deserialize_with = "lenient_f64")]
    last_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    change: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    p_change: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    open: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    high: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    low: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    previous_close: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    volume: Option<f64>,
}
