use serde::Deserialize;

use super::{decode, lenient_f64, parse_failure, positive, whole, wrong_key, SourceEndpoint};
use crate::domain::{QuoteRecord, RawRecord, UtcDateTime};
use crate::fetch::{FetchKey, SourceError};
use crate::http_client::{HttpRequest, HttpResponse};
use crate::source::SourceId;

/// Primary exchange: JSON quote API plus a market-status feed.
#[derive(Debug, Clone)]
pub struct ExchangeA {
    base_url: String,
}

impl ExchangeA {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    fn json_request(&self, path: &str) -> HttpRequest {
        HttpRequest::get(format!("{}{path}", self.base_url))
            .with_header("accept", "application/json")
            .with_header("referer", format!("{}/", self.base_url))
    }
}

impl SourceEndpoint for ExchangeA {
    fn source(&self) -> SourceId {
        SourceId::ExchangeA
    }

    fn build_request(&self, key: &FetchKey) -> Result<HttpRequest, SourceError> {
        let FetchKey::Symbol(symbol) = key else {
            return Err(wrong_key(self.source(), key));
        };
        Ok(self.json_request(&format!(
            "/api/quote-equity?symbol={}",
            urlencoding::encode(symbol.as_str())
        )))
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
        let payload: QuotePayload = decode(source, body)?;

        if let Some(reported) = payload.info.and_then(|info| info.symbol) {
            if !reported.eq_ignore_ascii_case(symbol.as_str()) {
                return Err(parse_failure(
                    source,
                    body,
                    format!("asked for {symbol}, payload describes {reported}"),
                ));
            }
        }

        let Some(price_info) = payload.price_info else {
            return Err(parse_failure(source, body, "missing priceInfo"));
        };
        let price = positive(source, body, "priceInfo.lastPrice", price_info.last_price)?;
        let range = price_info.intra_day_high_low.unwrap_or_default();

        Ok(RawRecord::Quote(QuoteRecord {
            symbol: symbol.clone(),
            source,
            price,
            change_amount: price_info.change,
            change_percent: price_info.p_change,
            volume: whole(payload.total_traded_volume),
            traded_value: payload.total_traded_value,
            open: price_info.open,
            high: range.max,
            low: range.min,
            previous_close: price_info.previous_close,
            as_of: UtcDateTime::now(),
        }))
    }

    fn probe_request(&self) -> HttpRequest {
        self.json_request("/api/marketStatus")
    }

    fn session_request(&self) -> Option<HttpRequest> {
        Some(
            HttpRequest::get(format!("{}/", self.base_url))
                .with_header("accept", "text/html,application/xhtml+xml"),
        )
    }

    fn status_request(&self) -> Option<HttpRequest> {
        Some(self.json_request("/api/marketStatus"))
    }

    fn parse_status(&self, response: &HttpResponse) -> Result<bool, SourceError> {
        let payload: MarketStatusPayload = decode(self.source(), &response.body)?;
        if payload.market_state.is_empty() {
            return Err(parse_failure(
                self.source(),
                &response.body,
                "marketState is empty",
            ));
        }

        Ok(payload.market_state.iter().any(|state| {
            state
                .market_status
                .as_deref()
                .is_some_and(|status| status.trim().eq_ignore_ascii_case("open"))
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotePayload {
    info: Option<InfoPayload>,
    price_info: Option<PriceInfo>,
    #[serde(default, deserialize_with = "lenient_f64")]
    total_traded_volume: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    total_traded_value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct InfoPayload {
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceInfo {
    #[serde(default, deserialize_with = "lenient_f64")]
    last_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    change: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    p_change: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    open: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    previous_close: Option<f64>,
    intra_day_high_low: Option<HighLow>,
}

#[derive(Debug, Default, Deserialize)]
struct HighLow {
    #[serde(default, deserialize_with = "lenient_f64")]
    min: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    max: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketStatusPayload {
    #[serde(default)]
    market_state: Vec<MarketState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketState {
    market_status: Option<String>,
}
