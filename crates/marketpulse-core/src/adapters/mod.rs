//! Per-source wire formats.
//!
//! Each [`SourceEndpoint`] knows how to turn a [`FetchKey`] into an HTTP
//! request and a response body into a typed [`RawRecord`]. Resilience
//! (breaker, retry, quota, timeouts) lives in [`crate::SourceAdapter`], so an
//! endpoint stays a pure translation layer.
//!
//! | Source | Quote/rate endpoint | Status endpoint | Probe |
//! |--------|---------------------|-----------------|-------|
//! | `EX_A` | `/api/quote-equity?symbol=` | `/api/marketStatus` | status URL |
//! | `EX_B` | `/api/quote?symbol=` | none | `/markets.html` |
//! | `GOLD` | `/api/gold-rate?city=&purity=` | none | city rate page |
//!
//! `EX_A` also needs a browser-like session: its home page sets the cookies
//! the API checks, see [`SourceEndpoint::session_request`].

mod exchange_a;
mod exchange_b;
mod metal_rate;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

pub use exchange_a::ExchangeA;
pub use exchange_b::ExchangeB;
pub use metal_rate::MetalRate;

use crate::domain::RawRecord;
use crate::fetch::{FetchKey, MetalTarget, SourceError};
use crate::http_client::{HttpRequest, HttpResponse};
use crate::source::SourceId;

const PREVIEW_CHARS: usize = 160;

/// Request builder and response parser for one upstream.
pub trait SourceEndpoint: Send + Sync {
    fn source(&self) -> SourceId;

    fn build_request(&self, key: &FetchKey) -> Result<HttpRequest, SourceError>;

    /// Parse a 2xx body. Status classification has already happened.
    fn parse_response(
        &self,
        key: &FetchKey,
        response: &HttpResponse,
    ) -> Result<RawRecord, SourceError>;

    /// Cheap request used for connectivity checks.
    fn probe_request(&self) -> HttpRequest;

    /// Page load that seeds the session cookies the API calls require.
    ///
    /// Sources returning `Some` have their session renewed when the API
    /// answers 401 or 403.
    fn session_request(&self) -> Option<HttpRequest> {
        None
    }

    /// Market-status request, for sources that publish one.
    fn status_request(&self) -> Option<HttpRequest> {
        None
    }

    /// Whether the market is open according to a status response.
    fn parse_status(&self, response: &HttpResponse) -> Result<bool, SourceError> {
        let _ = response;
        Err(SourceError::internal(format!(
            "{} publishes no market status",
            self.source()
        )))
    }
}

/// Build the endpoint for `source` rooted at `base_url`.
pub fn endpoint_for(
    source: SourceId,
    base_url: impl Into<String>,
    metal_target: &MetalTarget,
) -> Arc<dyn SourceEndpoint> {
    match source {
        SourceId::ExchangeA => Arc::new(ExchangeA::new(base_url)),
        SourceId::ExchangeB => Arc::new(ExchangeB::new(base_url)),
        SourceId::MetalRate => Arc::new(MetalRate::new(base_url, metal_target.clone())),
    }
}

/// Map a non-2xx status onto the error taxonomy.
///
/// 408, 429 and 5xx are transient; every other status outside 2xx is a rejection.
pub fn check_status(source: SourceId, response: &HttpResponse) -> Result<(), SourceError> {
    match response.status {
        200..=299 => Ok(()),
        408 | 429 | 500..=599 => Err(SourceError::unavailable(format!(
            "{source} returned HTTP {}",
            response.status
        ))),
        status => Err(SourceError::rejected(format!(
            "{source} returned HTTP {status}"
        ))),
    }
}

/// Decode a JSON body, logging a bounded payload reference on failure.
pub(crate) fn decode<T: DeserializeOwned>(source: SourceId, body: &str) -> Result<T, SourceError> {
    serde_json::from_str(body).map_err(|error| {
        parse_failure(source, body, format!("unexpected payload shape: {error}"))
    })
}

/// Log a parse failure with the payload length and preview, and build the error.
pub(crate) fn parse_failure(source: SourceId, body: &str, reason: impl Into<String>) -> SourceError {
    let reason = reason.into();
    tracing::warn!(
        source = %source,
        payload_len = body.len(),
        payload_preview = %payload_preview(body),
        reason = %reason,
        "failed to parse upstream payload"
    );
    SourceError::parse(format!("{source}: {reason}"))
}

/// First characters of a payload, single-line, for log diagnostics.
pub fn payload_preview(body: &str) -> String {
    let mut preview = body
        .chars()
        .take(PREVIEW_CHARS)
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect::<String>();
    if body.chars().nth(PREVIEW_CHARS).is_some() {
        preview.push_str("...");
    }
    preview
}

/// A required price field: present, finite and strictly positive.
pub(crate) fn positive(
    source: SourceId,
    body: &str,
    field: &str,
    value: Option<f64>,
) -> Result<f64, SourceError> {
    match value {
        Some(value) if value.is_finite() && value > 0.0 => Ok(value),
        Some(value) => Err(parse_failure(
            source,
            body,
            format!("{field} must be positive, got {value}"),
        )),
        None => Err(parse_failure(source, body, format!("missing {field}"))),
    }
}

pub(crate) fn wrong_key(source: SourceId, key: &FetchKey) -> SourceError {
    SourceError::rejected(format!("{source} cannot fetch '{key}'"))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

/// Accept `123.4`, `"123.4"`, `"1,234.50"` or `"-"`; anything unparseable becomes `None`.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<NumberOrText>::deserialize(deserializer)?;
    Ok(match value {
        None => None,
        Some(NumberOrText::Number(number)) => Some(number),
        Some(NumberOrText::Text(text)) => text.trim().replace(',', "").parse().ok(),
    }
    .filter(|number: &f64| number.is_finite()))
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn whole(value: Option<f64>) -> Option<i64> {
    value.map(|value| value.round() as i64)
}
