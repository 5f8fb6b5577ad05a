use serde::Deserialize;

use super::{decode, lenient_f64, parse_failure, positive, wrong_key, SourceEndpoint};
use crate::domain::{parse_date, MetalRateRecord, RawRecord, UtcDateTime};
use crate::fetch::{FetchKey, MetalTarget, SourceError};
use crate::http_client::{HttpRequest, HttpResponse};
use crate::source::SourceId;

/// Daily precious-metal rate publisher.
#[derive(Debug, Clone)]
pub struct MetalRate {
    base_url: String,
    /// Target whose public rate page doubles as the connectivity probe.
    probe_target: MetalTarget,
}

impl MetalRate {
    pub fn new(base_url: impl Into<String>, probe_target: MetalTarget) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            probe_target,
        }
    }
}

impl SourceEndpoint for MetalRate {
    fn source(&self) -> SourceId {
        SourceId::MetalRate
    }

    fn build_request(&self, key: &FetchKey) -> Result<HttpRequest, SourceError> {
        let FetchKey::Metal(target) = key else {
            return Err(wrong_key(self.source(), key));
        };
        Ok(HttpRequest::get(format!(
            "{}/api/gold-rate?city={}&purity={}",
            self.base_url,
            urlencoding::encode(&target.location),
            urlencoding::encode(&target.grade)
        ))
        .with_header("accept", "application/json"))
    }

    fn parse_response(
        &self,
        key: &FetchKey,
        response: &HttpResponse,
    ) -> Result<RawRecord, SourceError> {
        let source = self.source();
        let FetchKey::Metal(target) = key else {
            return Err(wrong_key(source, key));
        };
        let body = response.body.as_str();
        let payload: RatePayload = decode(source, body)?;
        let rate_per_gram = positive(source, body, "ratePerGram", payload.rate_per_gram)?;

        let as_of = UtcDateTime::now();
        let date = match payload.date.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => parse_date(text)
                .map_err(|error| parse_failure(source, body, error.to_string()))?,
            _ => as_of.date(),
        };

        Ok(RawRecord::MetalRate(MetalRateRecord::derive(
            date,
            target.location.clone(),
            target.grade.clone(),
            rate_per_gram,
            payload.previous_rate,
            as_of,
        )))
    }

    fn probe_request(&self) -> HttpRequest {
        HttpRequest::get(format!(
            "{}/gold-rates/{}.html",
            self.base_url,
            urlencoding::encode(&self.probe_target.location.to_ascii_lowercase())
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RatePayload {
    #[serde(default, deserialize_with = "lenient_f64")]
    rate_per_gram: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    previous_rate: Option<f64>,
    date: Option<String>,
}
