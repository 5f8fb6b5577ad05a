//! Shared fixtures for the behavior tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use marketpulse_core::{
    ExchangeA, ExchangeB, HttpClient, HttpError, HttpRequest, HttpResponse, MetalRate,
    MetalTarget, ResponseFuture, SourceAdapter, SourceId, SourcePolicy,
};

/// Upstream double that counts every transport call.
///
/// Routes are matched by URL substring in registration order; unmatched
/// URLs fail with a non-retryable transport error.
#[derive(Default)]
pub struct FakeUpstream {
    routes: Mutex<Vec<Route>>,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl FakeUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, pattern: &str, status: u16, body: &str) {
        self.route_after(pattern, Duration::ZERO, status, body);
    }

    /// Like [`FakeUpstream::route`], but each reply is held back for `delay`.
    pub fn route_after(&self, pattern: &str, delay: Duration, status: u16, body: &str) {
        self.push(pattern, delay, Some((status, body.to_owned())));
    }

    /// Every call matching `pattern` fails at the transport level (retryable).
    pub fn drop_connections(&self, pattern: &str) {
        self.push(pattern, Duration::ZERO, None);
    }

    fn push(&self, pattern: &str, delay: Duration, reply: Option<(u16, String)>) {
        self.routes.lock().expect("routes").push(Route {
            pattern: pattern.to_owned(),
            delay,
            reply,
        });
    }

    /// Requested URLs in dispatch order.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().expect("urls").clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_to(&self, pattern: &str) -> usize {
        self.urls
            .lock()
            .expect("urls")
            .iter()
            .filter(|url| url.contains(pattern))
            .count()
    }
}

struct Route {
    pattern: String,
    delay: Duration,
    reply: Option<(u16, String)>,
}

impl HttpClient for FakeUpstream {
    fn execute(&self, request: HttpRequest) -> ResponseFuture<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().expect("urls").push(request.url.clone());
        let reply = self
            .routes
            .lock()
            .expect("routes")
            .iter()
            .find(|route| request.url.contains(route.pattern.as_str()))
            .map(|route| (route.delay, route.reply.clone()));

        Box::pin(async move {
            match reply {
                Some((delay, reply)) => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    match reply {
                        Some((status, body)) => Ok(HttpResponse::new(status, body)),
                        None => Err(HttpError::transient("connection reset by peer")),
                    }
                }
                None => Err(HttpError::non_retryable(format!(
                    "no route for {}",
                    request.url
                ))),
            }
        })
    }
}

pub fn quote_body(symbol: &str, price: f64) -> String {
    format!(r#"{{"info":{{"symbol":"{symbol}"}},"priceInfo":{{"lastPrice":{price},"change":0.5,"pChange":0.1}}}}"#)
}

pub const MARKET_OPEN: &str = r#"{"marketState":[{"market":"Capital Market","marketStatus":"Open"}]}"#;

pub fn adapter(source: SourceId, upstream: &Arc<FakeUpstream>, policy: SourcePolicy) -> SourceAdapter {
    let client = Arc::clone(upstream) as Arc<dyn HttpClient>;
    match source {
        SourceId::ExchangeA => {
            SourceAdapter::new(Arc::new(ExchangeA::new("https://ex-a.test")), client, &policy)
        }
        SourceId::ExchangeB => {
            SourceAdapter::new(Arc::new(ExchangeB::new("https://ex-b.test")), client, &policy)
        }
        SourceId::MetalRate => SourceAdapter::new(
            Arc::new(MetalRate::new(
                "https://rates.test",
                MetalTarget::new("Coimbatore", "22K"),
            )),
            client,
            &policy,
        ),
    }
}
