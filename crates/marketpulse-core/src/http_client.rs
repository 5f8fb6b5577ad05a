//! Transport seam between source endpoints and the network.
//!
//! Every market source is read with plain GETs, so [`HttpRequest`] carries a
//! URL, headers and a deadline and nothing else. [`HttpClient`] is object safe
//! so adapters can run against [`ReqwestHttpClient`] in production and a
//! scripted client in tests.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

/// Exchange sites answer scripted agents with an error page.
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) marketpulse/0.1";

const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

pub type ResponseFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;

/// One GET against a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    /// Lowercased header names.
    pub headers: BTreeMap<String, String>,
    pub deadline: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            deadline: DEFAULT_DEADLINE,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Status and body of a completed exchange. Bodies are small JSON or HTML pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// 401 or 403: the upstream no longer accepts the session cookies.
    pub const fn is_auth_rejection(&self) -> bool {
        matches!(self.status, 401 | 403)
    }
}

/// Where a request failed before a status line arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    Timeout,
    Connect,
    /// Headers arrived but the body was cut off.
    Body,
    /// The request itself could not be built; sending it again cannot help.
    Invalid,
    Other,
}

impl TransportFailure {
    pub const fn is_transient(self) -> bool {
        !matches!(self, Self::Invalid)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Body => "body",
            Self::Invalid => "invalid request",
            Self::Other => "transport",
        }
    }
}

impl Display for TransportFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{failure} failure: {message}")]
pub struct HttpError {
    failure: TransportFailure,
    message: String,
}

impl HttpError {
    pub fn new(failure: TransportFailure, message: impl Into<String>) -> Self {
        Self {
            failure,
            message: message.into(),
        }
    }

    /// A dropped or reset connection.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(TransportFailure::Other, message)
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self::new(TransportFailure::Invalid, message)
    }

    pub const fn failure(&self) -> TransportFailure {
        self.failure
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.failure.is_transient()
    }
}

pub trait HttpClient: Send + Sync {
    fn execute(&self, request: HttpRequest) -> ResponseFuture<'_>;
}

/// reqwest client with a cookie jar shared by every request of the process.
///
/// The jar is what lets a source session primed by one request carry over to
/// the API calls that follow it.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .build()
            .map_err(|error| classify(&error))?;
        Ok(Self { client })
    }

    /// Wrap a preconfigured client; it should keep a cookie store for `EX_A`.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute(&self, request: HttpRequest) -> ResponseFuture<'_> {
        Box::pin(async move {
            let mut builder = self.client.get(&request.url).timeout(request.deadline);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            let response = builder.send().await.map_err(|error| classify(&error))?;
            let status = response.status().as_u16();
            let body = response.text().await.map_err(|error| {
                HttpError::new(TransportFailure::Body, format!("{}: {error}", request.url))
            })?;

            Ok(HttpResponse { status, body })
        })
    }
}

fn classify(error: &reqwest::Error) -> HttpError {
    let failure = if error.is_timeout() {
        TransportFailure::Timeout
    } else if error.is_connect() {
        TransportFailure::Connect
    } else if error.is_builder() {
        TransportFailure::Invalid
    } else if error.is_body() || error.is_decode() {
        TransportFailure::Body
    } else {
        TransportFailure::Other
    };
    HttpError::new(failure, error.to_string())
}
