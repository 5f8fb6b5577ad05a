//! Fetch request/outcome value types and the source error taxonomy.
//!
//! | Kind | Retryable | Counts against breaker | Typical cause |
//! |------|-----------|------------------------|---------------|
//! | `CircuitOpen` | no | no | breaker rejected the call without I/O |
//! | `UpstreamUnavailable` | yes | yes | timeout, connect failure, 408/429/5xx |
//! | `UpstreamRejected` | no | yes | other 4xx, malformed request |
//! | `Parse` | no | yes | payload shape did not match the parser |
//! | `Internal` | no | no | bug or task failure inside the pipeline |

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{RawRecord, Symbol};
use crate::source::SourceId;
use crate::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    CircuitOpen,
    UpstreamUnavailable,
    UpstreamRejected,
    Parse,
    Internal,
}

impl SourceErrorKind {
    /// Name used in refresh summaries, e.g. `UpstreamUnavailable after 3 attempts`.
    pub const fn label(self) -> &'static str {
        match self {
            Self::CircuitOpen => "CircuitOpen",
            Self::UpstreamUnavailable => "UpstreamUnavailable",
            Self::UpstreamRejected => "UpstreamRejected",
            Self::Parse => "ParseError",
            Self::Internal => "Internal",
        }
    }
}

/// Classified failure of one logical fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
    attempts: u32,
}

impl SourceError {
    pub fn circuit_open(source: impl Display) -> Self {
        Self {
            kind: SourceErrorKind::CircuitOpen,
            message: format!("circuit for '{source}' is open"),
            retryable: false,
            attempts: 0,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::UpstreamUnavailable,
            message: message.into(),
            retryable: true,
            attempts: 0,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::UpstreamRejected,
            message: message.into(),
            retryable: false,
            attempts: 0,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Parse,
            message: message.into(),
            retryable: false,
            attempts: 0,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Internal,
            message: message.into(),
            retryable: false,
            attempts: 0,
        }
    }

    /// Tag the error with the number of upstream attempts that produced it.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    /// Upstream attempts made before giving up; 0 when no I/O happened.
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::CircuitOpen => "source.circuit_open",
            SourceErrorKind::UpstreamUnavailable => "source.upstream_unavailable",
            SourceErrorKind::UpstreamRejected => "source.upstream_rejected",
            SourceErrorKind::Parse => "source.parse",
            SourceErrorKind::Internal => "source.internal",
        }
    }

    /// Short classified form without internal detail.
    pub fn summary(&self) -> String {
        match self.attempts {
            0 | 1 => self.kind.label().to_owned(),
            attempts => format!("{} after {attempts} attempts", self.kind.label()),
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())?;
        if self.attempts > 1 {
            write!(f, " after {} attempts", self.attempts)?;
        }
        Ok(())
    }
}

impl std::error::Error for SourceError {}

/// Location and purity grade of a metal rate, written `Coimbatore/22K`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetalTarget {
    pub location: String,
    pub grade: String,
}

impl MetalTarget {
    pub fn new(location: impl Into<String>, grade: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            grade: grade.into(),
        }
    }
}

impl Display for MetalTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.location, self.grade)
    }
}

impl FromStr for MetalTarget {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidMetalTarget {
            value: value.to_owned(),
        };
        let (location, grade) = value.split_once('/').ok_or_else(invalid)?;
        let (location, grade) = (location.trim(), grade.trim());
        if location.is_empty() || grade.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(location, grade.to_ascii_uppercase()))
    }
}

/// What a single fetch asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchKey {
    Symbol(Symbol),
    Metal(MetalTarget),
}

impl Display for FetchKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Symbol(symbol) => Display::fmt(symbol, f),
            Self::Metal(target) => Display::fmt(target, f),
        }
    }
}

/// One item of a fetch batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub source: SourceId,
    pub key: FetchKey,
    /// Overrides the source's configured per-call timeout.
    pub timeout: Option<Duration>,
}

impl FetchRequest {
    pub fn quote(source: SourceId, symbol: Symbol) -> Self {
        Self {
            source,
            key: FetchKey::Symbol(symbol),
            timeout: None,
        }
    }

    pub fn metal(target: MetalTarget) -> Self {
        Self {
            source: SourceId::MetalRate,
            key: FetchKey::Metal(target),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of one fetch: exactly one per request.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success {
        request: FetchRequest,
        record: RawRecord,
    },
    Failure {
        request: FetchRequest,
        error: SourceError,
    },
}

impl FetchOutcome {
    pub fn from_result(request: FetchRequest, result: Result<RawRecord, SourceError>) -> Self {
        match result {
            Ok(record) => Self::Success { request, record },
            Err(error) => Self::Failure { request, error },
        }
    }

    pub fn request(&self) -> &FetchRequest {
        match self {
            Self::Success { request, .. } | Self::Failure { request, .. } => request,
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error(&self) -> Option<&SourceError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }

    /// Whether a failure was of a retryable class; always false for successes.
    pub fn retryable(&self) -> bool {
        self.error().is_some_and(SourceError::retryable)
    }
}
