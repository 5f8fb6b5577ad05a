use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::Serialize;

use crate::circuit_breaker::CircuitState;
use crate::domain::UtcDateTime;
use crate::fetch::SourceError;
use crate::source::SourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Up,
    Down,
    Degraded,
}

impl HealthStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Degraded => "DEGRADED",
        }
    }

    /// DOWN on probe failure; DEGRADED when the breaker is not closed or the probe was slow.
    pub fn classify(
        probe_ok: bool,
        elapsed: Duration,
        circuit: CircuitState,
        degraded_after: Duration,
    ) -> Self {
        if !probe_ok {
            Self::Down
        } else if circuit != CircuitState::Closed || elapsed > degraded_after {
            Self::Degraded
        } else {
            Self::Up
        }
    }
}

impl Display for HealthStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only market-status probe result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthRecord {
    pub component: String,
    pub source: SourceId,
    pub status: HealthStatus,
    pub response_time_ms: u64,
    pub market_open: Option<bool>,
    pub error_message: Option<String>,
    pub checked_at: UtcDateTime,
}

impl HealthRecord {
    pub fn from_probe(
        source: SourceId,
        result: Result<bool, SourceError>,
        elapsed: Duration,
        circuit: CircuitState,
        degraded_after: Duration,
    ) -> Self {
        let status = HealthStatus::classify(result.is_ok(), elapsed, circuit, degraded_after);
        let (market_open, error_message) = match result {
            Ok(open) => (Some(open), None),
            Err(error) => (None, Some(error.to_string())),
        };

        Self {
            component: format!("{source} market"),
            source,
            status,
            response_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            market_open,
            error_message,
            checked_at: UtcDateTime::now(),
        }
    }
}
