use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::circuit_breaker::CircuitSnapshot;
use crate::domain::UtcDateTime;
use crate::fetch::{SourceError, SourceErrorKind};
use crate::source::SourceId;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    fetch_count: u64,
    error_count: u64,
    attempts: u64,
    short_circuited: u64,
    last_fetch_time: Option<UtcDateTime>,
}

/// Cumulative per-source fetch counters, shared by every task fetching from that source.
#[derive(Debug, Default)]
pub struct FetchStats {
    counters: Mutex<Counters>,
}

/// Serializable view of [`FetchStats`] plus the source's breaker state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub source: SourceId,
    pub fetch_count: u64,
    pub error_count: u64,
    pub attempts: u64,
    pub short_circuited: u64,
    pub success_rate: f64,
    pub last_fetch_time: Option<UtcDateTime>,
    pub circuit: CircuitSnapshot,
}

impl FetchStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// One transport call, retries included.
    pub fn record_attempt(&self) {
        self.lock().attempts += 1;
    }

    /// One finished logical fetch.
    pub fn record_outcome<T>(&self, result: &Result<T, SourceError>) {
        let mut counters = self.lock();
        counters.fetch_count += 1;
        counters.last_fetch_time = Some(UtcDateTime::now());
        if let Err(error) = result {
            counters.error_count += 1;
            if error.kind() == SourceErrorKind::CircuitOpen {
                counters.short_circuited += 1;
            }
        }
    }

    pub fn fetch_count(&self) -> u64 {
        self.lock().fetch_count
    }

    pub fn error_count(&self) -> u64 {
        self.lock().error_count
    }

    pub fn attempts(&self) -> u64 {
        self.lock().attempts
    }

    pub fn success_rate(&self) -> f64 {
        let counters = *self.lock();
        success_rate(counters.fetch_count, counters.error_count)
    }

    pub fn snapshot(&self, source: SourceId, circuit: CircuitSnapshot) -> StatsSnapshot {
        let counters = *self.lock();
        StatsSnapshot {
            source,
            fetch_count: counters.fetch_count,
            error_count: counters.error_count,
            attempts: counters.attempts,
            short_circuited: counters.short_circuited,
            success_rate: success_rate(counters.fetch_count, counters.error_count),
            last_fetch_time: counters.last_fetch_time,
            circuit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[allow(clippy::cast_precision_loss)]
fn success_rate(fetch_count: u64, error_count: u64) -> f64 {
    let succeeded = fetch_count.saturating_sub(error_count) as f64;
    succeeded / fetch_count.max(1) as f64 * 100.0
}
