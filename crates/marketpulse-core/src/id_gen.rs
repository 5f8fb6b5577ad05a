use std::sync::atomic::{AtomicI64, Ordering};

use crate::domain::UtcDateTime;

/// Process-wide surrogate key sequence.
///
/// Ids are clock-shaped (`now` in microseconds) but strictly increasing: the
/// next id is `max(last + 1, now_micros)`. Seed it with the store's largest id
/// so a restart with a lagging clock never reuses one.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicI64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(floor: i64) -> Self {
        Self {
            last: AtomicI64::new(floor),
        }
    }

    /// Raise the floor to `id` if it is above the last issued id.
    pub fn observe(&self, id: i64) {
        self.last.fetch_max(id, Ordering::SeqCst);
    }

    pub fn last(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }

    pub fn next_id(&self) -> i64 {
        let now = UtcDateTime::now().unix_micros();
        let mut current = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = current.saturating_add(1).max(now);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }
}
