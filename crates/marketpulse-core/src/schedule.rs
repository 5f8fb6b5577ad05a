//! Per-source refresh timetable.
//!
//! Every source is due immediately, then once per its own interval. Ticks that
//! fall inside a long cycle are skipped rather than replayed in a burst.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

use crate::config::PipelineConfig;
use crate::source::SourceId;

#[derive(Debug, Clone, Copy)]
struct Slot {
    interval: Duration,
    next_due: Instant,
}

#[derive(Debug, Clone)]
pub struct RefreshSchedule {
    slots: BTreeMap<SourceId, Slot>,
}

impl RefreshSchedule {
    /// Schedule each `(source, interval)` pair, all due now. Zero intervals are raised to one second.
    pub fn new(intervals: impl IntoIterator<Item = (SourceId, Duration)>) -> Self {
        let now = Instant::now();
        let slots = intervals
            .into_iter()
            .map(|(source, interval)| {
                let interval = interval.max(Duration::from_secs(1));
                (
                    source,
                    Slot {
                        interval,
                        next_due: now,
                    },
                )
            })
            .collect();
        Self { slots }
    }

    /// Intervals from `config` for each of `sources`.
    pub fn from_config(config: &PipelineConfig, sources: &[SourceId]) -> Self {
        Self::new(
            sources
                .iter()
                .map(|source| (*source, config.refresh_interval_for(*source))),
        )
    }

    /// One shared interval for every source.
    pub fn uniform(sources: &[SourceId], interval: Duration) -> Self {
        Self::new(sources.iter().map(|source| (*source, interval)))
    }

    pub fn interval(&self, source: SourceId) -> Option<Duration> {
        self.slots.get(&source).map(|slot| slot.interval)
    }

    /// Sleep until at least one source is due, then return every due source in order.
    ///
    /// Returns an empty list at once when nothing is scheduled. Cancel safe: the
    /// timetable only moves after the sleep completes.
    pub async fn next_due(&mut self) -> Vec<SourceId> {
        let Some(earliest) = self.slots.values().map(|slot| slot.next_due).min() else {
            return Vec::new();
        };
        sleep_until(earliest).await;

        let now = Instant::now();
        let mut due = Vec::new();
        for (source, slot) in &mut self.slots {
            if slot.next_due > now {
                continue;
            }
            due.push(*source);
            while slot.next_due <= now {
                slot.next_due += slot.interval;
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elapsed_secs(started: Instant) -> u64 {
        started.elapsed().as_secs()
    }

    #[tokio::test(start_paused = true)]
    async fn sources_fire_on_their_own_intervals() {
        // Given: quotes every 15 minutes and metal rates every 30
        let started = Instant::now();
        let mut schedule = RefreshSchedule::new([
            (SourceId::ExchangeA, Duration::from_secs(900)),
            (SourceId::ExchangeB, Duration::from_secs(900)),
            (SourceId::MetalRate, Duration::from_secs(1_800)),
        ]);

        // When / Then: everything starts together, then GOLD joins every other quote tick
        assert_eq!(
            schedule.next_due().await,
            vec![SourceId::ExchangeA, SourceId::ExchangeB, SourceId::MetalRate]
        );
        assert_eq!(elapsed_secs(started), 0);

        assert_eq!(
            schedule.next_due().await,
            vec![SourceId::ExchangeA, SourceId::ExchangeB]
        );
        assert_eq!(elapsed_secs(started), 900);

        assert_eq!(
            schedule.next_due().await,
            vec![SourceId::ExchangeA, SourceId::ExchangeB, SourceId::MetalRate]
        );
        assert_eq!(elapsed_secs(started), 1_800);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_missed_during_a_long_cycle_are_skipped() {
        // Given: a 60s source whose first cycle takes 150s
        let started = Instant::now();
        let mut schedule = RefreshSchedule::uniform(&[SourceId::ExchangeA], Duration::from_secs(60));
        assert_eq!(schedule.next_due().await, vec![SourceId::ExchangeA]);
        tokio::time::advance(Duration::from_secs(150)).await;

        // When: the scheduler asks for the next due sources twice
        let late = schedule.next_due().await;
        let late_at = elapsed_secs(started);
        let next = schedule.next_due().await;

        // Then: one catch-up run fires at once, and the next lands on the original grid
        assert_eq!(late, vec![SourceId::ExchangeA]);
        assert_eq!(late_at, 150);
        assert_eq!(next, vec![SourceId::ExchangeA]);
        assert_eq!(elapsed_secs(started), 180);
    }

    #[test]
    fn intervals_come_from_config() {
        let config = PipelineConfig::defaults();
        let schedule = RefreshSchedule::from_config(&config, &SourceId::ALL);

        assert_eq!(schedule.interval(SourceId::ExchangeA), Some(Duration::from_secs(900)));
        assert_eq!(schedule.interval(SourceId::MetalRate), Some(Duration::from_secs(1_800)));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_schedule_has_nothing_due() {
        let mut schedule = RefreshSchedule::new([]);
        assert!(schedule.next_due().await.is_empty());
    }
}
