use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

use crate::fetch::{FetchOutcome, FetchRequest, SourceError};
use crate::source_policy::SourcePolicy;
use crate::throttling::Pacing;

/// Bounded fan-out of one source's fetch batch.
///
/// Every request is dispatched exactly once and yields exactly one outcome.
/// Outcomes come back in completion order. A slot keeps its permit through
/// the pacing pause, so pacing spaces requests per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOrchestrator {
    max_concurrency: usize,
    pacing: Pacing,
}

impl FetchOrchestrator {
    pub fn new(max_concurrency: usize, pacing: Pacing) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            pacing,
        }
    }

    pub fn from_policy(policy: &SourcePolicy) -> Self {
        Self::new(policy.slots(), policy.pacer())
    }

    pub const fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub async fn run<F, Fut>(&self, requests: Vec<FetchRequest>, fetch: F) -> Vec<FetchOutcome>
    where
        F: Fn(FetchRequest) -> Fut,
        Fut: Future<Output = FetchOutcome>,
    {
        let total = requests.len();
        let semaphore = Semaphore::new(self.max_concurrency);
        let pacing = self.pacing;
        let fetch = &fetch;
        let semaphore = &semaphore;

        let mut in_flight = requests
            .into_iter()
            .map(|request| async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return FetchOutcome::Failure {
                        request,
                        error: SourceError::internal("dispatch semaphore closed"),
                    };
                };
                let outcome = fetch(request).await;
                pacing.pause().await;
                outcome
            })
            .collect::<FuturesUnordered<_>>();

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = in_flight.next().await {
            outcomes.push(outcome);
        }

        let failed = outcomes.iter().filter(|outcome| !outcome.is_success()).count();
        tracing::debug!(
            requested = total,
            failed,
            max_concurrency = self.max_concurrency,
            "fetch batch finished"
        );
        outcomes
    }
}
