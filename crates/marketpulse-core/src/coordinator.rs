//! One end-to-end refresh cycle.
//!
//! Each source runs as its own task: target selection, bounded fetch, upserts
//! and the status probe. The cycle joins every task before it aggregates, so a
//! slow or failing source never delays or fails its siblings. Storage calls run
//! on tokio's blocking pool.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use marketpulse_warehouse::WarehouseError;
use serde::Serialize;
use tokio::task::{self, JoinSet};
use tokio::time::Instant;
use uuid::Uuid;

use crate::adapters::endpoint_for;
use crate::config::PipelineConfig;
use crate::domain::{Symbol, UtcDateTime};
use crate::error::CoreError;
use crate::fetch::{FetchOutcome, FetchRequest, MetalTarget};
use crate::health::HealthRecord;
use crate::http_client::HttpClient;
use crate::id_gen::IdGenerator;
use crate::source::{SourceId, SourceKind};
use crate::source_adapter::SourceAdapter;
use crate::stats::StatsSnapshot;
use crate::store::RefreshStore;

const SEED_SYMBOLS: [&str; 3] = ["RELIANCE", "TCS", "INFY"];

/// What one cycle should refresh. `None` fields fall back to the coordinator's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleRequest {
    pub sources: Option<Vec<SourceId>>,
    pub symbols: Option<Vec<Symbol>>,
    pub metal_targets: Option<Vec<MetalTarget>>,
}

impl CycleRequest {
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sources(mut self, sources: impl IntoIterator<Item = SourceId>) -> Self {
        self.sources = Some(sources.into_iter().collect());
        self
    }

    #[must_use]
    pub fn with_symbols(mut self, symbols: impl IntoIterator<Item = Symbol>) -> Self {
        self.symbols = Some(symbols.into_iter().collect());
        self
    }

    #[must_use]
    pub fn with_metal_targets(mut self, targets: impl IntoIterator<Item = MetalTarget>) -> Self {
        self.metal_targets = Some(targets.into_iter().collect());
        self
    }
}

/// Per-source line of a [`RefreshRun`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub source: SourceId,
    pub requested: usize,
    pub inserted: usize,
    pub errored: usize,
    /// A fatal storage error stopped this source's upserts.
    pub aborted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthRecord>,
    pub duration_ms: u64,
    pub errors: Vec<String>,
}

impl SourceSummary {
    fn empty(source: SourceId) -> Self {
        Self {
            source,
            requested: 0,
            inserted: 0,
            errored: 0,
            aborted: false,
            health: None,
            duration_ms: 0,
            errors: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errored == 0 && self.errors.is_empty() && !self.aborted
    }
}

/// Immutable outcome of one refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshRun {
    pub run_id: Uuid,
    pub started_at: UtcDateTime,
    pub finished_at: UtcDateTime,
    pub sources: Vec<SourceSummary>,
    pub success: bool,
    pub errors: Vec<String>,
}

impl RefreshRun {
    pub fn requested(&self) -> usize {
        self.sources.iter().map(|summary| summary.requested).sum()
    }

    pub fn inserted(&self) -> usize {
        self.sources.iter().map(|summary| summary.inserted).sum()
    }

    pub fn errored(&self) -> usize {
        self.sources.iter().map(|summary| summary.errored).sum()
    }

    pub fn summary(&self, source: SourceId) -> Option<&SourceSummary> {
        self.sources.iter().find(|summary| summary.source == source)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    pub default_symbol_count: usize,
    /// Used when the instrument universe is empty or unreadable.
    pub seed_symbols: Vec<Symbol>,
    pub metal_targets: Vec<MetalTarget>,
    pub degraded_response: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            default_symbol_count: 50,
            seed_symbols: SEED_SYMBOLS
                .iter()
                .filter_map(|symbol| Symbol::parse(symbol).ok())
                .collect(),
            metal_targets: vec![MetalTarget::new("Coimbatore", "22K")],
            degraded_response: Duration::from_secs(5),
        }
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, CoreError> {
        Ok(Self {
            default_symbol_count: config.refresh.default_symbol_count,
            seed_symbols: config.seed_symbols()?,
            metal_targets: vec![config.metal_target()?],
            degraded_response: config.degraded_response(),
        })
    }
}

pub struct RefreshCoordinator {
    adapters: BTreeMap<SourceId, Arc<SourceAdapter>>,
    store: Arc<dyn RefreshStore>,
    ids: Arc<IdGenerator>,
    settings: CoordinatorSettings,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("sources", &self.sources())
            .field("last_id", &self.ids.last())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    /// Create a coordinator with no sources, seeding the id sequence from `store`.
    pub fn new(store: Arc<dyn RefreshStore>, settings: CoordinatorSettings) -> Self {
        let ids = match store.max_row_id() {
            Ok(floor) => IdGenerator::seeded(floor),
            Err(error) => {
                tracing::warn!(error = %error, "cannot read max row id; id sequence starts from the clock");
                IdGenerator::new()
            }
        };

        Self {
            adapters: BTreeMap::new(),
            store,
            ids: Arc::new(ids),
            settings,
        }
    }

    /// Register `adapter`, replacing any adapter for the same source.
    #[must_use]
    pub fn with_adapter(mut self, adapter: SourceAdapter) -> Self {
        self.adapters.insert(adapter.source(), Arc::new(adapter));
        self
    }

    /// Build every enabled source's adapter over one shared transport.
    pub fn from_config(
        config: &PipelineConfig,
        store: Arc<dyn RefreshStore>,
        http_client: Arc<dyn HttpClient>,
    ) -> Result<Self, CoreError> {
        let settings = CoordinatorSettings::from_config(config)?;
        let metal_target = config.metal_target()?;

        let mut coordinator = Self::new(store, settings);
        for source in config.enabled_sources() {
            let endpoint = endpoint_for(source, config.base_url(source), &metal_target);
            let adapter =
                SourceAdapter::new(endpoint, Arc::clone(&http_client), &config.policy_for(source));
            coordinator = coordinator.with_adapter(adapter);
        }
        Ok(coordinator)
    }

    pub fn adapter(&self, source: SourceId) -> Option<&Arc<SourceAdapter>> {
        self.adapters.get(&source)
    }

    pub fn sources(&self) -> Vec<SourceId> {
        self.adapters.keys().copied().collect()
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn stats(&self) -> Vec<StatsSnapshot> {
        self.adapters.values().map(|adapter| adapter.stats()).collect()
    }

    /// Connectivity of every registered source, probed concurrently.
    pub async fn probe_all(&self) -> BTreeMap<SourceId, bool> {
        let probes = self.adapters.iter().map(|(source, adapter)| async move {
            (*source, adapter.test_connectivity().await)
        });
        futures::future::join_all(probes).await.into_iter().collect()
    }

    /// Run one refresh cycle. Partial failure is reported in the run, never raised.
    pub async fn run_cycle(&self, request: CycleRequest) -> RefreshRun {
        let run_id = Uuid::new_v4();
        let started_at = UtcDateTime::now();
        let clock = Instant::now();

        let mut errors = Vec::new();
        let mut selected = Vec::new();
        for source in request.sources.clone().unwrap_or_else(|| self.sources()) {
            if selected.contains(&source) {
                continue;
            }
            if self.adapters.contains_key(&source) {
                selected.push(source);
            } else {
                errors.push(format!("{source}: source not configured"));
            }
        }

        let mut tasks = JoinSet::new();
        for source in &selected {
            let Some(adapter) = self.adapters.get(source) else {
                continue;
            };
            let job = SourceJob {
                adapter: Arc::clone(adapter),
                store: Arc::clone(&self.store),
                ids: Arc::clone(&self.ids),
                settings: self.settings.clone(),
                symbols: request.symbols.clone(),
                metal_targets: request.metal_targets.clone(),
            };
            tasks.spawn(job.run());
        }

        let mut by_source = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(summary) => {
                    by_source.insert(summary.source, summary);
                }
                Err(error) => tracing::error!(error = %error, "source sub-cycle task failed"),
            }
        }

        let mut sources = Vec::with_capacity(selected.len());
        for source in selected {
            match by_source.remove(&source) {
                Some(summary) => sources.push(summary),
                None => {
                    let mut summary = SourceSummary::empty(source);
                    summary.aborted = true;
                    summary.errors.push(format!("{source}: sub-cycle task failed"));
                    sources.push(summary);
                }
            }
        }
        sources.sort_by_key(|summary| summary.source);
        for summary in &sources {
            errors.extend(summary.errors.iter().cloned());
        }

        let success = errors.is_empty() && sources.iter().all(SourceSummary::is_clean);
        let run = RefreshRun {
            run_id,
            started_at,
            finished_at: UtcDateTime::now(),
            sources,
            success,
            errors,
        };

        tracing::info!(
            run_id = %run.run_id,
            requested = run.requested(),
            inserted = run.inserted(),
            errored = run.errored(),
            success = run.success,
            duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
            "refresh cycle finished"
        );

        let audit = run.clone();
        if let Err(error) = blocking(&self.store, move |store| store.record_run(&audit)).await {
            tracing::warn!(run_id = %run.run_id, error = %error, "cannot write refresh audit log");
        }
        run
    }
}

/// Everything one source's sub-cycle owns for the lifetime of its task.
struct SourceJob {
    adapter: Arc<SourceAdapter>,
    store: Arc<dyn RefreshStore>,
    ids: Arc<IdGenerator>,
    settings: CoordinatorSettings,
    symbols: Option<Vec<Symbol>>,
    metal_targets: Option<Vec<MetalTarget>>,
}

impl SourceJob {
    async fn run(self) -> SourceSummary {
        let source = self.adapter.source();
        let started = Instant::now();
        let mut summary = SourceSummary::empty(source);

        let requests = self.requests(source).await;
        summary.requested = requests.len();
        self.adapter.prime_session().await;
        let outcomes = self.adapter.fetch_many(requests).await;

        for outcome in outcomes {
            match outcome {
                FetchOutcome::Failure { request, error } => {
                    summary.errored += 1;
                    summary.errors.push(format!("{}: {}", request.key, error.summary()));
                }
                FetchOutcome::Success { .. } if summary.aborted => summary.errored += 1,
                FetchOutcome::Success { request, record } => {
                    let id = self.ids.next_id();
                    let written =
                        blocking(&self.store, move |store| store.upsert_record(id, &record)).await;
                    match written {
                        Ok(_) => summary.inserted += 1,
                        Err(error) if error.is_fatal() => {
                            tracing::error!(
                                source = %source,
                                key = %request.key,
                                error = %error,
                                "storage failure aborts source sub-cycle"
                            );
                            summary.errored += 1;
                            summary.aborted = true;
                            summary.errors.push(format!("{source}: {error}"));
                        }
                        Err(error) => {
                            summary.errored += 1;
                            summary
                                .errors
                                .push(format!("{}: storage error: {error}", request.key));
                        }
                    }
                }
            }
        }

        if !summary.aborted {
            if let Some(health) = self.adapter.probe_status(self.settings.degraded_response).await {
                let id = self.ids.next_id();
                let row = health.clone();
                if let Err(error) =
                    blocking(&self.store, move |store| store.append_health(id, &row)).await
                {
                    summary.errors.push(format!("{source}: health write failed: {error}"));
                }
                summary.health = Some(health);
            }
        }

        summary.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(
            source = %source,
            requested = summary.requested,
            inserted = summary.inserted,
            errored = summary.errored,
            aborted = summary.aborted,
            "source sub-cycle finished"
        );
        summary
    }

    async fn requests(&self, source: SourceId) -> Vec<FetchRequest> {
        match source.kind() {
            SourceKind::MetalRates => self
                .metal_targets
                .clone()
                .unwrap_or_else(|| self.settings.metal_targets.clone())
                .into_iter()
                .map(FetchRequest::metal)
                .collect(),
            SourceKind::Quotes => self
                .target_symbols(source)
                .await
                .into_iter()
                .map(|symbol| FetchRequest::quote(source, symbol))
                .collect(),
        }
    }

    /// Explicit symbols, else the top of the stored universe, else the seed list.
    async fn target_symbols(&self, source: SourceId) -> Vec<Symbol> {
        if let Some(symbols) = &self.symbols {
            return symbols.clone();
        }

        let limit = self.settings.default_symbol_count;
        match blocking(&self.store, move |store| store.top_symbols(source, limit)).await {
            Ok(stored) => {
                let symbols = stored
                    .iter()
                    .filter_map(|symbol| match Symbol::parse(symbol) {
                        Ok(symbol) => Some(symbol),
                        Err(error) => {
                            tracing::warn!(source = %source, symbol = %symbol, error = %error, "skipping stored symbol");
                            None
                        }
                    })
                    .collect::<Vec<_>>();
                if symbols.is_empty() {
                    self.settings.seed_symbols.clone()
                } else {
                    symbols
                }
            }
            Err(error) => {
                tracing::warn!(source = %source, error = %error, "cannot read instrument universe; using seed symbols");
                self.settings.seed_symbols.clone()
            }
        }
    }
}

/// Run a synchronous storage call on the blocking pool.
///
/// A panicked or cancelled call surfaces as a fatal connection error.
async fn blocking<T, F>(store: &Arc<dyn RefreshStore>, call: F) -> Result<T, WarehouseError>
where
    F: FnOnce(&dyn RefreshStore) -> Result<T, WarehouseError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    task::spawn_blocking(move || call(store.as_ref()))
        .await
        .map_err(|error| WarehouseError::Connection(format!("storage task failed: {error}")))?
}
