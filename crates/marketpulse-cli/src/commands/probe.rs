use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use marketpulse_core::{endpoint_for, PipelineConfig, SourceAdapter, SourceId};

use crate::error::CliError;

use super::{http_client, CommandResult};

/// Probe every enabled source without opening the warehouse.
pub async fn run(config: &PipelineConfig) -> Result<CommandResult, CliError> {
    let metal_target = config.metal_target()?;
    let http_client = http_client()?;

    let adapters = config
        .enabled_sources()
        .into_iter()
        .map(|source| {
            let endpoint = endpoint_for(source, config.base_url(source), &metal_target);
            SourceAdapter::new(endpoint, Arc::clone(&http_client), &config.policy_for(source))
        })
        .collect::<Vec<_>>();

    let probes = adapters
        .iter()
        .map(|adapter| async move {
            adapter.prime_session().await;
            (adapter.source(), adapter.test_connectivity().await)
        });
    let results = join_all(probes)
        .await
        .into_iter()
        .collect::<BTreeMap<SourceId, bool>>();

    for (source, reachable) in &results {
        tracing::info!(source = %source, reachable, "connectivity probe");
    }
    let all_up = results.values().all(|reachable| *reachable);
    Ok(CommandResult::ok(serde_json::to_value(&results)?).with_success(all_up))
}
