use std::str::FromStr;

use marketpulse_core::{CycleRequest, MetalTarget, PipelineConfig, SourceId, Symbol};
use serde_json::json;

use crate::cli::RefreshArgs;
use crate::error::CliError;

use super::{build_coordinator, CommandResult};

pub async fn run(args: &RefreshArgs, config: &PipelineConfig) -> Result<CommandResult, CliError> {
    let request = cycle_request(args)?;
    let coordinator = build_coordinator(config)?;

    let run = coordinator.run_cycle(request).await;
    let success = run.success;

    let data = if args.stats {
        json!({ "run": run, "stats": coordinator.stats() })
    } else {
        serde_json::to_value(&run)?
    };
    Ok(CommandResult::ok(data).with_success(success))
}

fn cycle_request(args: &RefreshArgs) -> Result<CycleRequest, CliError> {
    let mut request = CycleRequest::all();

    if !args.sources.is_empty() {
        let sources = args
            .sources
            .iter()
            .map(|source| SourceId::from_str(source))
            .collect::<Result<Vec<_>, _>>()?;
        request = request.with_sources(sources);
    }
    if !args.symbols.is_empty() {
        request = request.with_symbols(Symbol::parse_all(&args.symbols)?);
    }
    if !args.metal_targets.is_empty() {
        let targets = args
            .metal_targets
            .iter()
            .map(|target| MetalTarget::from_str(target))
            .collect::<Result<Vec<_>, _>>()?;
        request = request.with_metal_targets(targets);
    }

    Ok(request)
}
