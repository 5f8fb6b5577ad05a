use std::time::Duration;

use marketpulse_core::{CycleRequest, PipelineConfig, RefreshSchedule};
use serde_json::json;

use crate::cli::ScheduleArgs;
use crate::error::CliError;

use super::{build_coordinator, CommandResult};

/// Refresh each source on its own interval until Ctrl-C or `--max-cycles`.
pub async fn run(args: &ScheduleArgs, config: &PipelineConfig) -> Result<CommandResult, CliError> {
    let coordinator = build_coordinator(config)?;
    let sources = coordinator.sources();
    if sources.is_empty() {
        return Err(CliError::Command(String::from("no sources are enabled")));
    }
    let mut schedule = match args.interval_secs {
        Some(0) => {
            return Err(CliError::Command(String::from(
                "--interval-secs must be at least 1",
            )))
        }
        Some(secs) => RefreshSchedule::uniform(&sources, Duration::from_secs(secs)),
        None => RefreshSchedule::from_config(config, &sources),
    };

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    for source in &sources {
        tracing::info!(
            source = %source,
            interval_secs = schedule.interval(*source).map_or(0, |interval| interval.as_secs()),
            "source scheduled"
        );
    }
    let mut cycles = 0_u64;
    let mut failed_cycles = 0_u64;
    let mut last_run_id = None;

    loop {
        if args.max_cycles.is_some_and(|max| cycles >= max) {
            break;
        }

        tokio::select! {
            due = schedule.next_due() => {
                let run = coordinator
                    .run_cycle(CycleRequest::all().with_sources(due))
                    .await;
                cycles += 1;
                if !run.success {
                    failed_cycles += 1;
                    tracing::warn!(run_id = %run.run_id, errors = ?run.errors, "refresh cycle reported errors");
                }
                for stats in coordinator.stats() {
                    tracing::info!(
                        source = %stats.source,
                        fetch_count = stats.fetch_count,
                        error_count = stats.error_count,
                        success_rate = stats.success_rate,
                        circuit = ?stats.circuit.state,
                        "source stats"
                    );
                }
                last_run_id = Some(run.run_id);
            }
            signal = &mut shutdown => {
                if let Err(error) = signal {
                    tracing::warn!(error = %error, "cannot listen for Ctrl-C; stopping");
                }
                tracing::info!("shutdown requested");
                break;
            }
        }
    }

    tracing::info!(cycles, failed_cycles, "scheduler stopped");
    Ok(CommandResult::ok(json!({
        "cycles": cycles,
        "failed_cycles": failed_cycles,
        "last_run_id": last_run_id,
        "stats": coordinator.stats(),
    })))
}
