use std::fs;
use std::str::FromStr;

use marketpulse_core::{InstrumentRow, PipelineConfig, SourceId, Symbol};
use serde_json::json;

use crate::cli::LoadArgs;
use crate::error::CliError;

use super::{open_warehouse, CommandResult};

pub fn load(args: &LoadArgs, config: &PipelineConfig) -> Result<CommandResult, CliError> {
    let text = fs::read_to_string(&args.file)?;
    let rows = normalize(serde_json::from_str(&text)?)?;

    let warehouse = open_warehouse(config)?;
    let written = warehouse.upsert_instruments(&rows)?;
    tracing::info!(file = %args.file.display(), rows = rows.len(), written, "instrument universe loaded");

    Ok(CommandResult::ok(json!({
        "file": args.file.display().to_string(),
        "loaded": rows.len(),
    })))
}

/// Canonical symbols and source ids, so the universe joins against quotes.
fn normalize(rows: Vec<InstrumentRow>) -> Result<Vec<InstrumentRow>, CliError> {
    rows.into_iter()
        .map(|row| {
            let symbol = Symbol::parse(&row.symbol)?;
            let exchange = row
                .exchange
                .as_deref()
                .map(SourceId::from_str)
                .transpose()?
                .map(|source| source.as_str().to_owned());
            if row.market_cap.is_some_and(|cap| !cap.is_finite() || cap < 0.0) {
                return Err(CliError::Command(format!(
                    "{symbol}: market_cap must be a non-negative number"
                )));
            }
            Ok(InstrumentRow {
                symbol: symbol.as_str().to_owned(),
                exchange,
                ..row
            })
        })
        .collect()
}
