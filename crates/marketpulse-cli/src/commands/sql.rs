use marketpulse_core::{PipelineConfig, QueryGuardrails};

use crate::cli::SqlArgs;
use crate::error::CliError;

use super::{open_warehouse, CommandResult};

pub fn run(args: &SqlArgs, config: &PipelineConfig) -> Result<CommandResult, CliError> {
    let query = args.query.trim();
    if query.is_empty() {
        return Err(CliError::Command(String::from("query must not be empty")));
    }

    let warehouse = open_warehouse(config)?;
    let guardrails = QueryGuardrails {
        max_rows: args.max_rows,
        query_timeout_ms: args.query_timeout_ms,
    };
    let result = warehouse.execute_query(query, guardrails)?;

    if result.truncated {
        tracing::warn!(
            row_count = result.row_count,
            "result truncated (use --max-rows to increase the limit)"
        );
    }
    Ok(CommandResult::ok(serde_json::to_value(&result)?))
}
