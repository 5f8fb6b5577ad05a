mod instruments;
mod probe;
mod refresh;
mod schedule;
mod sql;

use std::sync::Arc;

use marketpulse_core::{
    CoreError, HttpClient, PipelineConfig, RefreshCoordinator, ReqwestHttpClient, Warehouse,
};
use serde_json::Value;

use crate::cli::{Cli, Command, InstrumentsCommand};
use crate::error::CliError;

pub struct CommandResult {
    pub data: Value,
    /// `false` turns into exit code 3.
    pub success: bool,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            success: true,
        }
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }
}

pub async fn run(cli: &Cli) -> Result<CommandResult, CliError> {
    let config = PipelineConfig::load(cli.config.as_deref())?;

    match &cli.command {
        Command::Refresh(args) => refresh::run(args, &config).await,
        Command::Schedule(args) => schedule::run(args, &config).await,
        Command::Probe => probe::run(&config).await,
        Command::Sql(args) => sql::run(args, &config),
        Command::Instruments(args) => match &args.command {
            InstrumentsCommand::Load(load) => instruments::load(load, &config),
        },
    }
}

fn open_warehouse(config: &PipelineConfig) -> Result<Warehouse, CliError> {
    let warehouse_config = config.warehouse_config();
    tracing::debug!(path = %warehouse_config.db_path.display(), "opening warehouse");
    Ok(Warehouse::open(warehouse_config)?)
}

fn build_coordinator(config: &PipelineConfig) -> Result<RefreshCoordinator, CliError> {
    let warehouse = Arc::new(open_warehouse(config)?);
    Ok(RefreshCoordinator::from_config(
        config,
        warehouse,
        http_client()?,
    )?)
}

fn http_client() -> Result<Arc<dyn HttpClient>, CliError> {
    let client = ReqwestHttpClient::new().map_err(CoreError::from)?;
    Ok(Arc::new(client))
}
