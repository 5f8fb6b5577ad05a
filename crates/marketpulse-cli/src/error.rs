use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] marketpulse_core::ValidationError),

    #[error(transparent)]
    Config(#[from] marketpulse_core::ConfigError),

    #[error(transparent)]
    Core(#[from] marketpulse_core::CoreError),

    #[error(transparent)]
    Warehouse(#[from] marketpulse_warehouse::WarehouseError),

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Command(_) => 2,
            Self::Serialization(_) => 4,
            Self::Config(_) => 5,
            Self::Core(_) => 6,
            Self::Warehouse(_) => 7,
            Self::Io(_) => 10,
        }
    }
}
