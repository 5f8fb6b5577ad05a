use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Upstream sources the refresh pipeline knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SourceId {
    /// Primary equity exchange.
    #[serde(rename = "EX_A")]
    ExchangeA,
    /// Secondary equity exchange.
    #[serde(rename = "EX_B")]
    ExchangeB,
    /// Precious-metal rate publisher.
    #[serde(rename = "GOLD")]
    MetalRate,
}

/// What kind of record a source produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Quotes,
    MetalRates,
}

impl SourceId {
    pub const ALL: [Self; 3] = [Self::ExchangeA, Self::ExchangeB, Self::MetalRate];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExchangeA => "EX_A",
            Self::ExchangeB => "EX_B",
            Self::MetalRate => "GOLD",
        }
    }

    pub const fn kind(self) -> SourceKind {
        match self {
            Self::ExchangeA | Self::ExchangeB => SourceKind::Quotes,
            Self::MetalRate => SourceKind::MetalRates,
        }
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "EX_A" | "NSE" => Ok(Self::ExchangeA),
            "EX_B" | "BSE" => Ok(Self::ExchangeB),
            "GOLD" | "METAL" => Ok(Self::MetalRate),
            _ => Err(ValidationError::InvalidSource {
                value: value.trim().to_owned(),
            }),
        }
    }
}
