//! Pipeline configuration.
//!
//! Resolution order: compiled defaults, then an optional TOML file, then
//! `MARKETPULSE_*` environment variables. The result is validated after
//! every layer so a bad file fails before env overrides hide it.
//!
//! ```toml
//! request_timeout_ms = 20000
//!
//! [breaker]
//! failure_threshold = 3
//!
//! [sources.EX_B]
//! max_concurrency = 2
//! base_url = "http://localhost:8080"
//!
//! [sources.GOLD]
//! refresh_interval_secs = 3600
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use marketpulse_warehouse::WarehouseConfig;
use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::domain::Symbol;
use crate::error::ConfigError;
use crate::fetch::MetalTarget;
use crate::retry::{Backoff, RetryPolicy};
use crate::source::{SourceId, SourceKind};
use crate::source_policy::SourcePolicy;

pub const CONFIG_ENV: &str = "MARKETPULSE_CONFIG";

/// Metal rates are published a few times a day; quotes follow `refresh.interval_secs`.
const METAL_REFRESH_INTERVAL_SECS: u64 = 1_800;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefreshSettings {
    pub default_symbol_count: usize,
    pub seed_symbols: Vec<String>,
    pub interval_secs: u64,
    pub degraded_response_ms: u64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            default_symbol_count: 50,
            seed_symbols: vec![
                String::from("RELIANCE"),
                String::from("TCS"),
                String::from("INFY"),
            ],
            interval_secs: 900,
            degraded_response_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetalSettings {
    pub location: String,
    pub grade: String,
}

impl Default for MetalSettings {
    fn default() -> Self {
        Self {
            location: String::from("Coimbatore"),
            grade: String::from("22K"),
        }
    }
}

/// Per-source overrides, keyed by source tag in the file (`[sources.EX_A]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSettings {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub max_concurrency: usize,
    pub pacing_ms: u64,
    pub quota_per_minute: u32,
    /// Seconds between scheduled refreshes of this source.
    pub refresh_interval_secs: Option<u64>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            max_concurrency: 5,
            pacing_ms: 100,
            quota_per_minute: 60,
            refresh_interval_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub breaker: BreakerSettings,
    pub retry: RetrySettings,
    pub request_timeout_ms: u64,
    pub refresh: RefreshSettings,
    pub metal: MetalSettings,
    pub sources: BTreeMap<String, SourceSettings>,
    pub warehouse_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerSettings::default(),
            retry: RetrySettings::default(),
            request_timeout_ms: 30_000,
            refresh: RefreshSettings::default(),
            metal: MetalSettings::default(),
            sources: BTreeMap::new(),
            warehouse_path: None,
        }
    }
}

impl PipelineConfig {
    /// Resolve defaults, the file at `path` (or `MARKETPULSE_CONFIG`), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let path = path.map(Path::to_path_buf).or(env_path);

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::defaults(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn defaults() -> Self {
        Self::default()
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text).map_err(|error| match error {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: String::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MARKETPULSE_*` overrides read through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = read("MARKETPULSE_FAILURE_THRESHOLD") {
            self.breaker.failure_threshold = parse_env("MARKETPULSE_FAILURE_THRESHOLD", &value)?;
        }
        if let Some(value) = read("MARKETPULSE_RECOVERY_TIMEOUT_SECS") {
            self.breaker.recovery_timeout_secs =
                parse_env("MARKETPULSE_RECOVERY_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read("MARKETPULSE_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_env("MARKETPULSE_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read("MARKETPULSE_BASE_DELAY_MS") {
            self.retry.base_delay_ms = parse_env("MARKETPULSE_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read("MARKETPULSE_MAX_DELAY_MS") {
            self.retry.max_delay_ms = parse_env("MARKETPULSE_MAX_DELAY_MS", &value)?;
        }
        if let Some(value) = read("MARKETPULSE_RETRY_JITTER") {
            self.retry.jitter = parse_env("MARKETPULSE_RETRY_JITTER", &value)?;
        }
        if let Some(value) = read("MARKETPULSE_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_env("MARKETPULSE_REQUEST_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read("MARKETPULSE_DEFAULT_SYMBOL_COUNT") {
            self.refresh.default_symbol_count =
                parse_env("MARKETPULSE_DEFAULT_SYMBOL_COUNT", &value)?;
        }
        if let Some(value) = read("MARKETPULSE_REFRESH_INTERVAL_SECS") {
            self.refresh.interval_secs = parse_env("MARKETPULSE_REFRESH_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read("MARKETPULSE_MAX_CONCURRENCY") {
            let max_concurrency: usize = parse_env("MARKETPULSE_MAX_CONCURRENCY", &value)?;
            for source in SourceId::ALL {
                self.sources
                    .entry(source.as_str().to_owned())
                    .or_default()
                    .max_concurrency = max_concurrency;
            }
        }
        if let Some(value) = read("MARKETPULSE_METAL_LOCATION") {
            self.metal.location = value.trim().to_owned();
        }
        if let Some(value) = read("MARKETPULSE_METAL_GRADE") {
            self.metal.grade = value.trim().to_ascii_uppercase();
        }
        if let Some(value) = read("MARKETPULSE_WAREHOUSE_PATH") {
            self.warehouse_path = Some(PathBuf::from(value.trim()));
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(String::from(
                "breaker.failure_threshold must be at least 1",
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(String::from(
                "retry.max_attempts must be at least 1",
            )));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be a finite number >= 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(String::from(
                "request_timeout_ms must be greater than zero",
            )));
        }
        if self.refresh.interval_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "refresh.interval_secs must be greater than zero",
            )));
        }
        for key in self.sources.keys() {
            SourceId::from_str(key)?;
        }
        for (key, settings) in &self.sources {
            if settings.max_concurrency == 0 {
                return Err(ConfigError::Invalid(format!(
                    "sources.{key}.max_concurrency must be at least 1"
                )));
            }
            if settings.refresh_interval_secs == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "sources.{key}.refresh_interval_secs must be greater than zero"
                )));
            }
        }
        self.seed_symbols()?;
        self.metal_target()?;
        Ok(())
    }

    /// Settings for `source`, falling back to defaults when the file has no table for it.
    pub fn source_settings(&self, source: SourceId) -> SourceSettings {
        self.sources
            .iter()
            .find(|(key, _)| SourceId::from_str(key).ok() == Some(source))
            .map(|(_, settings)| settings.clone())
            .unwrap_or_default()
    }

    pub fn enabled_sources(&self) -> Vec<SourceId> {
        SourceId::ALL
            .into_iter()
            .filter(|source| self.source_settings(*source).enabled)
            .collect()
    }

    pub fn base_url(&self, source: SourceId) -> String {
        self.source_settings(source)
            .base_url
            .unwrap_or_else(|| default_base_url(source).to_owned())
            .trim_end_matches('/')
            .to_owned()
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.breaker.failure_threshold,
            recovery_timeout: Duration::from_secs(self.breaker.recovery_timeout_secs),
            ..CircuitBreakerConfig::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(self.retry.base_delay_ms),
                factor: self.retry.multiplier,
                max: Duration::from_millis(self.retry.max_delay_ms),
                jitter: self.retry.jitter,
            },
            ..RetryPolicy::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn policy_for(&self, source: SourceId) -> SourcePolicy {
        let settings = self.source_settings(source);
        SourcePolicy {
            source,
            max_concurrency: settings.max_concurrency,
            pacing: Duration::from_millis(settings.pacing_ms),
            quota_per_minute: settings.quota_per_minute,
            request_timeout: self.request_timeout(),
            retry: self.retry_policy(),
            breaker: self.breaker_config(),
        }
    }

    pub fn seed_symbols(&self) -> Result<Vec<Symbol>, ConfigError> {
        Ok(Symbol::parse_all(&self.refresh.seed_symbols)?)
    }

    pub fn metal_target(&self) -> Result<MetalTarget, ConfigError> {
        let location = self.metal.location.trim();
        let grade = self.metal.grade.trim();
        if location.is_empty() || grade.is_empty() {
            return Err(ConfigError::Invalid(String::from(
                "metal.location and metal.grade must not be empty",
            )));
        }
        Ok(MetalTarget::new(location, grade.to_ascii_uppercase()))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh.interval_secs)
    }

    /// Schedule period of `source`: its own override, else the default for its kind.
    pub fn refresh_interval_for(&self, source: SourceId) -> Duration {
        let secs = self
            .source_settings(source)
            .refresh_interval_secs
            .unwrap_or(match source.kind() {
                SourceKind::Quotes => self.refresh.interval_secs,
                SourceKind::MetalRates => METAL_REFRESH_INTERVAL_SECS,
            });
        Duration::from_secs(secs)
    }

    pub fn degraded_response(&self) -> Duration {
        Duration::from_millis(self.refresh.degraded_response_ms)
    }

    pub fn warehouse_config(&self) -> WarehouseConfig {
        self.warehouse_path
            .as_ref()
            .map_or_else(WarehouseConfig::default, WarehouseConfig::at)
    }
}

pub const fn default_base_url(source: SourceId) -> &'static str {
    match source {
        SourceId::ExchangeA => "https://www.nseindia.com",
        SourceId::ExchangeB => "https://www.bseindia.com",
        SourceId::MetalRate => "https://www.goodreturns.in",
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}
