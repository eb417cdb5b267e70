use crate::data::bar::Interval;
use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// All errors generated while loading or validating the run configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Io: {0}")]
    Io(#[from] std::io::Error),

    #[error("Yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse day-first date: {0}")]
    Date(String),

    #[error("No `{section}` entry named `{name}` in the configuration")]
    MissingEntry { section: &'static str, name: String },

    #[error("Unknown `{section}` implementation tag: {kind}")]
    UnknownComponent { section: &'static str, kind: String },

    #[error("Invalid parameters for `{section}.{name}`: {source}")]
    InvalidParameters {
        section: &'static str,
        name: String,
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Structured YAML run configuration: global backtester settings plus named, tagged entries for
/// every pluggable component. CLI flags select which entries a run uses.
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    pub backtester_settings: BacktesterSettings,
    #[serde(default)]
    pub position_sizer: IndexMap<String, ComponentSpec>,
    #[serde(default)]
    pub slippage: IndexMap<String, ComponentSpec>,
    #[serde(default)]
    pub risk_manager: IndexMap<String, ComponentSpec>,
    #[serde(default)]
    pub strategies: IndexMap<String, StrategySpec>,
}

/// The `backtester_settings` section.
#[derive(Clone, Debug, Deserialize)]
pub struct BacktesterSettings {
    pub initial_capital: f64,
    /// Fallback order size used until a sizer produces one.
    pub initial_position_size: f64,
    /// Fraction of effective cash committable to a single order, in (0, 1].
    pub cash_buffer: f64,
    /// Day-first date, eg/ "01/03/2024".
    pub start_date: String,
    pub end_date: String,
    pub base_interval: Interval,
    pub metrics_interval: Interval,
    /// Live-mode run length.
    #[serde(default)]
    pub period: Option<Interval>,
    /// 24h "HH:MM" exchange closing time.
    pub exchange_closing_time: String,
    /// Ticker ingested for comparison only; its signals are ignored.
    #[serde(default)]
    pub benchmark: Option<String>,
    #[serde(default = "default_borrow_cost")]
    pub borrow_cost: f64,
    #[serde(default = "default_maintenance_margin")]
    pub maintenance_margin: f64,
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: f64,
}

fn default_borrow_cost() -> f64 {
    0.01
}

fn default_maintenance_margin() -> f64 {
    0.5
}

fn default_risk_per_trade() -> f64 {
    0.01
}

/// One selectable component entry: an implementation tag plus its parameters.
#[derive(Clone, Debug, Deserialize)]
pub struct ComponentSpec {
    pub kind: String,
    #[serde(default)]
    pub additional_parameters: serde_yaml::Value,
}

/// One selectable strategy entry.
#[derive(Clone, Debug, Deserialize)]
pub struct StrategySpec {
    pub kind: String,
    pub symbol_list: Vec<String>,
    /// Decimal places kept when sizing each symbol, aligned with `symbol_list`.
    pub rounding_list: Vec<u32>,
    /// Interval the strategy trades on; must be a multiple of the base interval.
    pub interval: Interval,
    #[serde(default)]
    pub additional_parameters: serde_yaml::Value,
}

impl RunConfig {
    /// Loads and validates a [`RunConfig`] from a YAML file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_str(&contents)
    }

    /// Parses and validates a [`RunConfig`] from YAML text.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let settings = &self.backtester_settings;
        if settings.initial_capital <= 0.0 {
            return Err(ConfigError::Invalid(
                "initial_capital must be positive".to_owned(),
            ));
        }
        if settings.cash_buffer <= 0.0 || settings.cash_buffer > 1.0 {
            return Err(ConfigError::Invalid(
                "cash_buffer must be in (0, 1]".to_owned(),
            ));
        }
        if settings.start()? >= settings.end()? {
            return Err(ConfigError::Invalid(
                "start_date must precede end_date".to_owned(),
            ));
        }
        for (name, strategy) in &self.strategies {
            if strategy.symbol_list.len() != strategy.rounding_list.len() {
                return Err(ConfigError::Invalid(format!(
                    "strategies.{name}: symbol_list and rounding_list lengths differ"
                )));
            }
        }
        Ok(())
    }
}

impl BacktesterSettings {
    /// Parsed start of the backtest window.
    pub fn start(&self) -> Result<DateTime<Utc>, ConfigError> {
        parse_dayfirst_date(&self.start_date)
    }

    /// Parsed end of the backtest window.
    pub fn end(&self) -> Result<DateTime<Utc>, ConfigError> {
        parse_dayfirst_date(&self.end_date)
    }
}

/// Parses a day-first date string ("01/03/2024", "01-03-2024") or an ISO date to midnight UTC.
pub fn parse_dayfirst_date(input: &str) -> Result<DateTime<Utc>, ConfigError> {
    for format in ["%d/%m/%Y", "%d-%m-%Y", "%Y-%m-%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(input, format) {
            let midnight = date.and_hms_opt(0, 0, 0).expect("midnight is always valid");
            return Ok(midnight.and_utc());
        }
    }
    Err(ConfigError::Date(input.to_owned()))
}
