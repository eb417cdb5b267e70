use crate::config::{ComponentSpec, ConfigError, RunConfig};
use crate::data::aggregator::{BarStore, SubscriberHandle};
use crate::data::handler::DataHandler;
use crate::data::SharedHistory;
use crate::engine::error::EngineError;
use crate::engine::{Engine, EngineLego};
use crate::event::EventQueue;
use crate::execution::fill::IbCommission;
use crate::execution::handler::SimulatedExecution;
use crate::execution::slippage::{self, MultiFactorSlippage, NoSlippage, SlippageModel};
use crate::portfolio::allocator::{self, AtrSizer, ConstantSizer, PositionSizer};
use crate::portfolio::portfolio::{Portfolio, PortfolioLego};
use crate::portfolio::risk::{Limits, NoRiskManager, RiskManager, SimpleRiskManager};
use crate::strategy::buy_and_hold::{self, BuyAndHold};
use crate::strategy::ma_crossover::{self, MaCrossover};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::info;

/// Which named entry of each configuration section a run uses, normally taken from CLI flags.
#[derive(Clone, Debug)]
pub struct Selection {
    pub strategy: String,
    pub position_sizer: String,
    pub slippage: String,
    pub risk_manager: String,
}

fn component<'a>(
    section: &'static str,
    entries: &'a IndexMap<String, ComponentSpec>,
    name: &str,
) -> Result<&'a ComponentSpec, ConfigError> {
    entries.get(name).ok_or_else(|| ConfigError::MissingEntry {
        section,
        name: name.to_owned(),
    })
}

fn parameters<T: DeserializeOwned>(
    section: &'static str,
    name: &str,
    value: &serde_yaml::Value,
) -> Result<T, ConfigError> {
    let value = if value.is_null() {
        serde_yaml::Value::Mapping(Default::default())
    } else {
        value.clone()
    };
    serde_yaml::from_value(value).map_err(|source| ConfigError::InvalidParameters {
        section,
        name: name.to_owned(),
        source,
    })
}

/// Resolves a `position_sizer` entry into a shared sizer plus its bar-store subscription handle.
pub fn build_position_sizer(
    config: &RunConfig,
    name: &str,
) -> Result<(Arc<Mutex<dyn PositionSizer + Send>>, SubscriberHandle), ConfigError> {
    let spec = component("position_sizer", &config.position_sizer, name)?;
    match spec.kind.as_str() {
        "atr" => {
            let params: allocator::Config =
                parameters("position_sizer", name, &spec.additional_parameters)?;
            let sizer = Arc::new(Mutex::new(AtrSizer::new(params)));
            let handle: Arc<Mutex<dyn PositionSizer + Send>> = sizer.clone();
            let subscriber: SubscriberHandle = sizer;
            Ok((handle, subscriber))
        }
        "constant" => {
            let params: ConstantSizer =
                parameters("position_sizer", name, &spec.additional_parameters)?;
            let sizer = Arc::new(Mutex::new(params));
            let handle: Arc<Mutex<dyn PositionSizer + Send>> = sizer.clone();
            let subscriber: SubscriberHandle = sizer;
            Ok((handle, subscriber))
        }
        kind => Err(ConfigError::UnknownComponent {
            section: "position_sizer",
            kind: kind.to_owned(),
        }),
    }
}

/// Resolves a `slippage` entry into a shared model plus its bar-store subscription handle.
pub fn build_slippage(
    config: &RunConfig,
    name: &str,
) -> Result<(Arc<Mutex<dyn SlippageModel + Send>>, SubscriberHandle), ConfigError> {
    let spec = component("slippage", &config.slippage, name)?;
    match spec.kind.as_str() {
        "multi_factor" => {
            let params: slippage::Config = parameters("slippage", name, &spec.additional_parameters)?;
            let model = Arc::new(Mutex::new(MultiFactorSlippage::new(params)));
            let handle: Arc<Mutex<dyn SlippageModel + Send>> = model.clone();
            let subscriber: SubscriberHandle = model;
            Ok((handle, subscriber))
        }
        "none" => {
            let model = Arc::new(Mutex::new(NoSlippage));
            let handle: Arc<Mutex<dyn SlippageModel + Send>> = model.clone();
            let subscriber: SubscriberHandle = model;
            Ok((handle, subscriber))
        }
        kind => Err(ConfigError::UnknownComponent {
            section: "slippage",
            kind: kind.to_owned(),
        }),
    }
}

/// Resolves a `risk_manager` entry.
pub fn build_risk_manager(
    config: &RunConfig,
    name: &str,
) -> Result<Box<dyn RiskManager + Send>, ConfigError> {
    let spec = component("risk_manager", &config.risk_manager, name)?;
    match spec.kind.as_str() {
        "simple" => {
            let limits: Limits = parameters("risk_manager", name, &spec.additional_parameters)?;
            Ok(Box::new(SimpleRiskManager::new(limits)))
        }
        "none" => Ok(Box::new(NoRiskManager)),
        kind => Err(ConfigError::UnknownComponent {
            section: "risk_manager",
            kind: kind.to_owned(),
        }),
    }
}

/// Resolves a `strategies` entry into its bar-store subscription handle.
pub fn build_strategy(
    config: &RunConfig,
    name: &str,
    events: EventQueue,
) -> Result<SubscriberHandle, ConfigError> {
    let spec = config
        .strategies
        .get(name)
        .ok_or_else(|| ConfigError::MissingEntry {
            section: "strategies",
            name: name.to_owned(),
        })?;

    match spec.kind.as_str() {
        "buy_and_hold_simple" => {
            let params: buy_and_hold::Config =
                parameters("strategies", name, &spec.additional_parameters)?;
            let strategy = BuyAndHold::new(name.to_owned(), params, &spec.symbol_list, events);
            let handle: SubscriberHandle = Arc::new(Mutex::new(strategy));
            Ok(handle)
        }
        "moving_average_crossover" => {
            let params: ma_crossover::Config =
                parameters("strategies", name, &spec.additional_parameters)?;
            let strategy = MaCrossover::new(name.to_owned(), params, &spec.symbol_list, events)
                .map_err(|error| ConfigError::Invalid(format!("strategies.{name}: {error}")))?;
            let handle: SubscriberHandle = Arc::new(Mutex::new(strategy));
            Ok(handle)
        }
        kind => Err(ConfigError::UnknownComponent {
            section: "strategies",
            kind: kind.to_owned(),
        }),
    }
}

/// Wires every selected component into an [`Engine`]: portfolio, bar-store subscriptions (sizer
/// and strategy on the strategy interval; slippage and portfolio on the base interval) and the
/// simulated execution handler.
pub fn assemble_engine(
    config: &RunConfig,
    selection: &Selection,
    data: Box<dyn DataHandler + Send>,
    events: EventQueue,
    history: SharedHistory,
    continue_on_error: bool,
    liquidate_at_end: bool,
) -> Result<Engine, EngineError> {
    let settings = &config.backtester_settings;
    let strategy_spec =
        config
            .strategies
            .get(&selection.strategy)
            .ok_or_else(|| ConfigError::MissingEntry {
                section: "strategies",
                name: selection.strategy.clone(),
            })?;

    let (sizer, sizer_subscriber) = build_position_sizer(config, &selection.position_sizer)?;
    let (slippage, slippage_subscriber) = build_slippage(config, &selection.slippage)?;
    let risk = build_risk_manager(config, &selection.risk_manager)?;
    let strategy_subscriber = build_strategy(config, &selection.strategy, events.clone())?;

    let portfolio = Arc::new(Mutex::new(Portfolio::new(PortfolioLego {
        initial_capital: settings.initial_capital,
        cash_buffer: settings.cash_buffer,
        initial_position_size: settings.initial_position_size,
        symbol_list: strategy_spec.symbol_list.clone(),
        rounding_list: strategy_spec.rounding_list.clone(),
        start_date: settings.start()?,
        base_interval: settings.base_interval,
        metrics_interval: settings.metrics_interval,
        strategy_name: selection.strategy.clone(),
        risk_per_trade: settings.risk_per_trade,
        borrow_rate: settings.borrow_cost,
        maintenance_margin: settings.maintenance_margin,
        sizer,
        risk,
        events: events.clone(),
        history: history.clone(),
    })?));

    let mut bar_store = BarStore::new(settings.base_interval, history.clone());
    for ticker in &strategy_spec.symbol_list {
        bar_store.subscribe(strategy_spec.interval, ticker.clone(), sizer_subscriber.clone())?;
        bar_store.subscribe(
            settings.base_interval,
            ticker.clone(),
            slippage_subscriber.clone(),
        )?;
        let portfolio_subscriber: SubscriberHandle = portfolio.clone();
        bar_store.subscribe(settings.base_interval, ticker.clone(), portfolio_subscriber)?;
        bar_store.subscribe(
            strategy_spec.interval,
            ticker.clone(),
            strategy_subscriber.clone(),
        )?;
    }

    let execution = SimulatedExecution::new(
        events.clone(),
        history.clone(),
        settings.base_interval,
        slippage,
        Box::new(IbCommission),
    );

    info!(
        strategy = %selection.strategy,
        position_sizer = %selection.position_sizer,
        slippage = %selection.slippage,
        risk_manager = %selection.risk_manager,
        "assembled engine"
    );

    Ok(Engine::new(EngineLego {
        events,
        data,
        bar_store,
        portfolio,
        execution,
        benchmark: settings.benchmark.clone(),
        continue_on_error,
        liquidate_at_end,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
backtester_settings:
  initial_capital: 100000.0
  initial_position_size: 10
  cash_buffer: 0.95
  start_date: 01/03/2024
  end_date: 30/04/2024
  base_interval: 1d
  metrics_interval: 1d
  exchange_closing_time: "16:00"

position_sizer:
  atr:
    kind: atr
    additional_parameters:
      atr_window: 14
      atr_multiplier: 2.0
  fixed:
    kind: constant
    additional_parameters:
      position_size: 25

slippage:
  none:
    kind: none
  bad:
    kind: teleporting

risk_manager:
  permissive:
    kind: none

strategies:
  hold:
    kind: buy_and_hold_simple
    symbol_list: [AAPL]
    rounding_list: [0]
    interval: 1d
"#;

    fn config() -> RunConfig {
        RunConfig::from_str(CONFIG).unwrap()
    }

    #[test]
    fn resolves_registered_components_by_entry_name() {
        let config = config();

        assert!(build_position_sizer(&config, "atr").is_ok());
        assert!(build_position_sizer(&config, "fixed").is_ok());
        assert!(build_slippage(&config, "none").is_ok());
        assert!(build_risk_manager(&config, "permissive").is_ok());
        assert!(build_strategy(&config, "hold", EventQueue::new()).is_ok());
    }

    #[test]
    fn missing_entry_is_reported_with_its_section() {
        let config = config();

        let actual = build_position_sizer(&config, "nonexistent");

        assert!(matches!(
            actual,
            Err(ConfigError::MissingEntry {
                section: "position_sizer",
                ..
            })
        ));
    }

    #[test]
    fn unknown_implementation_tag_is_rejected() {
        let config = config();

        let actual = build_slippage(&config, "bad");

        assert!(matches!(
            actual,
            Err(ConfigError::UnknownComponent {
                section: "slippage",
                ..
            })
        ));
    }

    #[test]
    fn strategy_parameters_must_deserialize() {
        let contents = CONFIG.replace(
            "      atr_window: 14",
            "      atr_window: {nested: wrong}",
        );
        let config = RunConfig::from_str(&contents).unwrap();

        let actual = build_position_sizer(&config, "atr");

        assert!(matches!(actual, Err(ConfigError::InvalidParameters { .. })));
    }
}
