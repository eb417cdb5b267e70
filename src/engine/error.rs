use thiserror::Error;

/// All errors that unwind to the engine driver loop.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Config: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Data: {0}")]
    Data(#[from] crate::data::error::DataError),

    #[error("Portfolio: {0}")]
    Portfolio(#[from] crate::portfolio::error::PortfolioError),

    #[error("Execution: {0}")]
    Execution(#[from] crate::execution::error::ExecutionError),

    #[error("Strategy: {0}")]
    Strategy(#[from] crate::strategy::error::StrategyError),

    #[error("Failed to write equity curve: {0}")]
    Output(#[from] csv::Error),
}
