use thiserror::Error;

/// All errors generated in the tradeloop::strategy module.
#[derive(Error, Copy, Clone, Debug)]
pub enum StrategyError {
    #[error("Strategy requires symbol_list and rounding_list of equal length")]
    SymbolRoundingMismatch,

    #[error("Moving average windows must satisfy 0 < short < long")]
    InvalidWindows,
}
