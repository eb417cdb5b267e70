use thiserror::Error;

/// All errors generated in the tradeloop::portfolio module.
#[derive(Error, Debug)]
pub enum PortfolioError {
    #[error("Portfolio cash balance is negative: {cash:.2}")]
    NegativeCash { cash: f64 },

    #[error("Portfolio requires one rounding entry per symbol")]
    SymbolRoundingMismatch,

    #[error("Data: {0}")]
    Data(#[from] crate::data::error::DataError),
}
