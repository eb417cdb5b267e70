use thiserror::Error;

/// All errors generated in the tradeloop::execution module.
#[derive(Error, Clone, Debug)]
pub enum ExecutionError {
    /// Recoverable: the order stays queued and is retried on the next heartbeat.
    #[error("No market data available to fill an order for ticker {0}")]
    MissingBar(String),
}
