use crate::{StrategyId, Ticker};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Advisory signal produced by a strategy for the portfolio to interpret.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SignalEvent {
    pub timestamp: DateTime<Utc>,
    pub ticker: Ticker,
    pub strategy: StrategyId,
    pub kind: SignalKind,
    /// Adjustment factor "suggestion" used to scale the sized quantity.
    pub strength: f64,
}

impl Default for SignalEvent {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            ticker: String::from("ETH-USD"),
            strategy: String::from("example"),
            kind: SignalKind::default(),
            strength: 1.0,
        }
    }
}

impl SignalEvent {
    pub const EVENT_TYPE: &'static str = "Signal";

    /// Constructs a new [`SignalEvent`] with the default strength of 1.0.
    pub fn new(
        timestamp: DateTime<Utc>,
        ticker: Ticker,
        strategy: StrategyId,
        kind: SignalKind,
    ) -> Self {
        Self {
            timestamp,
            ticker,
            strategy,
            kind,
            strength: 1.0,
        }
    }
}

/// Describes the type of advisory signal the strategy is endorsing.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum SignalKind {
    #[default]
    Long,
    Short,
    Exit,
    Hold,
}
