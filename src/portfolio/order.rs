use crate::{StrategyId, Ticker};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order generated by the portfolio in response to an advisory signal, after sizing, the
/// affordability clamp and risk evaluation. Quantity is always non-negative; the direction
/// carries the sign.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct OrderEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub ticker: Ticker,
    pub strategy: StrategyId,
    pub direction: Direction,
    pub order_type: OrderType,
    pub quantity: f64,
}

impl Default for OrderEvent {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            ticker: String::from("ETH-USD"),
            strategy: String::from("example"),
            direction: Direction::default(),
            order_type: OrderType::default(),
            quantity: 1.0,
        }
    }
}

impl OrderEvent {
    pub const EVENT_TYPE: &'static str = "Order";

    /// Constructs a new [`OrderEvent`] with a fresh id.
    pub fn new(
        timestamp: DateTime<Utc>,
        ticker: Ticker,
        strategy: StrategyId,
        direction: Direction,
        order_type: OrderType,
        quantity: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            ticker,
            strategy,
            direction,
            order_type,
            quantity,
        }
    }

    /// Order quantity signed by its [`Direction`].
    pub fn signed_quantity(&self) -> f64 {
        self.direction.signum() * self.quantity
    }
}

/// Side of an order or fill.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Buy,
    Sell,
}

impl Direction {
    /// +1.0 for Buy, -1.0 for Sell.
    pub fn signum(&self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

/// Supported simulated order types: market-on-next-open and market-on-close.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum OrderType {
    #[default]
    Market,
    MarketOnClose,
}
