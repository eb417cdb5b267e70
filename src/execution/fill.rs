use crate::portfolio::order::Direction;
use crate::Ticker;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fills are journals of work done by the execution handler, sent back to the portfolio so it can
/// apply position, cash and margin updates. All fills are all-or-nothing.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct FillEvent {
    pub timestamp: DateTime<Utc>,
    pub ticker: Ticker,
    pub quantity: f64,
    pub direction: Direction,
    /// Positive notional: quantity * unit_cost.
    pub fill_cost: f64,
    /// Price of a single unit after slippage.
    pub unit_cost: f64,
    /// Fractional slippage applied to the fill price.
    pub slippage: f64,
    pub commission: f64,
}

impl Default for FillEvent {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            ticker: String::from("ETH-USD"),
            quantity: 1.0,
            direction: Direction::default(),
            fill_cost: 100.0,
            unit_cost: 100.0,
            slippage: 0.0,
            commission: 0.0,
        }
    }
}

impl FillEvent {
    pub const EVENT_TYPE: &'static str = "Fill";
}

/// Commission charged on a fill, given its quantity and positive notional.
pub trait CommissionModel: Send {
    fn commission(&self, quantity: f64, fill_cost: f64) -> f64;
}

/// Interactive-Brokers-like commission schedule for US API directed orders:
/// `min(max(1.30, k * quantity), 0.5% * fill_cost)` with `k` stepping down above 500 units.
#[derive(Copy, Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct IbCommission;

impl CommissionModel for IbCommission {
    fn commission(&self, quantity: f64, fill_cost: f64) -> f64 {
        let per_share = if quantity <= 500.0 { 0.013 } else { 0.008 };
        let full_cost = 1.30f64.max(per_share * quantity);
        full_cost.min(0.005 * fill_cost)
    }
}

/// Commission-free model for frictionless simulations and tests.
#[derive(Copy, Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct NoCommission;

impl CommissionModel for NoCommission {
    fn commission(&self, _: f64, _: f64) -> f64 {
        0.0
    }
}
