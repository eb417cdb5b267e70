use crate::Ticker;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

/// Position & mark-to-market value held for one ticker. Polarity indicates a short (< 0) or
/// long (> 0) position.
#[derive(Copy, Clone, PartialEq, Debug, Default, Serialize)]
pub struct TickerHolding {
    pub position: f64,
    pub value: f64,
}

/// Snapshot of the portfolio at one time step: per-ticker positions & values, cash, held margin
/// and the per-interval trace fields accumulated between snapshots.
#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct Holdings {
    pub tickers: IndexMap<Ticker, TickerHolding>,
    /// Margin held against short positions. Non-zero only while the ticker's position is short.
    pub margin: IndexMap<Ticker, f64>,
    pub cash: f64,
    pub total: f64,
    pub commissions: f64,
    pub borrow_costs: f64,
    /// Human-readable trace of fills applied during the interval.
    pub order: String,
    /// Trace of the slippage fractions applied during the interval.
    pub slippage: String,
    pub timestamp: DateTime<Utc>,
}

impl Holdings {
    /// Constructs the opening [`Holdings`]: all cash, no positions, no margin.
    pub fn new(initial_capital: f64, symbol_list: &[Ticker], start: DateTime<Utc>) -> Self {
        Self {
            tickers: symbol_list
                .iter()
                .map(|ticker| (ticker.clone(), TickerHolding::default()))
                .collect(),
            margin: symbol_list.iter().map(|ticker| (ticker.clone(), 0.0)).collect(),
            cash: initial_capital,
            total: initial_capital,
            commissions: 0.0,
            borrow_costs: 0.0,
            order: String::new(),
            slippage: String::new(),
            timestamp: start,
        }
    }

    /// Resets the per-interval trace accumulators to neutral.
    pub fn reset_traces(&mut self) {
        self.commissions = 0.0;
        self.borrow_costs = 0.0;
        self.order.clear();
        self.slippage.clear();
    }

    /// Current signed position for `ticker` (0 if untracked).
    pub fn position(&self, ticker: &str) -> f64 {
        self.tickers.get(ticker).map_or(0.0, |holding| holding.position)
    }

    /// Current mark-to-market value for `ticker` (0 if untracked).
    pub fn value(&self, ticker: &str) -> f64 {
        self.tickers.get(ticker).map_or(0.0, |holding| holding.value)
    }

    /// Margin currently held against `ticker` (0 if none).
    pub fn margin_held(&self, ticker: &str) -> f64 {
        self.margin.get(ticker).copied().unwrap_or(0.0)
    }

    /// Sum of all held margin.
    pub fn total_margin(&self) -> f64 {
        self.margin.values().sum()
    }

    /// Residual between `total` and `cash + Σ value + Σ margin`. Zero (within float tolerance) at
    /// every quiescent point of a run.
    pub fn accounting_gap(&self) -> f64 {
        let values: f64 = self.tickers.values().map(|holding| holding.value).sum();
        self.total - (self.cash + values + self.total_margin())
    }
}
