use crate::data::bar::Bar;
use crate::portfolio::holdings::Holdings;
use crate::portfolio::order::OrderEvent;
use crate::{StrategyId, Ticker};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use tracing::warn;

/// Pre-trade validation of an [`OrderEvent`]. Pure aside from rate-limit bookkeeping: an order
/// is either allowed through unchanged or vetoed.
pub trait RiskManager: Send {
    fn is_allowed(
        &mut self,
        order: &OrderEvent,
        daily_open_value: &HashMap<StrategyId, f64>,
        history: &[Bar],
        symbol_list: &[Ticker],
        holdings: &Holdings,
    ) -> bool;
}

/// Limits for the [`SimpleRiskManager`]. Any limit set to a negative value disables its check.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct Limits {
    pub max_order_quantity: f64,
    pub max_notional_value: f64,
    /// Fractional daily loss, eg/ 0.05 for 5%.
    pub max_daily_loss: f64,
    pub max_gross_exposure: f64,
    pub max_net_exposure: f64,
    pub participation_window: usize,
    pub participation_limit: f64,
    /// Maximum accepted orders per second of simulated time.
    pub rate_limit: f64,
}

const RATE_INTERVAL_SECS: i64 = 1;

/// numpy-style sign: 0.0 for 0, so a flat position never counts as risk-increasing.
fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Reference [`RiskManager`] applying quantity, notional, daily-loss, exposure, participation and
/// rate-limit checks in order. The first failed check vetoes the order.
pub struct SimpleRiskManager {
    limits: Limits,
    /// Monotonic timestamps of recently accepted orders, on the simulated clock.
    order_timestamps: VecDeque<DateTime<Utc>>,
}

impl SimpleRiskManager {
    /// Constructs a new [`SimpleRiskManager`] component.
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            order_timestamps: VecDeque::new(),
        }
    }

    fn max_order_quantity_check(&self, order: &OrderEvent) -> bool {
        if self.limits.max_order_quantity >= 0.0 && order.quantity > self.limits.max_order_quantity
        {
            warn!(
                quantity = order.quantity,
                limit = self.limits.max_order_quantity,
                "risk veto: max order quantity"
            );
            return false;
        }
        true
    }

    fn max_notional_value_check(&self, order: &OrderEvent, est_price: f64) -> bool {
        let notional = order.quantity * est_price;
        if self.limits.max_notional_value >= 0.0 && notional > self.limits.max_notional_value {
            warn!(
                notional,
                limit = self.limits.max_notional_value,
                "risk veto: max notional value"
            );
            return false;
        }
        true
    }

    fn daily_loss_limit_check(
        &self,
        order: &OrderEvent,
        holdings: &Holdings,
        open_value: f64,
    ) -> bool {
        if self.limits.max_daily_loss < 0.0 || open_value == 0.0 {
            return true;
        }
        let pnl = (holdings.total - open_value) / open_value;
        // The order only adds risk when it extends the existing position's direction; a flat
        // position passes vacuously
        let net_direction = sign(order.signed_quantity()) * sign(holdings.position(&order.ticker));
        if pnl < -self.limits.max_daily_loss && net_direction > 0.0 {
            warn!(pnl, limit = self.limits.max_daily_loss, "risk veto: daily loss limit");
            return false;
        }
        true
    }

    fn gross_exposure_check(
        &self,
        order: &OrderEvent,
        symbol_list: &[Ticker],
        holdings: &Holdings,
        est_price: f64,
    ) -> bool {
        if self.limits.max_gross_exposure < 0.0 {
            return true;
        }
        let gross_exposure: f64 = symbol_list
            .iter()
            .map(|ticker| {
                if *ticker == order.ticker {
                    (holdings.value(ticker) + order.signed_quantity() * est_price).abs()
                } else {
                    holdings.value(ticker).abs()
                }
            })
            .sum();
        if gross_exposure > self.limits.max_gross_exposure {
            warn!(
                gross_exposure,
                limit = self.limits.max_gross_exposure,
                "risk veto: gross exposure"
            );
            return false;
        }
        true
    }

    fn net_exposure_check(
        &self,
        order: &OrderEvent,
        symbol_list: &[Ticker],
        holdings: &Holdings,
        est_price: f64,
    ) -> bool {
        if self.limits.max_net_exposure < 0.0 {
            return true;
        }
        let net_exposure: f64 = symbol_list.iter().map(|ticker| holdings.value(ticker)).sum();
        let projected = net_exposure + order.signed_quantity() * est_price;
        if projected.abs() > self.limits.max_net_exposure {
            warn!(
                net_exposure = projected,
                limit = self.limits.max_net_exposure,
                "risk veto: net exposure"
            );
            return false;
        }
        true
    }

    fn participation_check(&self, order: &OrderEvent, history: &[Bar]) -> bool {
        if self.limits.participation_limit < 0.0
            || history.len() < self.limits.participation_window
        {
            return true;
        }
        let window = &history[history.len() - self.limits.participation_window..];
        let avg_volume: f64 =
            window.iter().map(|bar| bar.volume).sum::<f64>() / window.len() as f64;
        if avg_volume == 0.0 {
            warn!(
                window = self.limits.participation_window,
                "risk veto: zero average volume over participation window"
            );
            return false;
        }
        let participation_rate = order.quantity / avg_volume;
        if participation_rate > self.limits.participation_limit {
            warn!(
                participation_rate,
                limit = self.limits.participation_limit,
                "risk veto: participation rate"
            );
            return false;
        }
        true
    }

    fn rate_limit_check(&mut self, order: &OrderEvent) -> bool {
        if self.limits.rate_limit < 0.0 {
            return true;
        }
        let cutoff = order.timestamp - Duration::seconds(RATE_INTERVAL_SECS);
        while self
            .order_timestamps
            .front()
            .is_some_and(|stamp| *stamp < cutoff)
        {
            self.order_timestamps.pop_front();
        }
        if self.order_timestamps.len() as f64 > self.limits.rate_limit {
            warn!(
                accepted = self.order_timestamps.len(),
                limit = self.limits.rate_limit,
                "risk veto: order rate limit"
            );
            return false;
        }
        true
    }
}

impl RiskManager for SimpleRiskManager {
    fn is_allowed(
        &mut self,
        order: &OrderEvent,
        daily_open_value: &HashMap<StrategyId, f64>,
        history: &[Bar],
        symbol_list: &[Ticker],
        holdings: &Holdings,
    ) -> bool {
        let Some(est_price) = history.last().map(|bar| bar.close) else {
            return false;
        };
        let open_value = daily_open_value.get(&order.strategy).copied().unwrap_or(0.0);

        let allowed = self.max_order_quantity_check(order)
            && self.max_notional_value_check(order, est_price)
            && self.daily_loss_limit_check(order, holdings, open_value)
            && self.gross_exposure_check(order, symbol_list, holdings, est_price)
            && self.net_exposure_check(order, symbol_list, holdings, est_price)
            && self.participation_check(order, history)
            && self.rate_limit_check(order);

        if allowed {
            self.order_timestamps.push_back(order.timestamp);
        }
        allowed
    }
}

/// Risk manager that unconditionally permits every order.
#[derive(Copy, Clone, Debug, Default, Deserialize)]
pub struct NoRiskManager;

impl RiskManager for NoRiskManager {
    fn is_allowed(
        &mut self,
        _: &OrderEvent,
        _: &HashMap<StrategyId, f64>,
        _: &[Bar],
        _: &[Ticker],
        _: &Holdings,
    ) -> bool {
        true
    }
}
