use crate::data::aggregator::OnInterval;
use crate::data::bar::Bar;
use crate::data::{BarKey, HistoryMap};
use crate::Ticker;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// Computes a target order quantity for a signal from the portfolio's risk budget. Sizers also
/// subscribe to the strategy interval via [`OnInterval`] to maintain whatever state their sizing
/// rule needs.
pub trait PositionSizer: OnInterval {
    /// Returns the target quantity, or `None` when the sizer has insufficient state and the
    /// portfolio should fall back to its last used size.
    fn position_size(
        &self,
        risk_per_trade: f64,
        total_equity: f64,
        rounding: u32,
        ticker: &str,
    ) -> Option<f64>;
}

/// Truncates `quantity` to `rounding` decimal places (0 floors to a whole quantity). Rounding is
/// truncating, never banker's.
fn truncate_quantity(quantity: f64, rounding: u32) -> f64 {
    if rounding == 0 {
        return quantity.floor();
    }
    let shift = 10f64.powi(rounding as i32);
    (quantity * shift).trunc() / shift
}

/// Configuration for constructing an [`AtrSizer`] via the new() constructor method.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct Config {
    pub atr_window: usize,
    pub atr_multiplier: f64,
}

/// Volatility-adjusted sizer: quantity = risk budget / (ATR * multiplier), with the ATR smoothed
/// per Wilder. The first ATR is seeded from the arithmetic mean of the True Range over
/// `atr_window` bars; each subsequent bar applies
/// `atr = tr / n + (1 - 1/n) * atr_prev`.
pub struct AtrSizer {
    atr_window: usize,
    atr_multiplier: f64,
    historical_atr: HashMap<Ticker, Vec<f64>>,
}

impl AtrSizer {
    /// Constructs a new [`AtrSizer`] component.
    pub fn new(config: Config) -> Self {
        Self {
            atr_window: config.atr_window,
            atr_multiplier: config.atr_multiplier,
            historical_atr: HashMap::new(),
        }
    }

    /// Latest smoothed ATR for `ticker`, if seeded.
    pub fn latest_atr(&self, ticker: &str) -> Option<f64> {
        self.historical_atr
            .get(ticker)
            .and_then(|atrs| atrs.last().copied())
    }

    fn true_range(current: &Bar, previous: &Bar) -> f64 {
        let high_minus_low = current.high - current.low;
        let high_minus_prev = (current.high - previous.close).abs();
        let low_minus_prev = (current.low - previous.close).abs();
        high_minus_low.max(high_minus_prev).max(low_minus_prev)
    }

    fn next_atr(&self, ticker: &str, bars: &[Bar]) -> Option<f64> {
        let seeded = self
            .historical_atr
            .get(ticker)
            .is_some_and(|atrs| !atrs.is_empty());

        if !seeded {
            // Seed from the arithmetic mean of the True Range over the window
            if bars.len() < self.atr_window + 1 {
                return None;
            }
            let window = &bars[bars.len() - self.atr_window - 1..];
            let tr_sum: f64 = window
                .windows(2)
                .map(|pair| Self::true_range(&pair[1], &pair[0]))
                .sum();
            return Some(tr_sum / self.atr_window as f64);
        }

        if bars.len() < 2 {
            return None;
        }
        let current = &bars[bars.len() - 1];
        let previous = &bars[bars.len() - 2];
        let tr = Self::true_range(current, previous);
        let prev_atr = self.latest_atr(ticker)?;
        let n = self.atr_window as f64;
        Some(tr / n + (1.0 - 1.0 / n) * prev_atr)
    }
}

impl PositionSizer for AtrSizer {
    fn position_size(
        &self,
        risk_per_trade: f64,
        total_equity: f64,
        rounding: u32,
        ticker: &str,
    ) -> Option<f64> {
        let atr = self.latest_atr(ticker)?;
        if atr == 0.0 {
            return None;
        }

        let capital_to_risk = risk_per_trade * total_equity;
        let quantity = capital_to_risk / (atr * self.atr_multiplier);
        debug!(%ticker, atr, capital_to_risk, quantity, "sized position from ATR");

        Some(truncate_quantity(quantity, rounding))
    }
}

impl OnInterval for AtrSizer {
    fn on_interval(&mut self, history: &HistoryMap, closed: &[BarKey]) {
        for key in closed {
            let Some(bars) = history.get(key) else {
                continue;
            };
            if let Some(atr) = self.next_atr(&key.0, bars) {
                self.historical_atr.entry(key.0.clone()).or_default().push(atr);
            }
        }
    }
}

/// Sizer returning a configured constant quantity, used as a deliberate fallback and in tests.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct ConstantSizer {
    pub position_size: f64,
}

impl PositionSizer for ConstantSizer {
    fn position_size(&self, _: f64, _: f64, rounding: u32, _: &str) -> Option<f64> {
        Some(truncate_quantity(self.position_size, rounding))
    }
}

impl OnInterval for ConstantSizer {
    fn on_interval(&mut self, _: &HistoryMap, _: &[BarKey]) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use indexmap::IndexMap;

    fn bar(idx: i64, high: f64, low: f64, close: f64) -> Bar {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Bar {
            timestamp: start + Duration::days(idx),
            open: close,
            high,
            low,
            close,
            volume: 1_000.0,
            raw_volume: None,
        }
    }

    fn key() -> BarKey {
        ("AAPL".to_owned(), "1d".parse().unwrap())
    }

    fn notify(sizer: &mut AtrSizer, bars: Vec<Bar>) {
        let history: HistoryMap = IndexMap::from([(key(), bars)]);
        sizer.on_interval(&history, &[key()]);
    }

    #[test]
    fn seeds_atr_from_the_mean_true_range() {
        let mut sizer = AtrSizer::new(Config {
            atr_window: 2,
            atr_multiplier: 1.0,
        });

        // TRs of the last two bars: max(5,4,1)=5 and max(3,2,1)=3 -> seed (5+3)/2
        let bars = vec![
            bar(0, 12.0, 8.0, 10.0),
            bar(1, 14.0, 9.0, 11.0),
            bar(2, 13.0, 10.0, 12.0),
        ];
        notify(&mut sizer, bars);

        assert_eq!(sizer.latest_atr("AAPL"), Some(4.0));
    }

    #[test]
    fn applies_wilders_smoothing_after_seeding() {
        let mut sizer = AtrSizer::new(Config {
            atr_window: 2,
            atr_multiplier: 1.0,
        });
        sizer.historical_atr.insert("AAPL".to_owned(), vec![2.0]);

        // TR = max(16-12, |16-12|, |12-12|) = 4.0
        let bars = vec![bar(0, 13.0, 11.0, 12.0), bar(1, 16.0, 12.0, 15.0)];
        notify(&mut sizer, bars);

        // atr = 4/2 + (1 - 1/2) * 2 = 3.0
        assert_eq!(sizer.latest_atr("AAPL"), Some(3.0));
    }

    #[test]
    fn returns_none_without_enough_bars_to_seed() {
        let mut sizer = AtrSizer::new(Config {
            atr_window: 14,
            atr_multiplier: 2.0,
        });

        notify(&mut sizer, vec![bar(0, 12.0, 8.0, 10.0)]);

        assert_eq!(sizer.latest_atr("AAPL"), None);
        assert_eq!(sizer.position_size(0.01, 100_000.0, 0, "AAPL"), None);
    }

    #[test]
    fn zero_atr_returns_none() {
        let mut sizer = AtrSizer::new(Config {
            atr_window: 2,
            atr_multiplier: 2.0,
        });
        sizer.historical_atr.insert("AAPL".to_owned(), vec![0.0]);

        let actual = sizer.position_size(0.01, 100_000.0, 0, "AAPL");

        assert_eq!(actual, None);
    }

    #[test]
    fn sizes_the_risk_budget_against_the_atr() {
        let mut sizer = AtrSizer::new(Config {
            atr_window: 2,
            atr_multiplier: 2.0,
        });
        sizer.historical_atr.insert("AAPL".to_owned(), vec![5.0]);

        // 0.01 * 100_000 / (5 * 2) = 100
        let actual = sizer.position_size(0.01, 100_000.0, 0, "AAPL");

        assert_eq!(actual, Some(100.0));
    }

    #[test]
    fn rounding_truncates_rather_than_rounds() {
        assert_eq!(truncate_quantity(123.987, 0), 123.0);
        assert_eq!(truncate_quantity(123.987, 1), 123.9);
        assert_eq!(truncate_quantity(0.123456789, 8), 0.12345678);
    }

    #[test]
    fn constant_sizer_always_returns_its_configured_size() {
        let sizer = ConstantSizer { position_size: 42.5 };

        assert_eq!(sizer.position_size(0.01, 1.0, 0, "AAPL"), Some(42.0));
        assert_eq!(sizer.position_size(0.5, 9.9, 1, "MSFT"), Some(42.5));
    }
}
