use crate::data::aggregator::OnInterval;
use crate::data::{BarKey, HistoryMap};
use crate::event::{Event, EventQueue};
use crate::strategy::error::StrategyError;
use crate::strategy::signal::{SignalEvent, SignalKind};
use crate::strategy::Strategy;
use crate::Ticker;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

/// Configuration for constructing a [`MaCrossover`] via the new() constructor method.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_short_window")]
    pub short_window: usize,
    #[serde(default = "default_long_window")]
    pub long_window: usize,
}

fn default_short_window() -> usize {
    40
}

fn default_long_window() -> usize {
    100
}

/// Moving-average crossover strategy: goes long when the short SMA crosses above the long SMA and
/// short on the reverse cross, tracking its own per-ticker stance in {-1, 0, +1}. The most recent
/// bar is excluded from both averages to avoid trading on information from the bar being formed.
pub struct MaCrossover {
    name: String,
    events: EventQueue,
    short_window: usize,
    long_window: usize,
    current_positions: HashMap<Ticker, i8>,
}

impl MaCrossover {
    /// Constructs a new [`MaCrossover`] strategy instance.
    pub fn new(
        name: String,
        config: Config,
        symbol_list: &[Ticker],
        events: EventQueue,
    ) -> Result<Self, StrategyError> {
        if config.short_window == 0 || config.short_window >= config.long_window {
            return Err(StrategyError::InvalidWindows);
        }

        Ok(Self {
            name,
            events,
            short_window: config.short_window,
            long_window: config.long_window,
            current_positions: symbol_list.iter().map(|t| (t.clone(), 0)).collect(),
        })
    }
}

impl Strategy for MaCrossover {
    fn name(&self) -> &str {
        &self.name
    }
}

impl OnInterval for MaCrossover {
    fn on_interval(&mut self, history: &HistoryMap, closed: &[BarKey]) {
        for key in closed {
            let Some(bars) = history.get(key).filter(|bars| !bars.is_empty()) else {
                continue;
            };
            let ticker = &key.0;
            let timestamp = bars[bars.len() - 1].timestamp;

            if bars.len() < self.long_window + 1 {
                // Not enough data to compute both moving averages
                continue;
            }
            // Exclude the newest bar from the averages
            let window = &bars[bars.len() - 1 - self.long_window..bars.len() - 1];

            let mut short_avg = 0.0;
            let mut long_avg = 0.0;
            for (idx, bar) in window.iter().rev().enumerate() {
                if idx < self.short_window {
                    short_avg += bar.close;
                }
                long_avg += bar.close;
            }
            short_avg /= self.short_window as f64;
            long_avg /= self.long_window as f64;

            let stance = self.current_positions.entry(ticker.clone()).or_insert(0);
            if short_avg < long_avg && *stance >= 0 {
                info!(strategy = %self.name, ticker = %ticker, %short_avg, %long_avg, "crossover: going short");
                *stance = -1;
                self.events.push(Event::Signal(SignalEvent::new(
                    timestamp,
                    ticker.clone(),
                    self.name.clone(),
                    SignalKind::Short,
                )));
            } else if short_avg > long_avg && *stance <= 0 {
                info!(strategy = %self.name, ticker = %ticker, %short_avg, %long_avg, "crossover: going long");
                *stance = 1;
                self.events.push(Event::Signal(SignalEvent::new(
                    timestamp,
                    ticker.clone(),
                    self.name.clone(),
                    SignalKind::Long,
                )));
            }
        }
    }
}
