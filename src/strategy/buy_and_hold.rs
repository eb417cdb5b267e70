use crate::data::aggregator::OnInterval;
use crate::data::{BarKey, HistoryMap};
use crate::event::{Event, EventQueue};
use crate::strategy::signal::{SignalEvent, SignalKind};
use crate::strategy::Strategy;
use crate::Ticker;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

/// Configuration for constructing a [`BuyAndHold`] via the new() constructor method.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct Config {
    /// Interval notifications to wait through before buying.
    #[serde(default = "default_days_before_buying")]
    pub days_before_buying: u64,
}

fn default_days_before_buying() -> u64 {
    21
}

/// Buys each configured ticker once, after `days_before_buying` interval notifications, and holds
/// until the end of the run.
pub struct BuyAndHold {
    name: String,
    events: EventQueue,
    days_before_buying: u64,
    bought: HashMap<Ticker, bool>,
    counter: u64,
}

impl BuyAndHold {
    /// Constructs a new [`BuyAndHold`] strategy instance.
    pub fn new(name: String, config: Config, symbol_list: &[Ticker], events: EventQueue) -> Self {
        Self {
            name,
            events,
            days_before_buying: config.days_before_buying,
            bought: symbol_list.iter().map(|t| (t.clone(), false)).collect(),
            counter: 0,
        }
    }
}

impl Strategy for BuyAndHold {
    fn name(&self) -> &str {
        &self.name
    }
}

impl OnInterval for BuyAndHold {
    fn on_interval(&mut self, history: &HistoryMap, closed: &[BarKey]) {
        self.counter += 1;

        for key in closed {
            let Some(bar) = history.get(key).and_then(|bars| bars.last()) else {
                continue;
            };
            let ticker = &key.0;

            let bought = self.bought.entry(ticker.clone()).or_insert(false);
            if !*bought && self.counter >= self.days_before_buying {
                *bought = true;
                info!(strategy = %self.name, ticker = %ticker, "entering long position");
                self.events.push(Event::Signal(SignalEvent::new(
                    bar.timestamp,
                    ticker.clone(),
                    self.name.clone(),
                    SignalKind::Long,
                )));
            }
        }
    }
}
