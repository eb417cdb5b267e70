use crate::data::bar::{Bar, Interval};
use crate::data::error::DataError;
use crate::data::market::MarketEvent;
use crate::data::{BarKey, HistoryMap, SharedHistory};
use crate::Ticker;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Contract for components that consume completed aggregated bars: strategies, the portfolio,
/// position sizers and slippage models all subscribe to the [`BarStore`] through it.
///
/// `closed` holds the subscriber's own (ticker, interval) keys whose bars completed on this
/// heartbeat. Implementations must read bars through the provided `history` map rather than
/// re-locking the shared history, which is held for the duration of the dispatch.
pub trait OnInterval: Send {
    fn on_interval(&mut self, history: &HistoryMap, closed: &[BarKey]);
}

/// Shared handle to a subscriber owned by the engine.
pub type SubscriberHandle = Arc<Mutex<dyn OnInterval + Send>>;

/// Folds base-interval bars into one in-progress bar of a coarser interval.
#[derive(Clone, Debug)]
pub struct BarAggregator {
    base_interval: Interval,
    interval: Interval,
    interval_start: Option<DateTime<Utc>>,
    partial: Option<Bar>,
    last_consumed: Option<DateTime<Utc>>,
}

impl BarAggregator {
    pub fn new(base_interval: Interval, interval: Interval) -> Self {
        Self {
            base_interval,
            interval,
            interval_start: None,
            partial: None,
            last_consumed: None,
        }
    }

    /// Consumes the newest base bar (if any) and returns the completed aggregated [`Bar`] once
    /// the interval boundary is reached. A missing or already-consumed base bar skips the
    /// heartbeat entirely, leaving the aggregation window untouched.
    fn on_heartbeat(&mut self, event: &MarketEvent, latest_base: Option<&Bar>) -> Option<Bar> {
        let bar = latest_base?;
        if self.last_consumed.is_some_and(|seen| bar.timestamp <= seen) {
            return None;
        }
        self.last_consumed = Some(bar.timestamp);
        let interval_start = *self.interval_start.get_or_insert(event.timestamp);

        match self.partial.as_mut() {
            Some(partial) => {
                partial.high = partial.high.max(bar.high);
                partial.low = partial.low.min(bar.low);
                partial.close = bar.close;
                partial.volume += bar.volume;
            }
            // First base bar of the window fixes the open & index
            None => self.partial = Some(*bar),
        }

        let window_end = interval_start + self.interval.duration() - self.base_interval.duration();
        if event.timestamp >= window_end {
            self.interval_start = Some(interval_start + self.interval.duration());
            return self.partial.take();
        }

        None
    }
}

struct SubscriberEntry {
    handle: SubscriberHandle,
    keys: Vec<BarKey>,
}

/// Maintains the per-(ticker, interval) bar history, aggregates the base interval into every
/// subscribed coarser interval, and notifies subscribers when their bars close.
///
/// Base-interval series are appended by the data handler; subscriptions at the base interval are
/// a pass-through that fires whenever the handler delivered a new bar. Subscribers are notified
/// at most once per heartbeat, in subscribe order.
pub struct BarStore {
    base_interval: Interval,
    history: SharedHistory,
    aggregators: IndexMap<BarKey, BarAggregator>,
    base_cursors: IndexMap<BarKey, Option<DateTime<Utc>>>,
    subscribers: Vec<SubscriberEntry>,
}

impl BarStore {
    pub fn new(base_interval: Interval, history: SharedHistory) -> Self {
        Self {
            base_interval,
            history,
            aggregators: IndexMap::new(),
            base_cursors: IndexMap::new(),
            subscribers: Vec::new(),
        }
    }

    /// Registers `subscriber` for completed `(ticker, interval)` bars. The interval must be a
    /// positive multiple of the base interval.
    pub fn subscribe(
        &mut self,
        interval: Interval,
        ticker: Ticker,
        subscriber: SubscriberHandle,
    ) -> Result<(), DataError> {
        if !interval.is_multiple_of(self.base_interval) {
            return Err(DataError::IntervalMismatch {
                interval: interval.to_string(),
                base: self.base_interval.to_string(),
            });
        }

        let key: BarKey = (ticker, interval);
        if interval == self.base_interval {
            self.base_cursors.entry(key.clone()).or_insert(None);
        } else {
            self.aggregators
                .entry(key.clone())
                .or_insert_with(|| BarAggregator::new(self.base_interval, interval));
        }

        match self
            .subscribers
            .iter_mut()
            .find(|entry| Arc::ptr_eq(&entry.handle, &subscriber))
        {
            Some(entry) => {
                if !entry.keys.contains(&key) {
                    entry.keys.push(key);
                }
            }
            None => self.subscribers.push(SubscriberEntry {
                handle: subscriber,
                keys: vec![key],
            }),
        }

        Ok(())
    }

    /// Advances every registered aggregation window for this heartbeat, then delivers each
    /// subscriber with newly closed bars exactly once.
    pub fn on_heartbeat(&mut self, event: &MarketEvent) {
        let mut closed = Vec::new();

        for (key, aggregator) in self.aggregators.iter_mut() {
            let base_key = (key.0.clone(), self.base_interval);
            let latest_base = self.history.latest(&base_key);
            if let Some(bar) = aggregator.on_heartbeat(event, latest_base.as_ref()) {
                debug!(ticker = %key.0, interval = %key.1, timestamp = %bar.timestamp, "aggregated bar closed");
                self.history.append(key.clone(), bar);
                closed.push(key.clone());
            }
        }

        for (key, cursor) in self.base_cursors.iter_mut() {
            if let Some(bar) = self.history.latest(key) {
                if cursor.is_none_or(|seen| bar.timestamp > seen) {
                    *cursor = Some(bar.timestamp);
                    closed.push(key.clone());
                }
            }
        }

        if closed.is_empty() {
            return;
        }

        let history = self.history.read();
        for entry in &self.subscribers {
            let keys: Vec<BarKey> = entry
                .keys
                .iter()
                .filter(|key| closed.contains(key))
                .cloned()
                .collect();
            if !keys.is_empty() {
                entry.handle.lock().on_interval(&history, &keys);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Vec<BarKey>>,
    }

    impl OnInterval for Recorder {
        fn on_interval(&mut self, _: &HistoryMap, closed: &[BarKey]) {
            self.calls.push(closed.to_vec());
        }
    }

    fn minute_bar(minute: u32, close: f64, volume: f64) -> Bar {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 4, 10, minute, 0).unwrap();
        Bar::builder()
            .timestamp(timestamp)
            .open(close - 1.0)
            .high(close + 2.0)
            .low(close - 2.0)
            .close(close)
            .volume(volume)
            .build()
            .unwrap()
    }

    fn heartbeat(minute: u32) -> MarketEvent {
        MarketEvent::new(Utc.with_ymd_and_hms(2024, 3, 4, 10, minute, 0).unwrap(), false)
    }

    #[test]
    fn subscribe_rejects_interval_that_is_not_a_base_multiple() {
        let base: Interval = "2m".parse().unwrap();
        let mut store = BarStore::new(base, SharedHistory::new());
        let recorder: SubscriberHandle = Arc::new(Mutex::new(Recorder::default()));

        let actual = store.subscribe("3m".parse().unwrap(), "AAPL".to_owned(), recorder);

        assert!(matches!(actual, Err(DataError::IntervalMismatch { .. })));
    }

    #[test]
    fn aggregates_three_base_bars_into_one_coarser_bar() {
        let base: Interval = "1m".parse().unwrap();
        let history = SharedHistory::new();
        let mut store = BarStore::new(base, history.clone());

        let recorder = Arc::new(Mutex::new(Recorder::default()));
        let handle: SubscriberHandle = recorder.clone();
        store
            .subscribe("3m".parse().unwrap(), "AAPL".to_owned(), handle)
            .unwrap();

        let base_key: BarKey = ("AAPL".to_owned(), base);
        let agg_key: BarKey = ("AAPL".to_owned(), "3m".parse().unwrap());

        for (minute, close, volume) in [(0, 10.0, 100.0), (1, 12.0, 200.0), (2, 11.0, 300.0)] {
            history.append(base_key.clone(), minute_bar(minute, close, volume));
            store.on_heartbeat(&heartbeat(minute));
        }

        let aggregated = history.latest(&agg_key).expect("no aggregated bar");
        assert_eq!(aggregated.open, 9.0);
        assert_eq!(aggregated.high, 14.0);
        assert_eq!(aggregated.low, 8.0);
        assert_eq!(aggregated.close, 11.0);
        assert_eq!(aggregated.volume, 600.0);
        assert_eq!(aggregated.timestamp, minute_bar(0, 10.0, 100.0).timestamp);

        // Subscriber notified exactly once, when the 3m bar closed
        let recorder = recorder.lock();
        assert_eq!(recorder.calls.len(), 1);
        assert_eq!(recorder.calls[0], vec![agg_key]);
    }

    #[test]
    fn base_interval_subscription_fires_on_every_new_bar_without_duplicating_history() {
        let base: Interval = "1m".parse().unwrap();
        let history = SharedHistory::new();
        let mut store = BarStore::new(base, history.clone());

        let recorder = Arc::new(Mutex::new(Recorder::default()));
        store
            .subscribe(base, "AAPL".to_owned(), recorder.clone())
            .unwrap();

        let base_key: BarKey = ("AAPL".to_owned(), base);
        history.append(base_key.clone(), minute_bar(0, 10.0, 100.0));
        store.on_heartbeat(&heartbeat(0));
        history.append(base_key.clone(), minute_bar(1, 11.0, 100.0));
        store.on_heartbeat(&heartbeat(1));

        assert_eq!(history.len(&base_key), 2);
        assert_eq!(recorder.lock().calls.len(), 2);
    }

    #[test]
    fn skips_ticker_with_no_new_bar_this_heartbeat() {
        let base: Interval = "1m".parse().unwrap();
        let history = SharedHistory::new();
        let mut store = BarStore::new(base, history.clone());

        let recorder = Arc::new(Mutex::new(Recorder::default()));
        store
            .subscribe(base, "AAPL".to_owned(), recorder.clone())
            .unwrap();

        let base_key: BarKey = ("AAPL".to_owned(), base);
        history.append(base_key, minute_bar(0, 10.0, 100.0));
        store.on_heartbeat(&heartbeat(0));
        // No new bar appended before the second heartbeat
        store.on_heartbeat(&heartbeat(1));

        assert_eq!(recorder.lock().calls.len(), 1);
    }

    #[test]
    fn delivers_each_subscriber_once_with_all_of_its_closed_keys() {
        let base: Interval = "1m".parse().unwrap();
        let history = SharedHistory::new();
        let mut store = BarStore::new(base, history.clone());

        let recorder = Arc::new(Mutex::new(Recorder::default()));
        for ticker in ["AAPL", "MSFT"] {
            store
                .subscribe(base, ticker.to_owned(), recorder.clone())
                .unwrap();
        }

        for ticker in ["AAPL", "MSFT"] {
            history.append((ticker.to_owned(), base), minute_bar(0, 10.0, 100.0));
        }
        store.on_heartbeat(&heartbeat(0));

        let recorder = recorder.lock();
        assert_eq!(recorder.calls.len(), 1);
        assert_eq!(recorder.calls[0].len(), 2);
    }
}
