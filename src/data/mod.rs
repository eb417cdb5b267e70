use crate::Ticker;
use chrono::{DateTime, NaiveTime, Utc};
use indexmap::IndexMap;
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;

use self::bar::{Bar, Interval};

pub mod aggregator;
pub mod bar;
pub mod error;
pub mod handler;
pub mod market;

/// Identifies one bar series: a ticker at an interval.
pub type BarKey = (Ticker, Interval);

/// Per-(ticker, interval) ordered bar series, strictly monotonic by timestamp. Iteration order is
/// stable in registration order.
pub type HistoryMap = IndexMap<BarKey, Vec<Bar>>;

/// Shared-access bar history written by the data handler (base interval) and the
/// [`BarStore`](aggregator::BarStore) (aggregated intervals), read by every other component.
///
/// Clones share the underlying map.
#[derive(Clone, Debug, Default)]
pub struct SharedHistory {
    history: Arc<RwLock<HistoryMap>>,
}

impl SharedHistory {
    /// Constructs a new empty [`SharedHistory`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a [`Bar`] to the series identified by `key`, creating the series if absent.
    pub fn append(&self, key: BarKey, bar: Bar) {
        self.history.write().entry(key).or_default().push(bar);
    }

    /// Acquires shared read access to the full history map.
    pub fn read(&self) -> RwLockReadGuard<'_, HistoryMap> {
        self.history.read()
    }

    /// Returns a copy of the latest [`Bar`] for `key`, if any.
    pub fn latest(&self, key: &BarKey) -> Option<Bar> {
        self.history.read().get(key).and_then(|bars| bars.last().copied())
    }

    /// Number of bars recorded for `key`.
    pub fn len(&self, key: &BarKey) -> usize {
        self.history.read().get(key).map_or(0, Vec::len)
    }

    /// True if no series holds any bar.
    pub fn is_empty(&self) -> bool {
        self.history.read().values().all(Vec::is_empty)
    }
}

/// Exchange closing time in 24h "HH:MM" format.
pub fn parse_closing_time(input: &str) -> Result<NaiveTime, error::DataError> {
    NaiveTime::parse_from_str(input, "%H:%M")
        .map_err(|_| error::DataError::Timestamp(format!("exchange closing time: {input}")))
}

/// True if the bar starting at `timestamp` is the last of its trading day, ie/ the next bar would
/// start at or after the same day's exchange close.
pub fn is_end_of_day(timestamp: DateTime<Utc>, base_interval: Interval, close: NaiveTime) -> bool {
    let market_close = timestamp.date_naive().and_time(close).and_utc();
    timestamp + base_interval.duration() >= market_close
}
