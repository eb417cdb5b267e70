use crate::data::bar::{Bar, Interval};
use crate::data::error::DataError;
use crate::data::handler::{align_frames, Continuation, DataHandler};
use crate::data::market::MarketEvent;
use crate::data::{is_end_of_day, SharedHistory};
use crate::event::{Event, EventQueue};
use crate::Ticker;
use chrono::{DateTime, NaiveTime, Utc};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use tracing::info;

/// Fetches per-ticker OHLCV frames at the base interval within `[start, end)`. Vendor transports
/// (HTTP download, database read) live behind this seam; the engine only consumes the produced
/// frames.
pub trait BatchFetcher {
    fn fetch(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
    ) -> Result<Vec<Bar>, DataError>;
}

/// [`DataHandler`] replaying pre-fetched per-ticker frames. All tickers are reindexed onto the
/// union of their timestamps with prices padded forward and missing volume zeroed, then drip-fed
/// as one Market heartbeat per tick.
pub struct BatchDataHandler {
    events: EventQueue,
    history: SharedHistory,
    base_interval: Interval,
    exchange_closing_time: NaiveTime,
    calendar: Vec<DateTime<Utc>>,
    frames: IndexMap<Ticker, Vec<Option<Bar>>>,
    cursor: usize,
    can_continue: Continuation,
}

impl DataHandler for BatchDataHandler {
    fn update_bars(&mut self) -> Result<(), DataError> {
        let Some(&timestamp) = self.calendar.get(self.cursor) else {
            self.can_continue = Continuation::Stop;
            return Ok(());
        };

        for (ticker, series) in &self.frames {
            if let Some(bar) = series[self.cursor] {
                self.history.append((ticker.clone(), self.base_interval), bar);
            }
        }

        let is_eod = is_end_of_day(timestamp, self.base_interval, self.exchange_closing_time);
        self.cursor += 1;
        self.events.push(Event::Market(MarketEvent::new(timestamp, is_eod)));

        Ok(())
    }

    fn can_continue(&self) -> Continuation {
        self.can_continue
    }
}

impl BatchDataHandler {
    /// Constructs a [`BatchDataHandler`] from already-fetched frames, reindexed onto the union of
    /// their timestamps.
    pub fn from_frames(
        frames: IndexMap<Ticker, Vec<Bar>>,
        base_interval: Interval,
        exchange_closing_time: NaiveTime,
        events: EventQueue,
        history: SharedHistory,
    ) -> Result<Self, DataError> {
        let union: BTreeSet<DateTime<Utc>> = frames
            .values()
            .flat_map(|bars| bars.iter().map(|bar| bar.timestamp))
            .collect();
        let calendar: Vec<DateTime<Utc>> = union.into_iter().collect();

        Self::with_calendar(frames, calendar, base_interval, exchange_closing_time, events, history)
    }

    /// Constructs a [`BatchDataHandler`] replaying frames on an explicit calendar, eg/ the regular
    /// calendar of a CSV backtest.
    pub fn with_calendar(
        frames: IndexMap<Ticker, Vec<Bar>>,
        calendar: Vec<DateTime<Utc>>,
        base_interval: Interval,
        exchange_closing_time: NaiveTime,
        events: EventQueue,
        history: SharedHistory,
    ) -> Result<Self, DataError> {
        for (ticker, bars) in &frames {
            if bars.is_empty() {
                return Err(DataError::EmptySeries(ticker.clone()));
            }
        }

        info!(
            tickers = frames.len(),
            ticks = calendar.len(),
            interval = %base_interval,
            "constructed batch data handler"
        );

        Ok(Self {
            events,
            history,
            base_interval,
            exchange_closing_time,
            frames: align_frames(frames, &calendar),
            calendar,
            cursor: 0,
            can_continue: Continuation::Continue,
        })
    }

    /// Fetches every ticker through the provided [`BatchFetcher`] and replays the union of the
    /// returned frames.
    pub fn fetch(
        fetcher: &dyn BatchFetcher,
        symbol_list: &[Ticker],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        base_interval: Interval,
        exchange_closing_time: NaiveTime,
        events: EventQueue,
        history: SharedHistory,
    ) -> Result<Self, DataError> {
        let mut frames = IndexMap::with_capacity(symbol_list.len());
        for ticker in symbol_list {
            let bars = fetcher.fetch(ticker, start, end, base_interval)?;
            frames.insert(ticker.clone(), bars);
        }

        Self::from_frames(frames, base_interval, exchange_closing_time, events, history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_closing_time;
    use chrono::TimeZone;

    fn day(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap()
    }

    fn bar_at(timestamp: DateTime<Utc>, close: f64) -> Bar {
        Bar::builder()
            .timestamp(timestamp)
            .open(close)
            .high(close)
            .low(close)
            .close(close)
            .volume(100.0)
            .build()
            .unwrap()
    }

    fn handler(frames: IndexMap<Ticker, Vec<Bar>>) -> (BatchDataHandler, EventQueue, SharedHistory) {
        let events = EventQueue::new();
        let history = SharedHistory::new();
        let handler = BatchDataHandler::from_frames(
            frames,
            "1d".parse().unwrap(),
            parse_closing_time("16:00").unwrap(),
            events.clone(),
            history.clone(),
        )
        .unwrap();
        (handler, events, history)
    }

    #[test]
    fn replays_the_union_of_ticker_timestamps() {
        let frames = IndexMap::from([
            ("AAPL".to_owned(), vec![bar_at(day(1), 10.0)]),
            ("MSFT".to_owned(), vec![bar_at(day(4), 20.0)]),
        ]);
        let (mut handler, events, history) = handler(frames);

        handler.update_bars().unwrap();
        handler.update_bars().unwrap();
        handler.update_bars().unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(handler.can_continue(), Continuation::Stop);
        // AAPL padded forward onto MSFT's timestamp with zero volume
        let aapl_key = ("AAPL".to_owned(), "1d".parse().unwrap());
        assert_eq!(history.len(&aapl_key), 2);
        let padded = history.latest(&aapl_key).unwrap();
        assert_eq!(padded.close, 10.0);
        assert_eq!(padded.volume, 0.0);
    }

    #[test]
    fn stops_without_emitting_once_the_calendar_is_exhausted() {
        let frames = IndexMap::from([("AAPL".to_owned(), vec![bar_at(day(1), 10.0)])]);
        let (mut handler, events, _) = handler(frames);

        handler.update_bars().unwrap();
        assert_eq!(handler.can_continue(), Continuation::Continue);

        handler.update_bars().unwrap();
        assert_eq!(handler.can_continue(), Continuation::Stop);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn rejects_a_ticker_with_no_data() {
        let frames = IndexMap::from([("AAPL".to_owned(), Vec::new())]);
        let events = EventQueue::new();
        let history = SharedHistory::new();

        let actual = BatchDataHandler::from_frames(
            frames,
            "1d".parse().unwrap(),
            parse_closing_time("16:00").unwrap(),
            events,
            history,
        );

        assert!(matches!(actual, Err(DataError::EmptySeries(_))));
    }
}
