use crate::data::bar::{Bar, Interval};
use crate::data::error::DataError;
use crate::data::handler::{Continuation, DataHandler};
use crate::data::market::MarketEvent;
use crate::data::{is_end_of_day, SharedHistory};
use crate::event::{Event, EventQueue};
use crate::Ticker;
use chrono::{DateTime, NaiveTime, Utc};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One raw message from a live price feed.
#[derive(Clone, Debug, PartialEq)]
pub struct TickMessage {
    pub ticker: Ticker,
    pub price: f64,
    /// Milliseconds since the Unix epoch.
    pub time_ms: i64,
    /// Cumulative volume traded so far today. Feeds may omit it.
    pub day_volume: Option<f64>,
}

/// Blocking producer of [`TickMessage`]s. Websocket transports live behind this seam; the
/// listener must return once the receiving side hangs up.
pub trait TickSource: Send + 'static {
    fn listen(self: Box<Self>, tx: mpsc::Sender<TickMessage>);
}

/// Configuration for constructing a [`LiveDataHandler`] via the new() constructor method.
#[derive(Clone, Debug)]
pub struct Config {
    pub symbol_list: Vec<Ticker>,
    pub base_interval: Interval,
    /// How long the live session should run before stopping cleanly.
    pub period: Interval,
    pub exchange_closing_time: NaiveTime,
}

/// [`DataHandler`] for live paper-trading. A listener thread feeds raw ticks into a channel; an
/// aggregator thread wakes on monotonic interval deadlines, folds the ticks into one OHLCV bar
/// per ticker, appends them to the shared history and pushes exactly one Market event per
/// boundary. After the configured period elapses the in-progress interval is finalised and
/// `continue_backtest` clears.
pub struct LiveDataHandler {
    continue_backtest: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
    aggregator: Option<JoinHandle<()>>,
}

impl DataHandler for LiveDataHandler {
    fn update_bars(&mut self) -> Result<(), DataError> {
        // Bars are produced by the aggregator thread; yield instead of spinning on the queue.
        thread::sleep(Duration::from_millis(10));
        Ok(())
    }

    fn can_continue(&self) -> Continuation {
        if self.continue_backtest.load(Ordering::Acquire) {
            Continuation::Continue
        } else {
            Continuation::Stop
        }
    }
}

impl LiveDataHandler {
    /// Constructs a new [`LiveDataHandler`] and starts its background threads.
    pub fn new(
        config: Config,
        source: Box<dyn TickSource>,
        events: EventQueue,
        history: SharedHistory,
    ) -> Self {
        let continue_backtest = Arc::new(AtomicBool::new(true));
        let (tick_tx, tick_rx) = mpsc::channel();

        let listener = thread::spawn(move || source.listen(tick_tx));

        let aggregator = LiveAggregator::new(
            config.symbol_list.clone(),
            config.base_interval,
            config.exchange_closing_time,
            events,
            history,
        );
        let period = Duration::from_secs(config.period.secs() as u64);
        let flag = Arc::clone(&continue_backtest);
        let base = Duration::from_secs(config.base_interval.secs() as u64);
        let aggregator = thread::spawn(move || {
            run_aggregator(aggregator, tick_rx, base, period);
            flag.store(false, Ordering::Release);
        });

        info!(interval = %config.base_interval, period = %config.period, "started live data handler");

        Self {
            continue_backtest,
            listener: Some(listener),
            aggregator: Some(aggregator),
        }
    }

    /// Waits for the background threads to finish. Called by the engine on shutdown.
    pub fn join(&mut self) {
        if let Some(handle) = self.aggregator.take() {
            if handle.join().is_err() {
                warn!("live aggregator thread panicked");
            }
        }
        if let Some(handle) = self.listener.take() {
            if handle.join().is_err() {
                warn!("live tick listener thread panicked");
            }
        }
    }
}

/// Pure per-interval tick folding, kept free of threads and clocks so it can be exercised
/// directly.
struct LiveAggregator {
    symbol_list: Vec<Ticker>,
    base_interval: Interval,
    exchange_closing_time: NaiveTime,
    events: EventQueue,
    history: SharedHistory,
    partial: IndexMap<Ticker, Option<Bar>>,
    day_volume: IndexMap<Ticker, f64>,
    interval_volume: IndexMap<Ticker, f64>,
}

impl LiveAggregator {
    fn new(
        symbol_list: Vec<Ticker>,
        base_interval: Interval,
        exchange_closing_time: NaiveTime,
        events: EventQueue,
        history: SharedHistory,
    ) -> Self {
        let partial = symbol_list.iter().map(|t| (t.clone(), None)).collect();
        let day_volume = symbol_list.iter().map(|t| (t.clone(), 0.0)).collect();
        let interval_volume = symbol_list.iter().map(|t| (t.clone(), 0.0)).collect();
        Self {
            symbol_list,
            base_interval,
            exchange_closing_time,
            events,
            history,
            partial,
            day_volume,
            interval_volume,
        }
    }

    /// Folds one tick into the current interval's partial bar for its ticker.
    fn fold(&mut self, message: &TickMessage, interval_start: DateTime<Utc>) {
        let Some(day_volume) = self.day_volume.get_mut(&message.ticker) else {
            debug!(ticker = %message.ticker, "tick for unsubscribed ticker dropped");
            return;
        };
        let interval_volume = &mut self.interval_volume[&message.ticker];

        // Feeds may omit day_volume; treat as no new volume information
        let reported = message.day_volume.unwrap_or(*day_volume);
        if reported >= *day_volume {
            if *day_volume == 0.0 {
                // Engine started mid-day; initialise the day baseline
                *day_volume = reported;
            }
            *interval_volume = interval_volume.max(reported - *day_volume);
        } else {
            // Cumulative volume fell below the baseline: a new trading day started
            *day_volume = reported;
            *interval_volume = 0.0;
        }

        let partial = &mut self.partial[&message.ticker];
        match partial {
            Some(bar) => {
                bar.high = bar.high.max(message.price);
                bar.low = bar.low.min(message.price);
                bar.close = message.price;
                bar.volume = *interval_volume;
                bar.raw_volume = Some(reported);
            }
            None => {
                *partial = Some(Bar {
                    timestamp: interval_start,
                    open: message.price,
                    high: message.price,
                    low: message.price,
                    close: message.price,
                    volume: *interval_volume,
                    raw_volume: Some(reported),
                });
            }
        }
    }

    /// Closes the interval that started at `interval_start`: appends one bar per ticker (quiet
    /// tickers repeat their previous bar), rolls the day-volume baselines and pushes exactly one
    /// Market event.
    fn finalize_interval(&mut self, interval_start: DateTime<Utc>) {
        let mut mkt_close = false;

        for ticker in self.symbol_list.clone() {
            let key = (ticker.clone(), self.base_interval);
            let final_bar = match self.partial[&ticker].take() {
                Some(bar) => Some(bar),
                None => self.history.latest(&key).map(|prev| Bar {
                    timestamp: interval_start,
                    ..prev
                }),
            };

            if let Some(bar) = final_bar {
                mkt_close =
                    is_end_of_day(bar.timestamp, self.base_interval, self.exchange_closing_time);
                self.history.append(key, bar);
            }

            let interval_volume = self.interval_volume[&ticker];
            let day_volume = &mut self.day_volume[&ticker];
            if mkt_close {
                *day_volume = 0.0;
            } else {
                *day_volume += interval_volume;
            }
            self.interval_volume[&ticker] = 0.0;
        }

        self.events
            .push(Event::Market(MarketEvent::new(interval_start, mkt_close)));
    }
}

/// Drives a [`LiveAggregator`] on monotonic interval deadlines until `period` elapses. Ticks
/// stamped past the current boundary are carried into the next interval.
fn run_aggregator(
    mut aggregator: LiveAggregator,
    ticks: mpsc::Receiver<TickMessage>,
    base_interval: Duration,
    period: Duration,
) {
    let started = Instant::now();
    let wall_start = Utc::now();
    let mut carry: Vec<TickMessage> = Vec::new();
    let mut boundary: u32 = 1;

    loop {
        let deadline = started + base_interval * boundary;
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }

        let interval_start = wall_start
            + chrono::Duration::from_std(base_interval * (boundary - 1))
                .unwrap_or_else(|_| chrono::Duration::zero());
        let interval_end = wall_start
            + chrono::Duration::from_std(base_interval * boundary)
                .unwrap_or_else(|_| chrono::Duration::zero());

        let mut next_carry = Vec::new();
        for message in carry.drain(..).chain(ticks.try_iter()) {
            let stamp = DateTime::from_timestamp_millis(message.time_ms).unwrap_or(interval_start);
            if stamp >= interval_end {
                next_carry.push(message);
            } else {
                aggregator.fold(&message, interval_start);
            }
        }
        carry = next_carry;

        aggregator.finalize_interval(interval_start);

        if base_interval * (boundary + 1) > period {
            break;
        }
        boundary += 1;
    }

    info!("live session period elapsed, stopping feed");
}
