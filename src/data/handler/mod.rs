use crate::data::bar::{Bar, Interval};
use crate::Ticker;
use chrono::{DateTime, Datelike, Utc, Weekday};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::error::DataError;

/// Historical replay handlers for backtesting.
pub mod batch;
pub mod csv;

/// Live data handler for dry-trading & paper-trading.
pub mod live;

/// Communicates if a data feed can continue producing heartbeats.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
pub enum Continuation {
    Continue,
    Stop,
}

/// Acts as the system heartbeat: appends the latest base-interval bars to the shared history and
/// pushes one Market event per tick onto the event queue.
pub trait DataHandler: Send {
    /// Advances the feed by one base interval.
    fn update_bars(&mut self) -> Result<(), DataError>;

    /// Returns a [`Continuation`] communicating if the feed has further data.
    fn can_continue(&self) -> Continuation;
}

/// Builds the regular base-interval calendar within `[start, end]`. Daily data follows the
/// business-day calendar (Monday to Friday); intraday data uses a fixed step.
pub fn regular_calendar(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Interval,
) -> Vec<DateTime<Utc>> {
    let mut calendar = Vec::new();
    let mut current = start;
    let business_daily = interval.secs() == 86_400;

    while current <= end {
        let weekend = matches!(current.weekday(), Weekday::Sat | Weekday::Sun);
        if !(business_daily && weekend) {
            calendar.push(current);
        }
        current += interval.duration();
    }

    calendar
}

/// Aligns per-ticker bar series onto a common calendar: exact timestamps pass through, gaps after
/// the first observation are filled with the previous bar's prices and zero volume, and leading
/// gaps stay empty.
pub fn align_frames(
    frames: IndexMap<Ticker, Vec<Bar>>,
    calendar: &[DateTime<Utc>],
) -> IndexMap<Ticker, Vec<Option<Bar>>> {
    frames
        .into_iter()
        .map(|(ticker, bars)| {
            let mut aligned = Vec::with_capacity(calendar.len());
            let mut cursor = 0;
            let mut previous: Option<Bar> = None;

            for timestamp in calendar {
                while cursor < bars.len() && bars[cursor].timestamp <= *timestamp {
                    previous = Some(bars[cursor]);
                    cursor += 1;
                }

                aligned.push(previous.map(|prev| {
                    if prev.timestamp == *timestamp {
                        prev
                    } else {
                        Bar {
                            timestamp: *timestamp,
                            volume: 0.0,
                            raw_volume: None,
                            ..prev
                        }
                    }
                }));
            }

            (ticker, aligned)
        })
        .collect()
}
