use crate::data::error::DataError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_HOUR: i64 = 3_600;
const SECS_PER_DAY: i64 = 86_400;
const SECS_PER_WEEK: i64 = 604_800;

const TRD_HOURS_IN_DAY: f64 = 6.5;
const TRD_DAYS_IN_YEAR: f64 = 252.0;
const WEEKS_IN_YEAR: f64 = 52.0;

/// OHLCV market data record for one interval of one ticker.
///
/// `raw_volume` carries the cumulative day volume reported by live feeds and is absent for
/// historical data.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub raw_volume: Option<f64>,
}

impl Default for Bar {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            open: 1000.0,
            high: 1100.0,
            low: 900.0,
            close: 1050.0,
            volume: 1_000_000.0,
            raw_volume: None,
        }
    }
}

impl Bar {
    /// Returns a [`BarBuilder`] instance.
    pub fn builder() -> BarBuilder {
        BarBuilder::new()
    }
}

/// Builder to construct validated [`Bar`] instances.
#[derive(Debug, Default)]
pub struct BarBuilder {
    pub timestamp: Option<DateTime<Utc>>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub raw_volume: Option<f64>,
}

impl BarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timestamp(self, value: DateTime<Utc>) -> Self {
        Self {
            timestamp: Some(value),
            ..self
        }
    }

    pub fn open(self, value: f64) -> Self {
        Self {
            open: Some(value),
            ..self
        }
    }

    pub fn high(self, value: f64) -> Self {
        Self {
            high: Some(value),
            ..self
        }
    }

    pub fn low(self, value: f64) -> Self {
        Self {
            low: Some(value),
            ..self
        }
    }

    pub fn close(self, value: f64) -> Self {
        Self {
            close: Some(value),
            ..self
        }
    }

    pub fn volume(self, value: f64) -> Self {
        Self {
            volume: Some(value),
            ..self
        }
    }

    pub fn raw_volume(self, value: f64) -> Self {
        Self {
            raw_volume: Some(value),
            ..self
        }
    }

    pub fn build(self) -> Result<Bar, DataError> {
        let timestamp = self.timestamp.ok_or(DataError::BuilderIncomplete("timestamp"))?;
        let open = self.open.ok_or(DataError::BuilderIncomplete("open"))?;
        let high = self.high.ok_or(DataError::BuilderIncomplete("high"))?;
        let low = self.low.ok_or(DataError::BuilderIncomplete("low"))?;
        let close = self.close.ok_or(DataError::BuilderIncomplete("close"))?;
        let volume = self.volume.ok_or(DataError::BuilderIncomplete("volume"))?;

        let prices_non_negative = open >= 0.0 && high >= 0.0 && low >= 0.0 && close >= 0.0;
        let prices_within_range =
            low <= high && (low..=high).contains(&open) && (low..=high).contains(&close);

        if !prices_non_negative || !prices_within_range || volume < 0.0 {
            return Err(DataError::BuilderAttributesInvalid);
        }

        Ok(Bar {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            raw_volume: self.raw_volume,
        })
    }
}

/// A bar length, parsed from vendor-style interval strings (eg/ "1m", "5m", "1h", "1d", "1wk").
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval {
    secs: i64,
}

impl Interval {
    /// Constructs an [`Interval`] of `secs` seconds. Must be positive.
    pub fn from_secs(secs: i64) -> Result<Self, DataError> {
        if secs <= 0 {
            return Err(DataError::IntervalUnsupported(format!("{secs}s")));
        }
        Ok(Self { secs })
    }

    /// Interval length in whole seconds.
    pub fn secs(&self) -> i64 {
        self.secs
    }

    /// Interval length as a chrono [`Duration`].
    pub fn duration(&self) -> Duration {
        Duration::seconds(self.secs)
    }

    /// True if this interval is a whole positive multiple of `base`.
    pub fn is_multiple_of(&self, base: Interval) -> bool {
        self.secs >= base.secs && self.secs % base.secs == 0
    }

    /// Number of intervals in one trading year, assuming 6.5 trading hours per day and 252
    /// trading days per year for intraday/daily data.
    pub fn annualization_factor(&self) -> f64 {
        if self.secs % SECS_PER_WEEK == 0 {
            WEEKS_IN_YEAR / (self.secs / SECS_PER_WEEK) as f64
        } else if self.secs % SECS_PER_DAY == 0 {
            TRD_DAYS_IN_YEAR / (self.secs / SECS_PER_DAY) as f64
        } else if self.secs % SECS_PER_HOUR == 0 {
            (TRD_HOURS_IN_DAY * TRD_DAYS_IN_YEAR) / (self.secs / SECS_PER_HOUR) as f64
        } else {
            (TRD_HOURS_IN_DAY * 60.0 * TRD_DAYS_IN_YEAR) / (self.secs as f64 / SECS_PER_MINUTE as f64)
        }
    }
}

impl FromStr for Interval {
    type Err = DataError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let split = input.find(|c: char| !c.is_ascii_digit());
        let (value, unit) = match split {
            Some(at) if at > 0 => input.split_at(at),
            _ => return Err(DataError::IntervalUnsupported(input.to_owned())),
        };
        let value: i64 = value
            .parse()
            .map_err(|_| DataError::IntervalUnsupported(input.to_owned()))?;

        let unit_secs = match unit.to_ascii_lowercase().as_str() {
            "m" | "min" => SECS_PER_MINUTE,
            "h" => SECS_PER_HOUR,
            "d" => SECS_PER_DAY,
            "w" | "wk" => SECS_PER_WEEK,
            _ => return Err(DataError::IntervalUnsupported(input.to_owned())),
        };

        Interval::from_secs(value * unit_secs)
    }
}

impl TryFrom<String> for Interval {
    type Error = DataError;

    fn try_from(input: String) -> Result<Self, Self::Error> {
        input.parse()
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.to_string()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secs % SECS_PER_WEEK == 0 {
            write!(f, "{}wk", self.secs / SECS_PER_WEEK)
        } else if self.secs % SECS_PER_DAY == 0 {
            write!(f, "{}d", self.secs / SECS_PER_DAY)
        } else if self.secs % SECS_PER_HOUR == 0 {
            write!(f, "{}h", self.secs / SECS_PER_HOUR)
        } else if self.secs % SECS_PER_MINUTE == 0 {
            write!(f, "{}m", self.secs / SECS_PER_MINUTE)
        } else {
            write!(f, "{}s", self.secs)
        }
    }
}
