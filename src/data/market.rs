use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Heartbeat produced by a data handler once per base interval, after the latest bars have been
/// appended to the shared history. `is_eod` flags the last heartbeat of the trading day, derived
/// from the configured exchange closing time.
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct MarketEvent {
    pub timestamp: DateTime<Utc>,
    pub is_eod: bool,
}

impl Default for MarketEvent {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            is_eod: false,
        }
    }
}

impl MarketEvent {
    pub const EVENT_TYPE: &'static str = "Market";

    /// Constructs a new [`MarketEvent`] heartbeat.
    pub fn new(timestamp: DateTime<Utc>, is_eod: bool) -> Self {
        Self { timestamp, is_eod }
    }
}
