use thiserror::Error;

/// All errors generated in the tradeloop::data module.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Failed to build struct due to missing attribute: {0}")]
    BuilderIncomplete(&'static str),

    #[error("Provided builder attributes are invalid")]
    BuilderAttributesInvalid,

    #[error("Interval string is not supported: {0}")]
    IntervalUnsupported(String),

    #[error("Interval {interval} is not a positive multiple of the base interval {base}")]
    IntervalMismatch { interval: String, base: String },

    #[error("No data found for ticker {0} within the configured date range")]
    EmptySeries(String),

    #[error("Unrecognised CSV header: expected date|datetime, open, high, low, close, volume")]
    CsvHeader,

    #[error("Failed to parse timestamp: {0}")]
    Timestamp(String),

    #[error("Failed to parse numeric field: {0}")]
    Numeric(String),

    #[error("Csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("Io: {0}")]
    Io(#[from] std::io::Error),
}
