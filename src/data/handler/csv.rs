use crate::data::bar::{Bar, Interval};
use crate::data::error::DataError;
use crate::data::handler::batch::BatchDataHandler;
use crate::data::handler::{regular_calendar, Continuation, DataHandler};
use crate::data::SharedHistory;
use crate::event::EventQueue;
use crate::Ticker;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Configuration for constructing a [`CsvDataHandler`] via the new() constructor method.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory containing one `{TICKER}_{interval}.csv` file per ticker.
    pub data_dir: PathBuf,
    pub symbol_list: Vec<Ticker>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub base_interval: Interval,
    pub exchange_closing_time: NaiveTime,
}

/// [`DataHandler`] that **simulates** a live market feed by drip feeding per-ticker CSV files as
/// a series of Market heartbeats. Rows are sorted ascending, clipped to the configured date
/// range, and reindexed onto the regular base-interval calendar with prices padded forward and
/// missing volume zeroed.
pub struct CsvDataHandler {
    replay: BatchDataHandler,
}

impl DataHandler for CsvDataHandler {
    fn update_bars(&mut self) -> Result<(), DataError> {
        self.replay.update_bars()
    }

    fn can_continue(&self) -> Continuation {
        self.replay.can_continue()
    }
}

impl CsvDataHandler {
    /// Constructs a new [`CsvDataHandler`], loading every configured ticker's file eagerly.
    pub fn new(
        config: Config,
        events: EventQueue,
        history: SharedHistory,
    ) -> Result<Self, DataError> {
        let mut frames = IndexMap::with_capacity(config.symbol_list.len());
        for ticker in &config.symbol_list {
            let path = config
                .data_dir
                .join(format!("{}_{}.csv", ticker, config.base_interval));
            let mut bars = load_bars(&path)?;
            bars.sort_by_key(|bar| bar.timestamp);
            bars.retain(|bar| {
                bar.timestamp >= config.start_date && bar.timestamp <= config.end_date
            });
            if bars.is_empty() {
                return Err(DataError::EmptySeries(ticker.clone()));
            }
            info!(ticker = %ticker, rows = bars.len(), path = %path.display(), "loaded csv bars");
            frames.insert(ticker.clone(), bars);
        }

        let calendar = regular_calendar(config.start_date, config.end_date, config.base_interval);
        let replay = BatchDataHandler::with_calendar(
            frames,
            calendar,
            config.base_interval,
            config.exchange_closing_time,
            events,
            history,
        )?;

        Ok(Self { replay })
    }
}

/// Reads one CSV file of `date|datetime, open, high, low, close, volume` rows, with
/// case-insensitive headers in any column order.
fn load_bars(path: &Path) -> Result<Vec<Bar>, DataError> {
    let mut reader = csv::Reader::from_path(path)?;

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|header| header.trim().to_lowercase())
        .collect();
    let column = |name: &str| headers.iter().position(|header| header == name);

    let timestamp_col = column("date")
        .or_else(|| column("datetime"))
        .ok_or(DataError::CsvHeader)?;
    let open_col = column("open").ok_or(DataError::CsvHeader)?;
    let high_col = column("high").ok_or(DataError::CsvHeader)?;
    let low_col = column("low").ok_or(DataError::CsvHeader)?;
    let close_col = column("close").ok_or(DataError::CsvHeader)?;
    let volume_col = column("volume").ok_or(DataError::CsvHeader)?;

    let mut bars = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |index: usize| record.get(index).unwrap_or_default().trim();
        let price = |index: usize| {
            field(index)
                .parse::<f64>()
                .map_err(|_| DataError::Numeric(field(index).to_owned()))
        };

        bars.push(
            Bar::builder()
                .timestamp(parse_timestamp(field(timestamp_col))?)
                .open(price(open_col)?)
                .high(price(high_col)?)
                .low(price(low_col)?)
                .close(price(close_col)?)
                .volume(price(volume_col)?)
                .build()?,
        );
    }

    Ok(bars)
}

/// Parses supported timestamp strings to a UTC timestamp, stripping any source timezone.
fn parse_timestamp(input: &str) -> Result<DateTime<Utc>, DataError> {
    if let Ok(datetime_fixed) = DateTime::parse_from_rfc3339(input) {
        return Ok(datetime_fixed.with_timezone(&Utc));
    }

    if let Ok(naive_datetime) = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive_datetime.and_utc());
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        let midnight = naive_date.and_hms_opt(0, 0, 0).expect("midnight is always valid");
        return Ok(midnight.and_utc());
    }

    Err(DataError::Timestamp(input.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_closing_time;
    use crate::event::Event;
    use chrono::TimeZone;
    use std::io::Write;

    fn write_csv(dir: &Path, name: &str, contents: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tradeloop-csv-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn parses_supported_timestamp_formats() {
        let cases = vec![
            "2024-03-04T00:00:00+00:00",
            "2024-03-04 00:00:00",
            "2024-03-04",
        ];
        let expected = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();

        for input in cases {
            assert_eq!(parse_timestamp(input).unwrap(), expected, "{input}");
        }

        assert!(parse_timestamp("04/03/2024 bananas").is_err());
    }

    #[test]
    fn loads_case_insensitive_headers_in_any_order() {
        let dir = scratch_dir("headers");
        write_csv(
            &dir,
            "AAPL_1d.csv",
            "Volume,Close,DATE,Open,High,Low\n\
             1000,11.0,2024-03-04,10.0,12.0,9.0\n\
             2000,12.0,2024-03-05,11.0,13.0,10.0\n",
        );

        let bars = load_bars(&dir.join("AAPL_1d.csv")).unwrap();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 11.0);
        assert_eq!(bars[0].volume, 1000.0);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn replays_files_clipped_to_the_date_range() {
        let dir = scratch_dir("replay");
        write_csv(
            &dir,
            "AAPL_1d.csv",
            "date,open,high,low,close,volume\n\
             2024-02-28,9.0,10.0,8.0,9.5,500\n\
             2024-03-04,10.0,12.0,9.0,11.0,1000\n\
             2024-03-05,11.0,13.0,10.0,12.0,2000\n",
        );

        let events = EventQueue::new();
        let history = SharedHistory::new();
        let mut handler = CsvDataHandler::new(
            Config {
                data_dir: dir.clone(),
                symbol_list: vec!["AAPL".to_owned()],
                start_date: Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap(),
                end_date: Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap(),
                base_interval: "1d".parse().unwrap(),
                exchange_closing_time: parse_closing_time("16:00").unwrap(),
            },
            events.clone(),
            history.clone(),
        )
        .unwrap();

        handler.update_bars().unwrap();
        handler.update_bars().unwrap();
        handler.update_bars().unwrap();

        assert_eq!(handler.can_continue(), Continuation::Stop);
        let key = ("AAPL".to_owned(), "1d".parse().unwrap());
        assert_eq!(history.len(&key), 2);
        // Clipped: the February row never entered the history
        let first = history.read().get(&key).unwrap()[0];
        assert_eq!(first.close, 11.0);

        // Daily bars flag end-of-day on every heartbeat
        match events.try_pop() {
            Some(Event::Market(market)) => assert!(market.is_eod),
            other => panic!("expected market event, got {other:?}"),
        }
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_file_is_an_error() {
        let events = EventQueue::new();
        let history = SharedHistory::new();
        let actual = CsvDataHandler::new(
            Config {
                data_dir: PathBuf::from("/nonexistent"),
                symbol_list: vec!["AAPL".to_owned()],
                start_date: Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap(),
                end_date: Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap(),
                base_interval: "1d".parse().unwrap(),
                exchange_closing_time: parse_closing_time("16:00").unwrap(),
            },
            events,
            history,
        );

        assert!(actual.is_err());
    }
}
