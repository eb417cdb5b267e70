use crate::data::bar::Interval;
use crate::portfolio::holdings::{Holdings, TickerHolding};
use crate::Ticker;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::io;
use std::path::Path;
use tracing::info;

/// One resampled row of the equity curve.
#[derive(Clone, PartialEq, Debug)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub tickers: IndexMap<Ticker, TickerHolding>,
    pub margin: IndexMap<Ticker, f64>,
    pub cash: f64,
    pub total: f64,
    /// Non-zero commission amounts within the bucket, joined with " + ".
    pub commissions: String,
    /// Non-zero borrow costs within the bucket, joined with " + ".
    pub borrow_costs: String,
    pub order: String,
    pub slippage: String,
    /// Fractional change of `total` against the previous point (0 for the first).
    pub returns: f64,
    /// Cumulative product of `1 + returns`, starting at 1.
    pub equity_curve: f64,
}

/// Recorded holdings resampled onto the metrics interval, with per-point returns and the
/// compounded equity curve.
#[derive(Clone, PartialEq, Debug)]
pub struct EquityCurve {
    symbol_list: Vec<Ticker>,
    pub points: Vec<EquityPoint>,
}

impl EquityCurve {
    /// Buckets the holdings rows onto a regular `metrics_interval` grid (value-like fields keep
    /// the last row of each bucket, trace fields are joined) and derives returns & the
    /// compounded curve.
    pub fn assemble(rows: &[Holdings], symbol_list: &[Ticker], metrics_interval: Interval) -> Self {
        let secs = metrics_interval.secs();
        let mut buckets: IndexMap<i64, Vec<&Holdings>> = IndexMap::new();
        for row in rows {
            let bucket = row.timestamp.timestamp().div_euclid(secs);
            buckets.entry(bucket).or_default().push(row);
        }

        let mut points = Vec::with_capacity(buckets.len());
        let mut previous_total: Option<f64> = None;
        let mut equity = 1.0;

        for (_, bucket) in buckets {
            let last = *bucket.last().expect("bucket never empty");

            let join_amounts = |amount: fn(&Holdings) -> f64| {
                bucket
                    .iter()
                    .map(|row| amount(row))
                    .filter(|amount| *amount != 0.0)
                    .map(|amount| amount.to_string())
                    .collect::<Vec<_>>()
                    .join(" + ")
            };
            let join_traces = |trace: fn(&Holdings) -> &str| {
                bucket
                    .iter()
                    .map(|row| trace(row))
                    .filter(|trace| !trace.is_empty())
                    .collect::<Vec<_>>()
                    .join(" | ")
            };

            let returns = match previous_total {
                Some(previous) if previous != 0.0 => last.total / previous - 1.0,
                _ => 0.0,
            };
            previous_total = Some(last.total);
            equity *= 1.0 + returns;

            points.push(EquityPoint {
                timestamp: last.timestamp,
                tickers: last.tickers.clone(),
                margin: last.margin.clone(),
                cash: last.cash,
                total: last.total,
                commissions: join_amounts(|row| row.commissions),
                borrow_costs: join_amounts(|row| row.borrow_costs),
                order: join_traces(|row| row.order.as_str()),
                slippage: join_traces(|row| row.slippage.as_str()),
                returns,
                equity_curve: equity,
            });
        }

        Self {
            symbol_list: symbol_list.to_vec(),
            points,
        }
    }

    /// The final resampled point, if any.
    pub fn last(&self) -> Option<&EquityPoint> {
        self.points.last()
    }

    /// Serialises the curve as CSV: a timestamp index, one JSON snapshot column per ticker, the
    /// margin map, the value & trace columns, returns and the compounded curve.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_writer(writer);

        let mut header = vec!["timestamp".to_owned()];
        header.extend(self.symbol_list.iter().cloned());
        header.extend(
            [
                "margin",
                "cash",
                "total",
                "commissions",
                "borrow_costs",
                "order",
                "slippage",
                "returns",
                "equity_curve",
            ]
            .map(str::to_owned),
        );
        writer.write_record(&header)?;

        for point in &self.points {
            let mut record = vec![point.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()];
            for ticker in &self.symbol_list {
                let snapshot = point.tickers.get(ticker).copied().unwrap_or_default();
                record.push(serde_json::to_string(&snapshot).map_err(io::Error::other)?);
            }
            record.push(serde_json::to_string(&point.margin).map_err(io::Error::other)?);
            record.push(point.cash.to_string());
            record.push(point.total.to_string());
            record.push(point.commissions.clone());
            record.push(point.borrow_costs.clone());
            record.push(point.order.clone());
            record.push(point.slippage.clone());
            record.push(point.returns.to_string());
            record.push(point.equity_curve.to_string());
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Writes the curve to `path` as CSV.
    pub fn write_csv_path(&self, path: &Path) -> Result<(), csv::Error> {
        let file = std::fs::File::create(path)?;
        self.write_csv(file)?;
        info!(path = %path.display(), points = self.points.len(), "wrote equity curve");
        Ok(())
    }
}
