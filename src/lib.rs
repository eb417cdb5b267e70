//! # Tradeloop
//! Tradeloop is an event-driven **backtesting & paper-trading engine** for equity and crypto
//! strategies. Historical or live OHLCV bars are replayed through a strategy, the resulting
//! signals are sized and risk-checked into orders, orders are filled by a simulated broker with
//! slippage and commission, and a portfolio tracks cash, margin, borrow costs and mark-to-market
//! valuation, finally emitting an equity curve for offline analysis.
//!
//! ## Overview
//! The engine is a single-threaded cooperative event loop fed by a FIFO event channel. Several
//! de-coupled components interact via a set of traits:
//!
//! * **Data**: DataHandler implementations act as the system heartbeat, appending base-interval
//!   bars to the shared history and pushing a MarketEvent per tick. A CsvDataHandler replays
//!   per-ticker CSV files, a BatchDataHandler replays pre-fetched vendor frames, and a
//!   LiveDataHandler aggregates a live tick feed on background threads.
//! * **Bar Store**: The BarStore aggregates base-interval bars into any subscribed coarser
//!   interval and notifies OnInterval subscribers once per heartbeat when their bars close.
//! * **Strategy**: Strategy implementations consume closed bars and may push advisory
//!   SignalEvents for the Portfolio to interpret.
//! * **Portfolio**: Consumes Market, Signal & Fill events; converts signals into orders with the
//!   help of a PositionSizer and a RiskManager; owns cash, positions, margin and borrow accrual.
//! * **Execution**: The SimulatedExecution handler queues orders and fills them against the next
//!   market data, applying a pluggable SlippageModel and a CommissionModel.
//! * **Statistic**: Assembles the recorded holdings into a resampled equity curve.
//! * **Engine**: Drives the loop, draining the event channel until the data handler is exhausted.

#![warn(missing_copy_implementations)]

/// Defines the Bar & Interval primitives, the MarketEvent heartbeat, the shared bar history, the
/// multi-interval BarStore aggregator, and the DataHandler implementations that feed the engine.
pub mod data;

/// Defines a SignalEvent and the Strategy trait for generating them. Contains the reference
/// BuyAndHold and MaCrossover strategies.
pub mod strategy;

/// Defines the OrderEvent and Holdings ledger. The Portfolio consumes Market, Signal & Fill
/// events, generates orders via a PositionSizer and RiskManager, and tracks cash, margin and
/// borrow costs.
pub mod portfolio;

/// Defines a FillEvent and the SimulatedExecution handler that generates them from queued orders,
/// together with the pluggable SlippageModel and CommissionModel calculators.
pub mod execution;

/// Defines the Event enum that drives the trading event loop, and the FIFO EventQueue channel all
/// components communicate through.
pub mod event;

/// Post-run analysis: assembles recorded holdings into a time-indexed equity curve resampled to
/// the metrics interval.
pub mod statistic;

/// The Engine driver loop that owns every component and replays the data source to completion,
/// plus the factory resolving configuration tags into components.
pub mod engine;

/// Structured YAML run-configuration and its validation.
pub mod config;

/// Tracing subscriber initialisation.
pub mod logging;

/// Communicates a String is a unique identifier for a ticker symbol (eg/ "AAPL", "BTC-USD").
pub type Ticker = String;

/// Communicates a String is a unique identifier for the strategy that produced a signal or order.
pub type StrategyId = String;
