use crate::data::aggregator::BarStore;
use crate::data::handler::{Continuation, DataHandler};
use crate::event::{Event, EventQueue};
use crate::execution::handler::SimulatedExecution;
use crate::portfolio::portfolio::Portfolio;
use crate::statistic::equity::EquityCurve;
use crate::Ticker;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

pub mod error;
pub mod factory;

use error::EngineError;

/// Lego components for constructing an [`Engine`] via the new() constructor method.
pub struct EngineLego {
    pub events: EventQueue,
    pub data: Box<dyn DataHandler + Send>,
    pub bar_store: BarStore,
    pub portfolio: Arc<Mutex<Portfolio>>,
    pub execution: SimulatedExecution,
    /// Signals on this ticker are ingested for comparison only and never traded.
    pub benchmark: Option<Ticker>,
    /// Absorb recoverable failures (negative cash, missing fill data) with a warning instead of
    /// aborting the run.
    pub continue_on_error: bool,
    /// Close all positions at the latest close once the data source is exhausted.
    pub liquidate_at_end: bool,
}

/// The driver loop: pulls bars from the data source, drains the event channel through the
/// components, invokes the end-of-day hook, and assembles the equity curve once the source is
/// exhausted.
pub struct Engine {
    events: EventQueue,
    data: Box<dyn DataHandler + Send>,
    bar_store: BarStore,
    portfolio: Arc<Mutex<Portfolio>>,
    execution: SimulatedExecution,
    benchmark: Option<Ticker>,
    continue_on_error: bool,
    liquidate_at_end: bool,
}

impl Engine {
    /// Constructs a new [`Engine`] instance using the provided [`EngineLego`].
    pub fn new(lego: EngineLego) -> Self {
        Self {
            events: lego.events,
            data: lego.data,
            bar_store: lego.bar_store,
            portfolio: lego.portfolio,
            execution: lego.execution,
            benchmark: lego.benchmark,
            continue_on_error: lego.continue_on_error,
            liquidate_at_end: lego.liquidate_at_end,
        }
    }

    /// Shared handle to the portfolio, for post-run inspection.
    pub fn portfolio(&self) -> Arc<Mutex<Portfolio>> {
        Arc::clone(&self.portfolio)
    }

    /// Runs the event loop until the data source reports no more data and the event queue
    /// drains, then returns the resampled equity curve.
    pub fn run(&mut self) -> Result<EquityCurve, EngineError> {
        info!("starting trading event loop");
        let mut mkt_close = false;

        while self.data.can_continue() == Continuation::Continue || !self.events.is_empty() {
            self.data.update_bars()?;

            while let Some(event) = self.events.try_pop() {
                match event {
                    Event::Market(market) => {
                        // Fan out closed aggregated bars to every subscriber
                        self.bar_store.on_heartbeat(&market);

                        if let Err(error) = self.portfolio.lock().check_solvency() {
                            if !self.continue_on_error {
                                return Err(error.into());
                            }
                            warn!(%error, "continuing run after portfolio failure");
                        }

                        if let Err(error) = self.execution.on_market(&market, market.is_eod) {
                            if !self.continue_on_error {
                                return Err(error.into());
                            }
                            warn!(%error, "continuing run after execution failure");
                        }

                        mkt_close = market.is_eod;
                    }
                    Event::Signal(signal) => {
                        if self.benchmark.as_ref() != Some(&signal.ticker) {
                            self.portfolio.lock().on_signal(&signal);
                        }
                    }
                    Event::Order(order) => self.execution.on_order(order),
                    Event::Fill(fill) => self.portfolio.lock().on_fill(&fill),
                }
            }

            if mkt_close {
                self.portfolio.lock().end_of_day();
                mkt_close = false;
            }
        }

        if self.liquidate_at_end {
            self.portfolio.lock().liquidate();
        }

        let curve = self.portfolio.lock().create_equity_curve();
        info!(points = curve.points.len(), "trading event loop finished");
        Ok(curve)
    }
}
