use crate::data::bar::Interval;
use crate::data::market::MarketEvent;
use crate::data::SharedHistory;
use crate::event::{Event, EventQueue};
use crate::execution::error::ExecutionError;
use crate::execution::fill::{CommissionModel, FillEvent};
use crate::execution::slippage::SlippageModel;
use crate::portfolio::order::{Direction, OrderEvent, OrderType};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::info;

/// Simulated broker: queues orders and fills them against subsequent market data. Market orders
/// fill at the next bar's open with slippage applied; market-on-close orders wait for the
/// end-of-day heartbeat and fill at that bar's close. Every fill is all-or-nothing.
pub struct SimulatedExecution {
    events: EventQueue,
    history: SharedHistory,
    base_interval: Interval,
    slippage: Arc<Mutex<dyn SlippageModel + Send>>,
    commission: Box<dyn CommissionModel + Send>,
    order_queue: VecDeque<OrderEvent>,
}

impl SimulatedExecution {
    /// Constructs a new [`SimulatedExecution`] component.
    pub fn new(
        events: EventQueue,
        history: SharedHistory,
        base_interval: Interval,
        slippage: Arc<Mutex<dyn SlippageModel + Send>>,
        commission: Box<dyn CommissionModel + Send>,
    ) -> Self {
        Self {
            events,
            history,
            base_interval,
            slippage,
            commission,
            order_queue: VecDeque::new(),
        }
    }

    /// Queues an [`OrderEvent`] for execution.
    pub fn on_order(&mut self, order: OrderEvent) {
        self.order_queue.push_back(order);
    }

    /// Number of orders waiting to be filled.
    pub fn pending_orders(&self) -> usize {
        self.order_queue.len()
    }

    /// Attempts to fill queued orders against the latest bars. Only the orders queued before this
    /// heartbeat are considered; anything pushed while filling waits for the next one.
    pub fn on_market(&mut self, _: &MarketEvent, mkt_close: bool) -> Result<(), ExecutionError> {
        let orders_to_check = self.order_queue.len();

        for _ in 0..orders_to_check {
            let Some(order) = self.order_queue.pop_front() else {
                break;
            };

            let key = (order.ticker.clone(), self.base_interval);
            let Some(bar) = self.history.latest(&key) else {
                let ticker = order.ticker.clone();
                self.order_queue.push_front(order);
                return Err(ExecutionError::MissingBar(ticker));
            };

            // Never fill on data from at or before the order's own timestamp
            if bar.timestamp <= order.timestamp {
                self.order_queue.push_front(order);
                return Ok(());
            }

            let (unit_cost, slippage) = match order.order_type {
                OrderType::MarketOnClose if mkt_close => (bar.close, 0.0),
                OrderType::Market => {
                    let slippage = self.slippage.lock().slippage(
                        &order.ticker,
                        order.timestamp,
                        order.quantity,
                        order.direction,
                    );
                    let unit_cost = match order.direction {
                        Direction::Buy => bar.open * (1.0 + slippage),
                        Direction::Sell => bar.open * (1.0 - slippage),
                    };
                    (unit_cost, slippage)
                }
                OrderType::MarketOnClose => {
                    // Not the closing heartbeat yet; requeue behind newer orders
                    self.order_queue.push_back(order);
                    continue;
                }
            };

            let fill_cost = order.quantity * unit_cost;
            let fill = FillEvent {
                timestamp: bar.timestamp,
                ticker: order.ticker.clone(),
                quantity: order.quantity,
                direction: order.direction,
                fill_cost,
                unit_cost,
                slippage,
                commission: self.commission.commission(order.quantity, fill_cost),
            };

            info!(
                ticker = %fill.ticker,
                direction = %fill.direction,
                quantity = fill.quantity,
                unit_cost = fill.unit_cost,
                slippage = fill.slippage,
                commission = fill.commission,
                "order filled"
            );
            self.events.push(Event::Fill(fill));
        }

        Ok(())
    }
}
