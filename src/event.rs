use crate::data::market::MarketEvent;
use crate::execution::fill::FillEvent;
use crate::portfolio::order::OrderEvent;
use crate::strategy::signal::SignalEvent;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Events that drive the trading event loop. [`MarketEvent`], [`SignalEvent`], [`OrderEvent`] and
/// [`FillEvent`] dictate the trading sequence: a data handler pushes Market heartbeats, the
/// strategy answers with Signals, the portfolio converts them into Orders, and the execution
/// handler reports Fills back to the portfolio.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum Event {
    Market(MarketEvent),
    Signal(SignalEvent),
    Order(OrderEvent),
    Fill(FillEvent),
}

/// FIFO channel shared by every component of a run. All pushes and pops go through one mutex so
/// a live data handler may push from its aggregator thread while the core loop drains.
///
/// Clones share the underlying queue.
#[derive(Clone, Debug, Default)]
pub struct EventQueue {
    events: Arc<Mutex<VecDeque<Event>>>,
}

impl EventQueue {
    /// Constructs a new empty [`EventQueue`].
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Appends an [`Event`] to the back of the queue.
    pub fn push(&self, event: Event) {
        self.events.lock().push_back(event);
    }

    /// Pops the oldest [`Event`], or `None` if the queue is drained.
    pub fn try_pop(&self) -> Option<Event> {
        self.events.lock().pop_front()
    }

    /// Returns true if no [`Event`] is waiting.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Number of queued [`Event`]s.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }
}
