use crate::data::aggregator::OnInterval;

pub mod buy_and_hold;
pub mod error;
pub mod ma_crossover;
pub mod signal;

/// Generates advisory [`signal::SignalEvent`]s from completed bars of its subscribed interval.
/// The engine only constrains this surface: a strategy is any [`OnInterval`] subscriber that
/// pushes zero or more signals onto the event queue per notification.
pub trait Strategy: OnInterval {
    /// Name identifying this strategy on the signals & orders it produces.
    fn name(&self) -> &str;
}
