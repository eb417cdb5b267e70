pub mod equity;

pub use equity::{EquityCurve, EquityPoint};
