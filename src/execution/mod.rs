pub mod error;
pub mod fill;
pub mod handler;
pub mod slippage;

pub use fill::{CommissionModel, FillEvent, IbCommission, NoCommission};
pub use handler::SimulatedExecution;
pub use slippage::{MultiFactorSlippage, NoSlippage, SlippageModel};
