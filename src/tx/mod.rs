//! Transaction submission module with nonce management and gas optimization

mod gas;
mod nonce;
mod sender;

pub use gas::{wei_to_gwei, GasOptimizer};
pub use sender::{BuyOutcome, TransactionSender};
