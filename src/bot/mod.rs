//! Presale bot - watches the presale and buys once it opens
//!
//! - `state`: phases, presale assessment, purchase records
//! - `engine`: the monitoring loop and buy execution

pub mod engine;
pub mod state;

pub use engine::{BotParams, PresaleBot};
pub use state::BotStatus;
