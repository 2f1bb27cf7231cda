//! Operator notifications
//!
//! The bot talks to a `Notifier`; delivery failures are logged by the caller
//! and never interrupt a purchase.

pub mod messages;
pub mod telegram;

pub use messages::BotEvent;
pub use telegram::TelegramNotifier;

use crate::error::BotResult;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

/// Sink for rendered operator messages
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one HTML message
    async fn send(&self, message: &str) -> BotResult<()>;
}
