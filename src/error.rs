//! Error types for the presale sniper

use thiserror::Error;

/// Main error type for the bot
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chain connection error: {0}")]
    ChainConnection(String),

    #[error("Wrong network: expected chain {expected}, got {actual}")]
    WrongNetwork { expected: u64, actual: u64 },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Nonce error: {0}")]
    Nonce(String),

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    /// The node already holds this exact transaction
    #[error("Transaction already known")]
    AlreadyKnown,

    #[error("Replacement transaction underpriced")]
    Underpriced,

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Transaction {tx_hash} reverted in block {block_number}")]
    Reverted { tx_hash: String, block_number: u64 },

    #[error("Transaction {tx_hash} dropped after inclusion in block {block_number}")]
    ReorgDetected { tx_hash: String, block_number: u64 },

    #[error("Insufficient balance: have {have} ETH, need {need} ETH")]
    InsufficientBalance { have: String, need: String },

    #[error("Rate limited by RPC endpoint")]
    RateLimited,

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BotError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BotError::ChainConnection(_)
                | BotError::Timeout { .. }
                | BotError::RateLimited
                | BotError::Underpriced
                | BotError::GasEstimation(_)
                | BotError::Nonce(_)
                | BotError::Reverted { .. }
                | BotError::ReorgDetected { .. }
                | BotError::Transaction(_)
        )
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            BotError::InsufficientBalance { .. }
                | BotError::ReorgDetected { .. }
                | BotError::WrongNetwork { .. }
                | BotError::Wallet(_)
        )
    }

    /// Map a node error message onto the matching variant.
    ///
    /// Nodes only report submission failures as strings, so the known
    /// fragments are matched case-insensitively.
    pub fn from_rpc_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("already known") || lower.contains("known transaction") {
            BotError::AlreadyKnown
        } else if lower.contains("nonce too low") {
            BotError::Nonce(message)
        } else if lower.contains("replacement transaction underpriced")
            || lower.contains("underpriced")
        {
            BotError::Underpriced
        } else if lower.contains("insufficient funds") {
            BotError::InsufficientBalance {
                have: "unknown".to_string(),
                need: "unknown".to_string(),
            }
        } else if lower.contains("429") || lower.contains("rate limit") {
            BotError::RateLimited
        } else {
            BotError::Transaction(message)
        }
    }
}

/// Result type for bot operations
pub type BotResult<T> = Result<T, BotError>;
