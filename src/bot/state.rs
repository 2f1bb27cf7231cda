//! Bot phases, presale assessment and purchase records

use crate::chain::PresaleInfo;

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Longest pause between failed buy attempts
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Where the bot is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BotPhase {
    Idle,
    Starting,
    WaitingForStart,
    Monitoring,
    Buying,
    Completed,
    Ended,
    Failed,
    Stopped,
}

impl BotPhase {
    /// Numeric code exported as a gauge
    pub fn code(&self) -> u8 {
        match self {
            BotPhase::Idle => 0,
            BotPhase::Starting => 1,
            BotPhase::WaitingForStart => 2,
            BotPhase::Monitoring => 3,
            BotPhase::Buying => 4,
            BotPhase::Completed => 5,
            BotPhase::Ended => 6,
            BotPhase::Failed => 7,
            BotPhase::Stopped => 8,
        }
    }

    /// Phases the bot never leaves on its own
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            BotPhase::Completed | BotPhase::Ended | BotPhase::Failed | BotPhase::Stopped
        )
    }
}

/// What the presale state means for the bot right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresaleAssessment {
    Upcoming { starts_in: u64 },
    Inactive,
    Active { remaining: U256 },
    Ended,
    HardCapReached,
}

/// Classify the presale at unix time `now`.
///
/// Terminal states win over the contract's own `isPresaleActive` flag.
pub fn assess(info: &PresaleInfo, now: u64) -> PresaleAssessment {
    if now > info.end_time {
        PresaleAssessment::Ended
    } else if info.total_raised >= info.hard_cap {
        PresaleAssessment::HardCapReached
    } else if now < info.start_time {
        PresaleAssessment::Upcoming {
            starts_in: info.start_time - now,
        }
    } else if !info.is_active {
        PresaleAssessment::Inactive
    } else {
        PresaleAssessment::Active {
            remaining: info.remaining(),
        }
    }
}

/// Wei to commit: the configured amount, capped by the remaining allocation
pub fn buy_amount(configured: U256, remaining: U256) -> U256 {
    configured.min(remaining)
}

/// `retry_delay * 2^(attempt - 1)`, capped at `MAX_BACKOFF`
pub fn backoff(retry_delay: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    retry_delay.saturating_mul(factor).min(MAX_BACKOFF)
}

/// A confirmed purchase
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
    pub tx_hash: H256,
    pub block_number: u64,
    pub gas_used: U256,
    pub amount_wei: U256,
    pub tokens_received: U256,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time view of the bot
#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    pub session_id: Uuid,
    pub is_running: bool,
    pub phase: BotPhase,
    pub wallet_address: Address,
    pub presale_address: Address,
    pub last_transaction: Option<TransactionRecord>,
    pub transaction_count: usize,
    /// Failed buy attempts so far
    pub buy_attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(start: u64, end: u64, raised: u64, cap: u64, active: bool) -> PresaleInfo {
        PresaleInfo {
            token: Address::zero(),
            start_time: start,
            end_time: end,
            soft_cap: U256::zero(),
            hard_cap: U256::from(cap),
            total_raised: U256::from(raised),
            is_active: active,
            token_price: U256::zero(),
        }
    }

    #[test]
    fn assess_orders_terminal_states_first() {
        // Contract still claims active after the end time
        assert_eq!(
            assess(&info(100, 200, 0, 10, true), 201),
            PresaleAssessment::Ended
        );
        assert_eq!(
            assess(&info(100, 200, 10, 10, true), 150),
            PresaleAssessment::HardCapReached
        );
        assert_eq!(
            assess(&info(100, 200, 0, 10, false), 40),
            PresaleAssessment::Upcoming { starts_in: 60 }
        );
        assert_eq!(
            assess(&info(100, 200, 0, 10, false), 150),
            PresaleAssessment::Inactive
        );
        assert_eq!(
            assess(&info(100, 200, 4, 10, true), 200),
            PresaleAssessment::Active {
                remaining: U256::from(6)
            }
        );
    }

    #[test]
    fn buy_amount_never_exceeds_remaining() {
        assert_eq!(buy_amount(U256::from(5), U256::from(9)), U256::from(5));
        assert_eq!(buy_amount(U256::from(5), U256::from(3)), U256::from(3));
        assert!(buy_amount(U256::from(5), U256::zero()).is_zero());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff(base, 1), Duration::from_secs(2));
        assert_eq!(backoff(base, 2), Duration::from_secs(4));
        assert_eq!(backoff(base, 4), Duration::from_secs(16));
        assert_eq!(backoff(base, 10), MAX_BACKOFF);
        assert_eq!(backoff(base, 40), MAX_BACKOFF);
    }

    #[test]
    fn phase_codes() {
        assert_eq!(BotPhase::Idle.code(), 0);
        assert!(BotPhase::Completed.is_final());
        assert!(!BotPhase::Buying.is_final());
        assert_eq!(
            serde_json::to_string(&BotPhase::WaitingForStart).unwrap(),
            "\"waiting_for_start\""
        );
    }
}
