//! Presale contract ABI and call encoding
//!
//! Targets the common launchpad layout (PinkSale, DxSale and friends): a
//! payable `buy()` plus a handful of view functions describing the sale.

use crate::error::{BotError, BotResult};

use chrono::{DateTime, TimeZone, Utc};
use ethers::abi::{parse_abi, Detokenize, Tokenize};
use ethers::contract::BaseContract;
use ethers::types::{Address, Bytes, U256};
use lazy_static::lazy_static;
use serde::Serialize;

lazy_static! {
    static ref PRESALE_ABI: BaseContract = BaseContract::from(
        parse_abi(&[
            "function buy() payable",
            "function getTokenPrice() view returns (uint256)",
            "function getTokensForEth() view returns (uint256)",
            "function presaleStartTime() view returns (uint256)",
            "function presaleEndTime() view returns (uint256)",
            "function softCap() view returns (uint256)",
            "function hardCap() view returns (uint256)",
            "function totalRaised() view returns (uint256)",
            "function token() view returns (address)",
            "function isPresaleActive() view returns (bool)",
        ])
        .expect("presale ABI is valid")
    );
}

/// Snapshot of the presale contract state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresaleInfo {
    pub token: Address,
    /// Unix seconds
    pub start_time: u64,
    /// Unix seconds
    pub end_time: u64,
    pub soft_cap: U256,
    pub hard_cap: U256,
    pub total_raised: U256,
    pub is_active: bool,
    pub token_price: U256,
}

impl PresaleInfo {
    /// Allocation left before the hard cap, in wei
    pub fn remaining(&self) -> U256 {
        self.hard_cap.saturating_sub(self.total_raised)
    }

    pub fn start_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.start_time as i64, 0).single()
    }

    pub fn end_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.end_time as i64, 0).single()
    }
}

/// Calldata for `name()` with the given arguments
pub fn encode_call<T: Tokenize>(name: &str, args: T) -> BotResult<Bytes> {
    PRESALE_ABI
        .encode(name, args)
        .map_err(|e| BotError::Contract(format!("Failed to encode {}: {}", name, e)))
}

/// Decode the return data of `name()`
pub fn decode_output<D: Detokenize>(name: &str, data: &Bytes) -> BotResult<D> {
    PRESALE_ABI
        .decode_output(name, data)
        .map_err(|e| BotError::Contract(format!("Failed to decode {}: {}", name, e)))
}

/// Calldata for the payable `buy()` entry point
pub fn buy_calldata() -> BotResult<Bytes> {
    encode_call("buy", ())
}

/// Tokens received for `amount` wei given the contract's `getTokensForEth` rate
pub fn tokens_from_rate(tokens_per_eth: U256, amount: U256) -> U256 {
    tokens_per_eth.saturating_mul(amount) / U256::exp10(18)
}

/// Tokens received for `amount` wei given the contract's `getTokenPrice`
pub fn tokens_from_price(token_price: U256, amount: U256) -> Option<U256> {
    if token_price.is_zero() {
        return None;
    }
    Some(amount.saturating_mul(U256::exp10(18)) / token_price)
}
