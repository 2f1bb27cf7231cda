//! Chain module - everything the bot knows about the blockchain
//!
//! This module provides:
//! - The `ChainClient` capability the bot is written against
//! - An ethers-backed implementation with multi-RPC failover
//! - Presale contract ABI and call encoding
//! - Receipt and confirmation tracking

pub mod client;
pub mod confirmations;
pub mod presale;
pub mod provider;

pub use client::EthersClient;
pub use confirmations::ConfirmationTracker;
pub use presale::PresaleInfo;
pub use provider::ChainProvider;

use crate::error::BotResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};

#[cfg(test)]
use mockall::automock;

/// Header fields of the latest block used for fee decisions
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSnapshot {
    pub number: u64,
    /// `None` on chains without EIP-1559
    pub base_fee_per_gas: Option<U256>,
    pub gas_used: U256,
    pub gas_limit: U256,
}

/// A transaction signed by the local wallet.
///
/// The hash is known before broadcast, so a send that times out can still
/// be looked up on chain.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub request: TypedTransaction,
    pub raw: Bytes,
    pub hash: H256,
}

/// Blockchain access for a single wallet against a single presale contract
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain id reported by the node
    async fn chain_id(&self) -> BotResult<u64>;

    /// Address of the signing wallet
    fn wallet_address(&self) -> Address;

    /// Address of the presale contract
    fn presale_address(&self) -> Address;

    /// Wallet balance in wei
    async fn balance(&self) -> BotResult<U256>;

    /// Node gas price in wei
    async fn gas_price(&self) -> BotResult<U256>;

    async fn latest_block(&self) -> BotResult<BlockSnapshot>;

    async fn block_number(&self) -> BotResult<u64>;

    /// Read every presale view function in one go
    async fn presale_info(&self) -> BotResult<PresaleInfo>;

    /// Token units per 1 ETH
    async fn tokens_per_eth(&self) -> BotResult<U256>;

    /// Wei per 1e18 token units
    async fn token_price(&self) -> BotResult<U256>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> BotResult<U256>;

    /// Next nonce including transactions still in the mempool
    async fn pending_nonce(&self) -> BotResult<u64>;

    /// Sign with the local wallet without broadcasting
    async fn sign_transaction(&self, tx: &TypedTransaction) -> BotResult<SignedTransaction>;

    /// Broadcast a signed transaction
    async fn send_transaction(&self, tx: &SignedTransaction) -> BotResult<H256>;

    async fn transaction_receipt(&self, tx_hash: H256) -> BotResult<Option<TransactionReceipt>>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ethers::utils::keccak256;

    /// Deterministic stand-in for wallet signing: the hash changes with
    /// every field of the request
    pub fn fake_sign(tx: &TypedTransaction) -> BotResult<SignedTransaction> {
        Ok(SignedTransaction {
            request: tx.clone(),
            raw: Bytes::new(),
            hash: H256::from(keccak256(format!("{:?}", tx).as_bytes())),
        })
    }
}
