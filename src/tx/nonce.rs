//! Nonce management for reliable transaction submission
//!
//! Handles:
//! - Local nonce tracking for the bot wallet
//! - Pending transaction bookkeeping (nonce -> tx hash)
//! - Resync with the node after rejected or dropped submissions

use crate::chain::ChainClient;
use crate::error::{BotError, BotResult};

use dashmap::DashMap;
use ethers::types::H256;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Local view of the wallet's nonces
struct NonceState {
    /// Next nonce to hand out
    current: u64,
    /// Highest nonce known to be mined
    confirmed: Option<u64>,
    initialized: bool,
}

/// Nonce allocator for the bot wallet
pub struct NonceManager {
    client: Arc<dyn ChainClient>,
    state: Mutex<NonceState>,
    /// Broadcast but unconfirmed transactions: nonce -> tx hash
    pending: DashMap<u64, H256>,
}

impl NonceManager {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self {
            client,
            state: Mutex::new(NonceState {
                current: 0,
                confirmed: None,
                initialized: false,
            }),
            pending: DashMap::new(),
        }
    }

    /// Sync with the node's pending nonce.
    ///
    /// The local counter never moves backwards past a nonce we still track
    /// as pending.
    pub async fn sync(&self) -> BotResult<u64> {
        let on_chain = self.client.pending_nonce().await?;
        let mut state = self.state.lock().await;

        if state.initialized && on_chain > state.current {
            warn!(
                "Nonce gap detected: local {}, node {}",
                state.current, on_chain
            );
        }

        let highest_pending = self.pending.iter().map(|e| *e.key() + 1).max();
        state.current = match highest_pending {
            Some(next) if next > on_chain => next,
            _ => on_chain,
        };
        state.initialized = true;

        debug!("Nonce synced to {}", state.current);
        Ok(state.current)
    }

    /// Allocate the next nonce
    pub async fn next(&self) -> BotResult<u64> {
        let mut state = self.state.lock().await;
        if !state.initialized {
            return Err(BotError::Nonce("Nonce manager not synced".to_string()));
        }

        let nonce = state.current;
        state.current += 1;

        debug!("Allocated nonce {}", nonce);
        Ok(nonce)
    }

    /// Mark a nonce as pending with transaction hash
    pub fn mark_pending(&self, nonce: u64, tx_hash: H256) {
        self.pending.insert(nonce, tx_hash);
    }

    /// Hash of the transaction last broadcast with `nonce`
    pub fn pending_hash(&self, nonce: u64) -> Option<H256> {
        self.pending.get(&nonce).map(|h| *h)
    }

    /// Confirm a nonce (transaction mined)
    pub async fn confirm(&self, nonce: u64) {
        self.pending.remove(&nonce);
        let mut state = self.state.lock().await;
        if state.confirmed.map_or(true, |c| nonce > c) {
            state.confirmed = Some(nonce);
        }
    }

    /// Release a nonce (nothing was broadcast, can be reused)
    pub async fn release(&self, nonce: u64) {
        self.pending.remove(&nonce);

        let mut state = self.state.lock().await;
        // If this was the last nonce handed out, we can reset
        if state.current == nonce + 1 {
            state.current = nonce;
        }
    }

    /// Get pending count
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
