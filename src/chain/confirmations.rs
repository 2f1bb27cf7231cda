//! Receipt polling and confirmation depth tracking
//!
//! A receipt only means the transaction made it into some block. The tracker
//! keeps polling until the inclusion block is buried under the configured
//! number of confirmations and re-reads the receipt at that point, so a reorg
//! that dropped the transaction surfaces as an error instead of a false success.

use super::ChainClient;
use crate::error::{BotError, BotResult};

use ethers::types::{TransactionReceipt, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Waits for transactions to be mined and confirmed
pub struct ConfirmationTracker {
    client: Arc<dyn ChainClient>,
    /// Blocks required, counting the inclusion block itself
    min_confirmations: u64,
    /// Total time allowed from broadcast to confirmation
    timeout: Duration,
    /// Delay between receipt polls
    poll_latency: Duration,
}

impl ConfirmationTracker {
    pub fn new(
        client: Arc<dyn ChainClient>,
        min_confirmations: u64,
        timeout: Duration,
        poll_latency: Duration,
    ) -> Self {
        Self {
            client,
            min_confirmations: min_confirmations.max(1),
            timeout,
            poll_latency,
        }
    }

    /// Wait until `tx_hash` is mined and buried under enough blocks.
    ///
    /// Returns the final receipt whatever its status; callers decide what a
    /// reverted receipt means.
    pub async fn confirm(&self, tx_hash: H256) -> BotResult<TransactionReceipt> {
        let deadline = Instant::now() + self.timeout;

        let receipt = self.wait_for_receipt(tx_hash, deadline).await?;
        if self.min_confirmations <= 1 {
            return Ok(receipt);
        }

        self.wait_for_depth(tx_hash, receipt, deadline).await
    }

    /// Poll until a receipt shows up or the deadline passes
    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        deadline: Instant,
    ) -> BotResult<TransactionReceipt> {
        loop {
            match self.client.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) if receipt.block_number.is_some() => {
                    info!(
                        "Transaction {:?} mined in block {}",
                        tx_hash,
                        receipt.block_number.unwrap_or_default()
                    );
                    return Ok(receipt);
                }
                Ok(_) => debug!("Transaction {:?} not mined yet", tx_hash),
                Err(e) => warn!("Receipt lookup for {:?} failed: {}", tx_hash, e),
            }

            if Instant::now() + self.poll_latency > deadline {
                return Err(BotError::Timeout {
                    operation: format!("receipt for {:?}", tx_hash),
                });
            }
            sleep(self.poll_latency).await;
        }
    }

    /// Poll the chain head until the receipt has `min_confirmations`
    async fn wait_for_depth(
        &self,
        tx_hash: H256,
        mut receipt: TransactionReceipt,
        deadline: Instant,
    ) -> BotResult<TransactionReceipt> {
        loop {
            let included_at = receipt.block_number.map(|n| n.as_u64()).unwrap_or_default();

            match self.client.block_number().await {
                Ok(head) => {
                    let confirmations = confirmations(included_at, head);
                    if confirmations >= self.min_confirmations {
                        match self.verify_inclusion(tx_hash, included_at).await {
                            Ok(current) => {
                                let now_at =
                                    current.block_number.map(|n| n.as_u64()).unwrap_or_default();
                                if now_at == included_at {
                                    info!(
                                        "Transaction {:?} confirmed ({} confirmations)",
                                        tx_hash, confirmations
                                    );
                                    return Ok(current);
                                }
                                // Re-included after a reorg; count again from the new block.
                                warn!(
                                    "Transaction {:?} moved from block {} to {}",
                                    tx_hash, included_at, now_at
                                );
                                receipt = current;
                                continue;
                            }
                            Err(e @ BotError::ReorgDetected { .. }) => return Err(e),
                            Err(e) => warn!("Receipt re-check for {:?} failed: {}", tx_hash, e),
                        }
                    } else {
                        debug!(
                            "Transaction {:?} has {} / {} confirmations",
                            tx_hash, confirmations, self.min_confirmations
                        );
                    }
                }
                Err(e) => warn!("Block number lookup failed: {}", e),
            }

            if Instant::now() + self.poll_latency > deadline {
                return Err(BotError::Timeout {
                    operation: format!(
                        "{} confirmations for {:?}",
                        self.min_confirmations, tx_hash
                    ),
                });
            }
            sleep(self.poll_latency).await;
        }
    }

    /// Re-read the receipt to make sure the transaction is still on chain.
    ///
    /// Lookup errors are passed through so the caller can poll again.
    async fn verify_inclusion(
        &self,
        tx_hash: H256,
        included_at: u64,
    ) -> BotResult<TransactionReceipt> {
        match self.client.transaction_receipt(tx_hash).await? {
            Some(receipt) if receipt.block_number.is_some() => Ok(receipt),
            _ => Err(BotError::ReorgDetected {
                tx_hash: format!("{:?}", tx_hash),
                block_number: included_at,
            }),
        }
    }
}

/// Confirmations of a transaction included at `included_at` when the head is `head`
pub fn confirmations(included_at: u64, head: u64) -> u64 {
    if head < included_at {
        0
    } else {
        head - included_at + 1
    }
}
