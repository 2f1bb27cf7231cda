//! Transaction sender with retry logic and stuck transaction handling
//!
//! Only one buy may ever land. Once a buy has been broadcast its nonce stays
//! reserved until a receipt shows up: a later attempt re-checks every hash
//! broadcast for that nonce and, if none is mined, replaces it at the same
//! nonce with bumped fees instead of opening a second one.

use super::gas::{GasOptimizer, GasParams, GasPrice};
use super::nonce::NonceManager;
use crate::chain::{presale, ChainClient, ConfirmationTracker, SignedTransaction};
use crate::config::BotConfig;
use crate::error::{BotError, BotResult};

use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// A buy broadcast under one nonce, possibly replaced several times
#[derive(Debug, Clone)]
pub struct Submission {
    pub nonce: u64,
    pub amount: U256,
    pub price: GasPrice,
    /// Every hash broadcast for this nonce, oldest first
    pub hashes: Vec<H256>,
    pub submitted_at: Instant,
}

impl Submission {
    pub fn latest_hash(&self) -> H256 {
        self.hashes.last().copied().unwrap_or_default()
    }
}

/// Receipt data the bot cares about
#[derive(Debug, Clone, PartialEq)]
pub struct BuyReceipt {
    pub tx_hash: H256,
    pub block_number: u64,
    pub gas_used: U256,
}

impl From<&TransactionReceipt> for BuyReceipt {
    fn from(receipt: &TransactionReceipt) -> Self {
        Self {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()).unwrap_or_default(),
            gas_used: receipt.gas_used.unwrap_or_default(),
        }
    }
}

/// Final state of a confirmed buy
#[derive(Debug, Clone, PartialEq)]
pub enum BuyOutcome {
    Confirmed(BuyReceipt),
    Reverted(BuyReceipt),
}

/// How a send loop ended
#[derive(Debug)]
enum Broadcast {
    /// The node holds the transaction
    Sent { hash: H256, price: GasPrice },
    /// Failed, but these signed hashes may have reached the mempool
    Unacknowledged {
        hashes: Vec<H256>,
        price: GasPrice,
        error: BotError,
    },
    /// Every attempt was turned away
    Rejected(BotError),
}

impl Broadcast {
    fn failed(in_flight: Vec<H256>, price: GasPrice, error: BotError) -> Self {
        if in_flight.is_empty() {
            Broadcast::Rejected(error)
        } else {
            Broadcast::Unacknowledged {
                hashes: in_flight,
                price,
                error,
            }
        }
    }
}

/// Builds, signs, broadcasts and confirms the presale buy
pub struct TransactionSender {
    client: Arc<dyn ChainClient>,
    nonce_manager: NonceManager,
    gas: Arc<GasOptimizer>,
    tracker: ConfirmationTracker,
    config: BotConfig,
    /// Broadcast buy without a receipt yet
    unresolved: Mutex<Option<Submission>>,
}

impl TransactionSender {
    pub fn new(client: Arc<dyn ChainClient>, gas: Arc<GasOptimizer>, config: BotConfig) -> Self {
        let tracker = ConfirmationTracker::new(
            client.clone(),
            config.min_confirmations,
            config.receipt_timeout(),
            config.receipt_poll(),
        );

        Self {
            nonce_manager: NonceManager::new(client.clone()),
            client,
            gas,
            tracker,
            config,
            unresolved: Mutex::new(None),
        }
    }

    /// Build the payable `buy()` call
    pub fn build_buy(
        &self,
        amount: U256,
        nonce: u64,
        params: Option<&GasParams>,
    ) -> BotResult<TypedTransaction> {
        let data = presale::buy_calldata()?;
        let to = self.client.presale_address();
        let from = self.client.wallet_address();

        let tx = match params.map(|p| (p.gas_limit, p.price)) {
            Some((gas_limit, GasPrice::Legacy(price))) => TypedTransaction::Legacy(
                TransactionRequest::new()
                    .from(from)
                    .to(to)
                    .value(amount)
                    .data(data)
                    .nonce(nonce)
                    .gas(gas_limit)
                    .gas_price(price),
            ),
            Some((
                gas_limit,
                GasPrice::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                },
            )) => TypedTransaction::Eip1559(
                Eip1559TransactionRequest::new()
                    .from(from)
                    .to(to)
                    .value(amount)
                    .data(data)
                    .nonce(nonce)
                    .gas(gas_limit)
                    .max_fee_per_gas(max_fee_per_gas)
                    .max_priority_fee_per_gas(max_priority_fee_per_gas),
            ),
            // Draft for gas estimation
            None => TypedTransaction::Eip1559(
                Eip1559TransactionRequest::new()
                    .from(from)
                    .to(to)
                    .value(amount)
                    .data(data)
                    .nonce(nonce),
            ),
        };

        Ok(tx)
    }

    /// Broadcast a buy of `amount` wei.
    ///
    /// If an earlier buy is still unresolved its nonce is reused. When that
    /// buy turns out to be mined already it is returned as is.
    pub async fn submit_buy(&self, amount: U256) -> BotResult<Submission> {
        let mut unresolved = self.unresolved.lock().await;

        if let Some(previous) = unresolved.as_mut() {
            if let Some(hash) = self.find_mined(previous).await {
                info!(
                    "Earlier buy {:?} (nonce {}) was mined, not resubmitting",
                    hash, previous.nonce
                );
                previous.hashes.retain(|h| *h == hash);
                return Ok(previous.clone());
            }

            warn!(
                "Buy with nonce {} still pending after {:?}, replacing",
                previous.nonce,
                previous.submitted_at.elapsed()
            );
            let draft = self.build_buy(previous.amount, previous.nonce, None)?;
            let fresh = self.gas.optimize(&draft).await;
            let params = GasParams {
                gas_limit: fresh.gas_limit,
                price: self.gas.replacement(&previous.price, &fresh.price),
            };

            return match self
                .send_with_retry(previous.amount, previous.nonce, params)
                .await
            {
                Broadcast::Sent { hash, price } => {
                    if !previous.hashes.contains(&hash) {
                        previous.hashes.push(hash);
                    }
                    previous.price = price;
                    self.nonce_manager.mark_pending(previous.nonce, hash);
                    crate::metrics::record_tx_submitted();
                    Ok(previous.clone())
                }
                Broadcast::Unacknowledged {
                    hashes,
                    price,
                    error,
                } => {
                    for hash in hashes {
                        if !previous.hashes.contains(&hash) {
                            previous.hashes.push(hash);
                        }
                    }
                    previous.price = price;
                    self.nonce_manager
                        .mark_pending(previous.nonce, previous.latest_hash());
                    Err(error)
                }
                Broadcast::Rejected(error) => Err(error),
            };
        }

        self.nonce_manager.sync().await?;
        let nonce = self.nonce_manager.next().await?;

        let draft = self.build_buy(amount, nonce, None)?;
        let params = self.gas.optimize(&draft).await;
        info!(
            "Buy gas: limit {}, max cost {} wei",
            params.gas_limit,
            GasOptimizer::transaction_cost(&params)
        );

        match self.send_with_retry(amount, nonce, params).await {
            Broadcast::Sent { hash, price } => {
                self.nonce_manager.mark_pending(nonce, hash);
                crate::metrics::record_tx_submitted();

                let submission = Submission {
                    nonce,
                    amount,
                    price,
                    hashes: vec![hash],
                    submitted_at: Instant::now(),
                };
                *unresolved = Some(submission.clone());
                Ok(submission)
            }
            Broadcast::Unacknowledged {
                hashes,
                price,
                error,
            } => {
                // The node may hold the buy; keep the nonce until a receipt decides
                warn!(
                    "Buy with nonce {} may be in the mempool ({}), tracking {} hash(es)",
                    nonce,
                    error,
                    hashes.len()
                );
                let submission = Submission {
                    nonce,
                    amount,
                    price,
                    hashes,
                    submitted_at: Instant::now(),
                };
                self.nonce_manager.mark_pending(nonce, submission.latest_hash());
                *unresolved = Some(submission);
                Err(error)
            }
            Broadcast::Rejected(error) => {
                self.nonce_manager.release(nonce).await;
                Err(error)
            }
        }
    }

    /// Sign once per fee level and broadcast, retrying on transient errors
    async fn send_with_retry(&self, amount: U256, nonce: u64, mut params: GasParams) -> Broadcast {
        let max_attempts = self.config.max_send_retries.max(1);
        let mut attempts = 0;
        let mut in_flight: Vec<H256> = Vec::new();
        let mut last_error = None;

        while attempts < max_attempts {
            attempts += 1;

            let signed = match self.sign_buy(amount, nonce, &params).await {
                Ok(signed) => signed,
                Err(e) => return Broadcast::failed(in_flight, params.price, e),
            };

            let error = match self.client.send_transaction(&signed).await {
                Ok(tx_hash) => {
                    info!(
                        "Transaction sent: {:?} (attempt {}/{})",
                        tx_hash, attempts, max_attempts
                    );
                    return Broadcast::Sent {
                        hash: tx_hash,
                        price: params.price,
                    };
                }
                Err(BotError::AlreadyKnown) => {
                    info!(
                        "Transaction {:?} already known to the node (attempt {}/{})",
                        signed.hash, attempts, max_attempts
                    );
                    return Broadcast::Sent {
                        hash: signed.hash,
                        price: params.price,
                    };
                }
                Err(BotError::Nonce(message)) => {
                    warn!("Nonce {} rejected ({}), syncing", nonce, message);
                    if let Err(e) = self.nonce_manager.sync().await {
                        debug!("Nonce resync failed: {}", e);
                    }
                    return Broadcast::failed(in_flight, params.price, BotError::Nonce(message));
                }
                Err(BotError::Underpriced) => {
                    let bumped = self.gas.replacement(&params.price, &params.price);
                    if bumped == params.price {
                        warn!("Transaction underpriced and fees already at the ceiling");
                        return Broadcast::failed(in_flight, params.price, BotError::Underpriced);
                    }
                    warn!("Transaction underpriced, increasing gas");
                    params.price = bumped;
                    BotError::Underpriced
                }
                Err(e @ BotError::InsufficientBalance { .. }) | Err(e @ BotError::Wallet(_)) => {
                    error!("Transaction rejected: {}", e);
                    return Broadcast::failed(in_flight, params.price, e);
                }
                Err(e) => {
                    warn!("Transaction send failed (attempt {}): {}", attempts, e);
                    if matches!(e, BotError::Timeout { .. } | BotError::ChainConnection(_))
                        && !in_flight.contains(&signed.hash)
                    {
                        in_flight.push(signed.hash);
                    }
                    e
                }
            };
            last_error = Some(error);

            // Wait before retry
            if attempts < max_attempts {
                tokio::time::sleep(self.config.retry_delay()).await;
            }
        }

        let error =
            last_error.unwrap_or_else(|| BotError::Transaction("Unknown error".to_string()));
        Broadcast::failed(in_flight, params.price, error)
    }

    async fn sign_buy(
        &self,
        amount: U256,
        nonce: u64,
        params: &GasParams,
    ) -> BotResult<SignedTransaction> {
        let tx = self.build_buy(amount, nonce, Some(params))?;
        self.client.sign_transaction(&tx).await
    }

    /// Wait for the submission to be mined and confirmed
    pub async fn await_confirmation(&self, submission: &Submission) -> BotResult<BuyOutcome> {
        let tx_hash = submission.latest_hash();

        let receipt = match self.tracker.confirm(tx_hash).await {
            Ok(receipt) => receipt,
            Err(e @ BotError::Timeout { .. }) => {
                // An older replacement may have been mined instead
                match self.find_mined(submission).await {
                    Some(hash) if hash != tx_hash => self.tracker.confirm(hash).await?,
                    _ => {
                        crate::metrics::record_tx_failed();
                        return Err(e);
                    }
                }
            }
            Err(e) => {
                crate::metrics::record_tx_failed();
                return Err(e);
            }
        };

        self.nonce_manager.confirm(submission.nonce).await;
        *self.unresolved.lock().await = None;
        crate::metrics::record_tx_latency(submission.submitted_at.elapsed().as_secs_f64());

        let buy = BuyReceipt::from(&receipt);
        if receipt.status == Some(U64::from(1u64)) {
            crate::metrics::record_tx_confirmed();
            Ok(BuyOutcome::Confirmed(buy))
        } else {
            crate::metrics::record_tx_failed();
            Ok(BuyOutcome::Reverted(buy))
        }
    }

    /// First hash of the submission that has a receipt
    async fn find_mined(&self, submission: &Submission) -> Option<H256> {
        for hash in submission.hashes.iter().rev() {
            match self.client.transaction_receipt(*hash).await {
                Ok(Some(receipt)) if receipt.block_number.is_some() => return Some(*hash),
                Ok(_) => {}
                Err(e) => debug!("Receipt lookup for {:?} failed: {}", hash, e),
            }
        }
        None
    }

    /// Whether a broadcast buy is still waiting for a receipt
    pub async fn has_unresolved(&self) -> bool {
        self.unresolved.lock().await.is_some()
    }

    /// Tokens received for `amount` wei.
    ///
    /// Uses `getTokensForEth` and falls back to `getTokenPrice`.
    pub async fn tokens_for(&self, amount: U256) -> BotResult<U256> {
        match self.client.tokens_per_eth().await {
            Ok(rate) => Ok(presale::tokens_from_rate(rate, amount)),
            Err(rate_err) => {
                debug!("getTokensForEth failed ({}), trying token price", rate_err);
                let price = self.client.token_price().await.map_err(|e| {
                    BotError::Contract(format!("Failed to calculate tokens: {}", e))
                })?;
                presale::tokens_from_price(price, amount)
                    .ok_or_else(|| BotError::Contract("Token price is zero".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::tests::fake_sign;
    use crate::chain::{BlockSnapshot, MockChainClient};
    use crate::config::GasConfig;
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    const GWEI: u64 = 1_000_000_000;

    fn wallet() -> Address {
        Address::repeat_byte(0x11)
    }

    fn presale_address() -> Address {
        Address::repeat_byte(0x22)
    }

    /// Mock with everything a submission needs except `send_transaction`
    fn base_mock(nonce: u64) -> MockChainClient {
        let mut mock = MockChainClient::new();
        mock.expect_sign_transaction().returning(fake_sign);
        mock.expect_wallet_address().returning(wallet);
        mock.expect_presale_address().returning(presale_address);
        mock.expect_pending_nonce().returning(move || Ok(nonce));
        mock.expect_estimate_gas()
            .returning(|_| Ok(U256::from(100_000)));
        mock.expect_latest_block().returning(|| {
            Ok(BlockSnapshot {
                number: 10,
                base_fee_per_gas: Some(U256::from(GWEI / 100)),
                gas_used: U256::zero(),
                gas_limit: U256::from(30_000_000),
            })
        });
        mock
    }

    fn sender(mock: MockChainClient) -> TransactionSender {
        sender_with(mock, GasConfig::default())
    }

    fn sender_with(mock: MockChainClient, gas: GasConfig) -> TransactionSender {
        let client: Arc<dyn ChainClient> = Arc::new(mock);
        let gas = Arc::new(GasOptimizer::new(client.clone(), gas));
        let config = BotConfig {
            receipt_timeout_secs: 20,
            ..BotConfig::default()
        };
        TransactionSender::new(client, gas, config)
    }

    fn receipt(hash: H256, status: u64) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(U64::from(12)),
            gas_used: Some(U256::from(90_000)),
            status: Some(U64::from(status)),
            ..Default::default()
        }
    }

    #[test]
    fn builds_payable_buy() {
        let sender = sender(base_mock(0));
        let params = GasParams {
            gas_limit: U256::from(120_000),
            price: GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(GWEI),
                max_priority_fee_per_gas: U256::from(GWEI / 10),
            },
        };

        let tx = sender
            .build_buy(U256::from(10u64).pow(17.into()), 4, Some(&params))
            .unwrap();
        assert_eq!(tx.to_addr(), Some(&presale_address()));
        assert_eq!(tx.from(), Some(&wallet()));
        assert_eq!(tx.value(), Some(&U256::exp10(17)));
        assert_eq!(tx.nonce(), Some(&U256::from(4)));
        assert_eq!(tx.gas(), Some(&U256::from(120_000)));
        assert_eq!(
            tx.data().map(|d| d.to_vec()),
            Some(ethers::utils::id("buy()").to_vec())
        );
        match tx {
            TypedTransaction::Eip1559(inner) => {
                assert_eq!(inner.max_fee_per_gas, Some(U256::from(GWEI)));
            }
            other => panic!("expected EIP-1559 tx, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn submits_and_confirms() {
        let hash = H256::repeat_byte(0xaa);
        let mut mock = base_mock(9);
        mock.expect_send_transaction()
            .times(1)
            .withf(|tx| tx.request.nonce() == Some(&U256::from(9)))
            .returning(move |_| Ok(hash));
        mock.expect_transaction_receipt()
            .with(eq(hash))
            .returning(move |h| Ok(Some(receipt(h, 1))));

        let sender = sender(mock);
        let submission = sender.submit_buy(U256::exp10(17)).await.unwrap();
        assert_eq!(submission.nonce, 9);
        assert!(sender.has_unresolved().await);

        let outcome = sender.await_confirmation(&submission).await.unwrap();
        assert_eq!(
            outcome,
            BuyOutcome::Confirmed(BuyReceipt {
                tx_hash: hash,
                block_number: 12,
                gas_used: U256::from(90_000),
            })
        );
        assert!(!sender.has_unresolved().await);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_revert() {
        let hash = H256::repeat_byte(0xbb);
        let mut mock = base_mock(0);
        mock.expect_send_transaction().returning(move |_| Ok(hash));
        mock.expect_transaction_receipt()
            .returning(move |h| Ok(Some(receipt(h, 0))));

        let sender = sender(mock);
        let submission = sender.submit_buy(U256::exp10(17)).await.unwrap();
        let outcome = sender.await_confirmation(&submission).await.unwrap();
        assert!(matches!(outcome, BuyOutcome::Reverted(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_send_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut mock = base_mock(0);
        mock.expect_send_transaction().returning(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(BotError::ChainConnection("connection reset".into()))
            } else {
                Ok(H256::repeat_byte(0xcc))
            }
        });

        let submission = sender(mock).submit_buy(U256::exp10(17)).await.unwrap();
        assert_eq!(submission.latest_hash(), H256::repeat_byte(0xcc));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_release_the_nonce() {
        let mut mock = base_mock(4);
        mock.expect_send_transaction()
            .times(3)
            .returning(|_| Err(BotError::Transaction("boom".into())));

        let sender = sender(mock);
        let err = sender.submit_buy(U256::exp10(17)).await.unwrap_err();
        assert!(matches!(err, BotError::Transaction(_)));
        assert!(!sender.has_unresolved().await);
        assert_eq!(sender.nonce_manager.next().await.unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn insufficient_funds_is_not_retried() {
        let mut mock = base_mock(0);
        mock.expect_send_transaction().times(1).returning(|_| {
            Err(BotError::InsufficientBalance {
                have: "unknown".into(),
                need: "unknown".into(),
            })
        });

        let err = sender(mock).submit_buy(U256::exp10(17)).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    fn max_fee(tx: &SignedTransaction) -> U256 {
        match &tx.request {
            TypedTransaction::Eip1559(inner) => inner.max_fee_per_gas.unwrap_or_default(),
            _ => U256::zero(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn underpriced_bumps_fees() {
        let fees = Arc::new(StdMutex::new(Vec::new()));
        let seen = fees.clone();
        let mut mock = base_mock(0);
        mock.expect_send_transaction().returning(move |tx| {
            let mut seen = seen.lock().unwrap();
            seen.push(max_fee(tx));
            if seen.len() == 1 {
                Err(BotError::Underpriced)
            } else {
                Ok(H256::repeat_byte(0xdd))
            }
        });

        let gas = GasConfig {
            max_gas_price_wei: 10 * GWEI,
            ..GasConfig::default()
        };
        let submission = sender_with(mock, gas)
            .submit_buy(U256::exp10(17))
            .await
            .unwrap();
        assert_eq!(submission.hashes.len(), 1);

        // Base fee plus tip, then bumped by 125%
        let first = U256::from(GWEI / 100 + GWEI);
        assert_eq!(*fees.lock().unwrap(), vec![first, first * 125 / 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn underpriced_at_fee_ceiling_is_not_resent() {
        let mut mock = base_mock(2);
        // Default config: fees already sit at the 0.1 gwei ceiling
        mock.expect_send_transaction()
            .times(1)
            .returning(|_| Err(BotError::Underpriced));

        let sender = sender(mock);
        let err = sender.submit_buy(U256::exp10(17)).await.unwrap_err();
        assert!(matches!(err, BotError::Underpriced));
        assert!(!sender.has_unresolved().await);
        assert_eq!(sender.nonce_manager.next().await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_broadcast_keeps_its_nonce() {
        let node_holds_buy = Arc::new(AtomicUsize::new(0));
        let accepted = node_holds_buy.clone();
        let nonces = Arc::new(StdMutex::new(Vec::new()));
        let broadcast = nonces.clone();

        let mut mock = MockChainClient::new();
        mock.expect_sign_transaction().returning(fake_sign);
        mock.expect_wallet_address().returning(wallet);
        mock.expect_presale_address().returning(presale_address);
        mock.expect_estimate_gas()
            .returning(|_| Ok(U256::from(100_000)));
        mock.expect_latest_block().returning(|| {
            Ok(BlockSnapshot {
                number: 10,
                base_fee_per_gas: Some(U256::from(GWEI / 100)),
                gas_used: U256::zero(),
                gas_limit: U256::from(30_000_000),
            })
        });
        // Once the node holds the nonce 3 buy, its pending nonce moves on
        let pending = node_holds_buy.clone();
        mock.expect_pending_nonce()
            .returning(move || Ok(3 + pending.load(Ordering::SeqCst) as u64));
        mock.expect_send_transaction().returning(move |tx| {
            let nonce = tx.request.nonce().map(|n| n.as_u64()).unwrap_or_default();
            broadcast.lock().unwrap().push(nonce);
            if accepted.swap(1, Ordering::SeqCst) == 0 {
                Err(BotError::Timeout {
                    operation: "send transaction".into(),
                })
            } else {
                Err(BotError::from_rpc_message("already known"))
            }
        });
        mock.expect_transaction_receipt().returning(|_| Ok(None));

        let config = BotConfig {
            max_send_retries: 1,
            receipt_timeout_secs: 20,
            ..BotConfig::default()
        };
        let client: Arc<dyn ChainClient> = Arc::new(mock);
        let gas = Arc::new(GasOptimizer::new(client.clone(), GasConfig::default()));
        let sender = TransactionSender::new(client, gas, config);

        let err = sender.submit_buy(U256::exp10(17)).await.unwrap_err();
        assert!(matches!(err, BotError::Timeout { .. }));
        assert!(sender.has_unresolved().await);

        // Fees are at the ceiling, so the same signed buy goes out again
        let again = sender.submit_buy(U256::exp10(17)).await.unwrap();
        assert_eq!(again.nonce, 3);
        assert_eq!(again.hashes.len(), 1);
        assert_eq!(*nonces.lock().unwrap(), vec![3, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn already_known_counts_as_sent() {
        let mut mock = base_mock(5);
        mock.expect_send_transaction()
            .times(2)
            .returning({
                let calls = AtomicUsize::new(0);
                move |_| {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(BotError::Timeout {
                            operation: "send transaction".into(),
                        })
                    } else {
                        Err(BotError::from_rpc_message("already known"))
                    }
                }
            });

        let sender = sender(mock);
        let submission = sender.submit_buy(U256::exp10(17)).await.unwrap();
        assert_eq!(submission.nonce, 5);
        assert_eq!(submission.hashes.len(), 1);
        assert!(sender.has_unresolved().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_buy_is_replaced_at_same_nonce() {
        let first = H256::repeat_byte(0x01);
        let second = H256::repeat_byte(0x02);
        let sends = Arc::new(AtomicUsize::new(0));
        let seen = sends.clone();

        let mut mock = base_mock(3);
        mock.expect_send_transaction().returning(move |tx| {
            assert_eq!(tx.request.nonce(), Some(&U256::from(3)));
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(first)
            } else {
                Ok(second)
            }
        });
        mock.expect_transaction_receipt().returning(|_| Ok(None));

        let sender = sender(mock);
        let submission = sender.submit_buy(U256::exp10(17)).await.unwrap();

        let err = sender.await_confirmation(&submission).await.unwrap_err();
        assert!(matches!(err, BotError::Timeout { .. }));
        assert!(sender.has_unresolved().await);

        let replaced = sender.submit_buy(U256::exp10(17)).await.unwrap();
        assert_eq!(replaced.nonce, 3);
        assert_eq!(replaced.hashes, vec![first, second]);
        assert_eq!(sends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn mined_earlier_buy_is_not_resubmitted() {
        let first = H256::repeat_byte(0x01);
        let mined = Arc::new(AtomicUsize::new(0));
        let flag = mined.clone();

        let mut mock = base_mock(3);
        mock.expect_send_transaction()
            .times(1)
            .returning(move |_| Ok(first));
        mock.expect_transaction_receipt().returning(move |h| {
            if flag.load(Ordering::SeqCst) == 0 {
                Ok(None)
            } else {
                Ok(Some(receipt(h, 1)))
            }
        });

        let sender = sender(mock);
        let submission = sender.submit_buy(U256::exp10(17)).await.unwrap();
        assert!(sender.await_confirmation(&submission).await.is_err());

        mined.store(1, Ordering::SeqCst);
        let again = sender.submit_buy(U256::exp10(17)).await.unwrap();
        assert_eq!(again.hashes, vec![first]);

        let outcome = sender.await_confirmation(&again).await.unwrap();
        assert!(matches!(outcome, BuyOutcome::Confirmed(_)));
    }

    #[tokio::test]
    async fn tokens_for_falls_back_to_price() {
        let mut mock = MockChainClient::new();
        mock.expect_tokens_per_eth()
            .returning(|| Err(BotError::Contract("missing".into())));
        mock.expect_token_price()
            .returning(|| Ok(U256::exp10(15)));

        let tokens = sender(mock)
            .tokens_for(U256::exp10(17))
            .await
            .unwrap();
        assert_eq!(tokens, U256::from(100) * U256::exp10(18));
    }

    #[tokio::test]
    async fn tokens_for_prefers_rate() {
        let mut mock = MockChainClient::new();
        mock.expect_tokens_per_eth()
            .returning(|| Ok(U256::from(2_000) * U256::exp10(18)));

        let tokens = sender(mock)
            .tokens_for(U256::exp10(17))
            .await
            .unwrap();
        assert_eq!(tokens, U256::from(200) * U256::exp10(18));
    }
}
