//! ethers-backed `ChainClient` for one wallet and one presale contract

use super::presale::{self, PresaleInfo};
use super::provider::ChainProvider;
use super::{BlockSnapshot, ChainClient, SignedTransaction};
use crate::error::{BotError, BotResult};

use async_trait::async_trait;
use ethers::abi::Detokenize;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Chain access through JSON-RPC with a local signing key
pub struct EthersClient {
    provider: ChainProvider,
    wallet: LocalWallet,
    presale_address: Address,
    send_timeout: Duration,
}

impl EthersClient {
    /// Create a new client. The wallet is bound to the provider's chain id.
    pub fn new(
        provider: ChainProvider,
        private_key: &str,
        presale_address: Address,
    ) -> BotResult<Self> {
        let wallet = private_key
            .parse::<LocalWallet>()
            .map_err(|e| BotError::Wallet(format!("Invalid private key: {}", e)))?
            .with_chain_id(provider.chain_id());

        Ok(Self {
            provider,
            wallet,
            presale_address,
            send_timeout: Duration::from_secs(30),
        })
    }

    /// `eth_call` a view function on the presale contract and decode its output
    async fn call_view<D: Detokenize>(&self, function: &str) -> BotResult<D> {
        let data = presale::encode_call(function, ())?;
        let tx: TypedTransaction = TransactionRequest::new()
            .to(self.presale_address)
            .data(data)
            .into();

        let raw = self
            .provider
            .read(&format!("call {}", function), |p| {
                let tx = tx.clone();
                async move { p.call(&tx, None).await }
            })
            .await?;

        presale::decode_output(function, &raw)
    }
}

#[async_trait]
impl ChainClient for EthersClient {
    async fn chain_id(&self) -> BotResult<u64> {
        self.provider
            .read("get chain id", |p| async move {
                p.get_chainid().await.map(|id| id.as_u64())
            })
            .await
    }

    fn wallet_address(&self) -> Address {
        self.wallet.address()
    }

    fn presale_address(&self) -> Address {
        self.presale_address
    }

    async fn balance(&self) -> BotResult<U256> {
        let address = self.wallet.address();
        self.provider
            .read("get balance", |p| async move {
                p.get_balance(address, None).await
            })
            .await
    }

    async fn gas_price(&self) -> BotResult<U256> {
        self.provider
            .read("get gas price", |p| async move { p.get_gas_price().await })
            .await
            .map_err(|e| BotError::GasEstimation(e.to_string()))
    }

    async fn latest_block(&self) -> BotResult<BlockSnapshot> {
        let block = self
            .provider
            .read("get latest block", |p| async move {
                p.get_block(BlockNumber::Latest).await
            })
            .await?
            .ok_or_else(|| BotError::ChainConnection("No latest block".to_string()))?;

        Ok(BlockSnapshot {
            number: block.number.map(|n| n.as_u64()).unwrap_or_default(),
            base_fee_per_gas: block.base_fee_per_gas,
            gas_used: block.gas_used,
            gas_limit: block.gas_limit,
        })
    }

    async fn block_number(&self) -> BotResult<u64> {
        self.provider.get_block_number().await
    }

    async fn presale_info(&self) -> BotResult<PresaleInfo> {
        let (token, start, end, soft_cap, hard_cap, total_raised, is_active, token_price) =
            futures::try_join!(
                self.call_view::<Address>("token"),
                self.call_view::<U256>("presaleStartTime"),
                self.call_view::<U256>("presaleEndTime"),
                self.call_view::<U256>("softCap"),
                self.call_view::<U256>("hardCap"),
                self.call_view::<U256>("totalRaised"),
                self.call_view::<bool>("isPresaleActive"),
                self.call_view::<U256>("getTokenPrice"),
            )?;

        Ok(PresaleInfo {
            token,
            start_time: start.low_u64(),
            end_time: end.low_u64(),
            soft_cap,
            hard_cap,
            total_raised,
            is_active,
            token_price,
        })
    }

    async fn tokens_per_eth(&self) -> BotResult<U256> {
        self.call_view("getTokensForEth").await
    }

    async fn token_price(&self) -> BotResult<U256> {
        self.call_view("getTokenPrice").await
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> BotResult<U256> {
        self.provider
            .http()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| BotError::GasEstimation(e.to_string()))
    }

    async fn pending_nonce(&self) -> BotResult<u64> {
        let address = self.wallet.address();
        self.provider
            .read("get transaction count", |p| async move {
                p.get_transaction_count(address, Some(BlockNumber::Pending.into()))
                    .await
            })
            .await
            .map(|n| n.as_u64())
            .map_err(|e| BotError::Nonce(e.to_string()))
    }

    async fn sign_transaction(&self, tx: &TypedTransaction) -> BotResult<SignedTransaction> {
        let mut tx = tx.clone();
        tx.set_chain_id(self.provider.chain_id());
        tx.set_from(self.wallet.address());

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| BotError::Wallet(e.to_string()))?;

        Ok(SignedTransaction {
            raw: tx.rlp_signed(&signature),
            hash: tx.hash(&signature),
            request: tx,
        })
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> BotResult<H256> {
        // Single endpoint only; retries belong to the sender.
        let result = timeout(
            self.send_timeout,
            self.provider.http().send_raw_transaction(tx.raw.clone()),
        )
        .await;

        match result {
            Ok(Ok(pending)) => {
                let tx_hash = pending.tx_hash();
                debug!("Broadcast {:?}", tx_hash);
                Ok(tx_hash)
            }
            Ok(Err(e)) => Err(BotError::from_rpc_message(e.to_string())),
            Err(_) => Err(BotError::Timeout {
                operation: format!("send transaction {:?}", tx.hash),
            }),
        }
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> BotResult<Option<TransactionReceipt>> {
        self.provider
            .read("get transaction receipt", |p| async move {
                p.get_transaction_receipt(tx_hash).await
            })
            .await
    }
}
