//! Presale monitoring loop and buy execution

use super::state::{
    assess, backoff, buy_amount, BotPhase, BotStatus, PresaleAssessment, TransactionRecord,
};
use crate::chain::{ChainClient, PresaleInfo};
use crate::config::{BotConfig, GasConfig, Settings};
use crate::error::{BotError, BotResult};
use crate::notify::{BotEvent, Notifier};
use crate::tx::{wei_to_gwei, BuyOutcome, GasOptimizer, TransactionSender};

use chrono::Utc;
use ethers::types::U256;
use ethers::utils::format_ether;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Pause while the presale is still in the future
const UPCOMING_POLL: Duration = Duration::from_secs(10);
/// Pause when the presale has no allocation left for us
const NO_ALLOCATION_POLL: Duration = Duration::from_secs(10);

/// Values the bot needs from the configuration, already converted to wei
#[derive(Debug, Clone)]
pub struct BotParams {
    pub chain_id: u64,
    pub buy_amount: U256,
    pub gas_reserve: U256,
    pub gas: GasConfig,
    pub bot: BotConfig,
}

impl BotParams {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self {
            chain_id: settings.network.chain_id,
            buy_amount: settings.buy_amount_wei()?,
            gas_reserve: settings.gas_reserve_wei()?,
            gas: settings.gas.clone(),
            bot: settings.bot.clone(),
        })
    }
}

/// Mutable run state
struct BotState {
    phase: BotPhase,
    is_running: bool,
    history: Vec<TransactionRecord>,
    buy_attempts: u32,
    /// Pre-start preparation already ran
    prepared: bool,
    /// Gas warning sent for the current high-gas episode
    gas_warned: bool,
}

/// Presale sniper
pub struct PresaleBot {
    client: Arc<dyn ChainClient>,
    notifier: Arc<dyn Notifier>,
    gas: Arc<GasOptimizer>,
    sender: TransactionSender,
    params: BotParams,
    state: RwLock<BotState>,
    /// Shutdown flag
    shutdown: Arc<RwLock<bool>>,
    session_id: Uuid,
}

impl PresaleBot {
    pub fn new(
        client: Arc<dyn ChainClient>,
        notifier: Arc<dyn Notifier>,
        params: BotParams,
    ) -> Self {
        let gas = Arc::new(GasOptimizer::new(client.clone(), params.gas.clone()));
        let sender = TransactionSender::new(client.clone(), gas.clone(), params.bot.clone());

        Self {
            client,
            notifier,
            gas,
            sender,
            params,
            state: RwLock::new(BotState {
                phase: BotPhase::Idle,
                is_running: false,
                history: Vec::new(),
                buy_attempts: 0,
                prepared: false,
                gas_warned: false,
            }),
            shutdown: Arc::new(RwLock::new(false)),
            session_id: Uuid::new_v4(),
        }
    }

    /// Run the bot until a purchase completes or the presale is over.
    ///
    /// Returns whether a purchase was confirmed.
    pub async fn run(&self) -> bool {
        info!("Starting presale sniper (session {})", self.session_id);
        {
            let mut state = self.state.write().await;
            state.is_running = true;
        }
        self.set_phase(BotPhase::Starting).await;

        self.notify(BotEvent::Startup {
            chain_id: self.params.chain_id,
            wallet: self.client.wallet_address(),
            buy_amount: self.params.buy_amount,
            max_gas_price: self.gas.max_gas_price(),
        })
        .await;

        if let Err(e) = self.preflight().await {
            error!("Startup checks failed: {}", e);
            if !self.phase().await.is_final() {
                self.set_phase(BotPhase::Failed).await;
            }
            self.state.write().await.is_running = false;
            return false;
        }

        self.set_phase(BotPhase::Monitoring).await;
        let status = self.status().await;
        self.notify(BotEvent::StatusUpdate {
            is_running: status.is_running,
            wallet: status.wallet_address,
            presale: status.presale_address,
            transaction_count: status.transaction_count,
        })
        .await;

        let outcome = self.monitor().await;
        self.state.write().await.is_running = false;

        info!("Monitoring finished: {:?}", outcome);
        outcome == BotPhase::Completed
    }

    async fn preflight(&self) -> BotResult<()> {
        self.check_network().await?;
        self.check_balance().await?;
        self.validate_presale().await?;
        Ok(())
    }

    /// Connected chain must be the configured one
    pub async fn check_network(&self) -> BotResult<()> {
        let result = match self.client.chain_id().await {
            Ok(actual) if actual == self.params.chain_id => {
                info!("Connected to chain {}", actual);
                Ok(())
            }
            Ok(actual) => Err(BotError::WrongNetwork {
                expected: self.params.chain_id,
                actual,
            }),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            error!("Network connection error: {}", e);
            self.notify_error(e, "Network connection check").await;
        }
        result
    }

    /// Balance must cover the buy amount plus the gas reserve
    pub async fn check_balance(&self) -> BotResult<U256> {
        let balance = match self.client.balance().await {
            Ok(balance) => balance,
            Err(e) => {
                error!("Error checking balance: {}", e);
                self.notify_error(&e, "Balance check").await;
                return Err(e);
            }
        };

        let balance_eth = format_ether(balance);
        info!("Wallet balance: {} ETH", balance_eth);
        crate::metrics::record_wallet_balance(balance_eth.parse().unwrap_or_default());

        let required = self.params.buy_amount.saturating_add(self.params.gas_reserve);
        if balance < required {
            error!(
                "Insufficient balance. Need {} ETH, have {} ETH",
                format_ether(required),
                balance_eth
            );
            self.notify(BotEvent::LowBalance { balance, required }).await;
            return Err(BotError::InsufficientBalance {
                have: balance_eth,
                need: format_ether(required),
            });
        }

        Ok(balance)
    }

    /// Read the presale and reject it if nothing can be bought anymore
    pub async fn validate_presale(&self) -> BotResult<PresaleInfo> {
        let info = match self.read_presale().await {
            Ok(info) => info,
            Err(e) => {
                error!("Error validating presale contract: {}", e);
                self.notify_error(&e, "Contract validation").await;
                return Err(e);
            }
        };

        info!("Presale contract information:");
        info!("  Token: {:?}", info.token);
        info!("  Start: {:?}", info.start_datetime());
        info!("  End: {:?}", info.end_datetime());
        info!("  Soft cap: {} ETH", format_ether(info.soft_cap));
        info!("  Hard cap: {} ETH", format_ether(info.hard_cap));
        info!("  Total raised: {} ETH", format_ether(info.total_raised));
        info!("  Active: {}", info.is_active);

        match assess(&info, now()) {
            assessment @ (PresaleAssessment::Ended | PresaleAssessment::HardCapReached) => {
                self.finish_presale(&info, &assessment).await;
                Err(BotError::Contract(format!("Presale closed: {:?}", assessment)))
            }
            PresaleAssessment::Upcoming { starts_in } => {
                info!("Presale starts in {} seconds", starts_in);
                Ok(info)
            }
            PresaleAssessment::Inactive => {
                warn!("Presale has started but is not active yet");
                Ok(info)
            }
            PresaleAssessment::Active { .. } => Ok(info),
        }
    }

    /// Last checks before the presale opens. Runs once per run.
    pub async fn prepare_for_presale(&self, info: &PresaleInfo) {
        {
            let mut state = self.state.write().await;
            if state.prepared {
                return;
            }
            state.prepared = true;
        }

        info!("Preparing for presale start...");

        if let Err(e) = self.check_balance().await {
            warn!("Balance not ready for presale: {}", e);
        }

        match self.gas.gas_stats().await {
            Some(stats) => info!(
                "Current gas conditions: {:.4} gwei base fee, {:.1}% utilization ({})",
                stats.base_fee_gwei,
                stats.utilization,
                if self.gas.is_favorable(&stats) {
                    "favorable"
                } else {
                    "unfavorable"
                }
            ),
            None => warn!("Gas conditions unavailable"),
        }

        self.notify(BotEvent::PresaleStarting {
            info: info.clone(),
            wallet: self.client.wallet_address(),
            buy_amount: self.params.buy_amount,
        })
        .await;
    }

    /// Buy `amount` wei worth of the presale and wait for the outcome
    pub async fn execute_buy(&self, amount: U256) -> BotResult<TransactionRecord> {
        self.set_phase(BotPhase::Buying).await;
        info!("Executing buy transaction for {} ETH", format_ether(amount));

        let gas_price = self.gas.current_gas_price().await;
        self.notify(BotEvent::BuyAttempt {
            amount,
            gas_price,
            contract: self.client.presale_address(),
        })
        .await;

        let result = self.try_buy(amount).await;
        match &result {
            Ok(record) => {
                crate::metrics::record_buy_attempt("confirmed");
                self.notify(BotEvent::BuySuccess {
                    tx_hash: record.tx_hash,
                    amount: record.amount_wei,
                    tokens_received: record.tokens_received,
                    gas_used: record.gas_used,
                })
                .await;
            }
            Err(e) => {
                crate::metrics::record_buy_attempt("failed");
                error!("Error executing buy transaction: {}", e);
                self.notify(BotEvent::BuyFailure {
                    error: e.to_string(),
                    contract: self.client.presale_address(),
                })
                .await;
            }
        }
        result
    }

    async fn try_buy(&self, amount: U256) -> BotResult<TransactionRecord> {
        let submission = self.sender.submit_buy(amount).await?;

        let receipt = match self.sender.await_confirmation(&submission).await? {
            BuyOutcome::Confirmed(receipt) => receipt,
            BuyOutcome::Reverted(receipt) => {
                return Err(BotError::Reverted {
                    tx_hash: format!("{:?}", receipt.tx_hash),
                    block_number: receipt.block_number,
                })
            }
        };
        info!(
            "Transaction successful! Block: {}",
            receipt.block_number
        );

        let tokens_received = match self.sender.tokens_for(submission.amount).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("Could not compute tokens received: {}", e);
                U256::zero()
            }
        };
        info!("Tokens received: {}", format_ether(tokens_received));

        let record = TransactionRecord {
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            amount_wei: submission.amount,
            tokens_received,
            timestamp: Utc::now(),
        };
        self.state.write().await.history.push(record.clone());

        Ok(record)
    }

    /// Poll the presale and buy once conditions allow. Returns the final phase.
    pub async fn monitor(&self) -> BotPhase {
        let config = &self.params.bot;
        let mut read_failures = 0u32;

        loop {
            if *self.shutdown.read().await {
                return BotPhase::Stopped;
            }

            let info = match self.read_presale().await {
                Ok(info) => {
                    read_failures = 0;
                    info
                }
                Err(e) => {
                    read_failures += 1;
                    error!("Error in monitoring loop: {}", e);
                    self.notify_error(&e, "Monitoring loop").await;
                    sleep(backoff(config.retry_delay(), read_failures)).await;
                    continue;
                }
            };

            match assess(&info, now()) {
                assessment @ (PresaleAssessment::Ended | PresaleAssessment::HardCapReached) => {
                    self.finish_presale(&info, &assessment).await;
                    return BotPhase::Ended;
                }
                PresaleAssessment::Upcoming { starts_in } => {
                    self.set_phase(BotPhase::WaitingForStart).await;
                    info!("Presale starts in {} seconds", starts_in);
                    if starts_in <= config.prestart_window_secs {
                        self.prepare_for_presale(&info).await;
                    }
                    sleep(UPCOMING_POLL.min(Duration::from_secs(starts_in))).await;
                    continue;
                }
                PresaleAssessment::Inactive => {
                    debug!("Presale started but not active");
                }
                PresaleAssessment::Active { remaining } => {
                    self.set_phase(BotPhase::Monitoring).await;

                    let amount = buy_amount(self.params.buy_amount, remaining);
                    if amount.is_zero() {
                        warn!("No allocation available");
                        sleep(NO_ALLOCATION_POLL).await;
                        continue;
                    }

                    let current_gas = self.gas.current_gas_price().await;
                    if !self.gas.is_acceptable(current_gas) {
                        self.gas_too_high(current_gas).await;
                        self.gas
                            .wait_for_optimal_gas(
                                Duration::from_secs(config.gas_wait_timeout_secs),
                                Duration::from_secs(config.gas_poll_secs),
                            )
                            .await;
                        continue;
                    }
                    self.state.write().await.gas_warned = false;

                    match self.execute_buy(amount).await {
                        Ok(record) => {
                            info!("Buy transaction completed: {:?}", record.tx_hash);
                            self.set_phase(BotPhase::Completed).await;
                            return BotPhase::Completed;
                        }
                        Err(e) => {
                            let attempts = {
                                let mut state = self.state.write().await;
                                state.buy_attempts += 1;
                                state.buy_attempts
                            };

                            if e.should_alert() {
                                self.notify_error(&e, "Buy execution").await;
                            }

                            if !e.is_retryable() || attempts >= config.max_buy_attempts {
                                error!(
                                    "Giving up after {} buy attempt(s): {}",
                                    attempts, e
                                );
                                self.set_phase(BotPhase::Failed).await;
                                return BotPhase::Failed;
                            }

                            let delay = backoff(config.retry_delay(), attempts);
                            warn!(
                                "Buy attempt {}/{} failed, retrying in {:?}",
                                attempts, config.max_buy_attempts, delay
                            );
                            self.set_phase(BotPhase::Monitoring).await;
                            sleep(delay).await;
                            continue;
                        }
                    }
                }
            }

            sleep(config.monitor_interval()).await;
        }
    }

    /// Warn once per high-gas episode
    async fn gas_too_high(&self, current: U256) {
        info!(
            "Waiting for better gas conditions: {:.4} gwei",
            wei_to_gwei(current)
        );

        let first = {
            let mut state = self.state.write().await;
            !std::mem::replace(&mut state.gas_warned, true)
        };
        if first {
            self.notify(BotEvent::GasWarning {
                current,
                max: self.gas.max_gas_price(),
            })
            .await;
        }
    }

    async fn finish_presale(&self, info: &PresaleInfo, assessment: &PresaleAssessment) {
        match assessment {
            PresaleAssessment::Ended => error!("Presale has ended"),
            _ => error!("Hard cap reached"),
        }
        self.set_phase(BotPhase::Ended).await;
        self.notify(BotEvent::PresaleEnded {
            total_raised: info.total_raised,
            hard_cap: info.hard_cap,
        })
        .await;
    }

    async fn read_presale(&self) -> BotResult<PresaleInfo> {
        crate::metrics::record_presale_poll();
        self.client.presale_info().await
    }

    /// Stop the bot
    pub async fn stop(&self) {
        info!("Stopping bot...");
        *self.shutdown.write().await = true;

        {
            let mut state = self.state.write().await;
            state.is_running = false;
            // Keep the outcome if the run already finished
            if !state.phase.is_final() {
                state.phase = BotPhase::Stopped;
                crate::metrics::record_phase(BotPhase::Stopped.code());
            }
        }

        self.notify(BotEvent::Shutdown).await;
    }

    /// Get bot status
    pub async fn status(&self) -> BotStatus {
        let state = self.state.read().await;
        BotStatus {
            session_id: self.session_id,
            is_running: state.is_running,
            phase: state.phase,
            wallet_address: self.client.wallet_address(),
            presale_address: self.client.presale_address(),
            last_transaction: state.history.last().cloned(),
            transaction_count: state.history.len(),
            buy_attempts: state.buy_attempts,
        }
    }

    pub async fn phase(&self) -> BotPhase {
        self.state.read().await.phase
    }

    async fn set_phase(&self, phase: BotPhase) {
        let mut state = self.state.write().await;
        if state.phase != phase {
            debug!("Phase {:?} -> {:?}", state.phase, phase);
            state.phase = phase;
            crate::metrics::record_phase(phase.code());
        }
    }

    async fn notify_error(&self, error: &BotError, context: &str) {
        self.notify(BotEvent::Error {
            error: error.to_string(),
            context: context.to_string(),
        })
        .await;
    }

    /// Deliver a notification; failures are logged only
    async fn notify(&self, event: BotEvent) {
        let message = event.render(Utc::now());
        if let Err(e) = self.notifier.send(&message).await {
            warn!("Failed to send {} notification: {}", event.name(), e);
        }
    }
}

fn now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}
