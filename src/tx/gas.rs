//! Gas estimation and fee optimization
//!
//! Every fee the bot attaches is capped by `gas.max_gas_price_wei`. When the
//! node cannot answer, the configured values are used instead so a buy is never
//! blocked on a flaky fee endpoint.

use crate::chain::{BlockSnapshot, ChainClient};
use crate::config::{GasConfig, GasPriceStrategy};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::U256;
use ethers::utils::format_units;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Block utilization above which conditions are considered congested
const CONGESTED_UTILIZATION_PERCENT: f64 = 80.0;

/// Gas price types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl GasPrice {
    /// Highest price per gas this fee could pay
    pub fn ceiling(&self) -> U256 {
        match self {
            GasPrice::Legacy(price) => *price,
            GasPrice::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }
}

/// Gas limit plus fees for one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasParams {
    pub gas_limit: U256,
    pub price: GasPrice,
}

/// Snapshot of network load taken from the latest block
#[derive(Debug, Clone, PartialEq)]
pub struct GasStats {
    pub block_number: u64,
    pub base_fee_gwei: f64,
    pub gas_used: U256,
    pub gas_limit: U256,
    /// Percent of the block gas limit used
    pub utilization: f64,
}

/// Fee optimizer for the buy transaction
pub struct GasOptimizer {
    client: Arc<dyn ChainClient>,
    config: GasConfig,
}

impl GasOptimizer {
    pub fn new(client: Arc<dyn ChainClient>, config: GasConfig) -> Self {
        Self { client, config }
    }

    pub fn max_gas_price(&self) -> U256 {
        U256::from(self.config.max_gas_price_wei)
    }

    fn priority_fee(&self) -> U256 {
        U256::from(self.config.priority_fee_wei)
    }

    /// Node gas price, or the configured ceiling if the node cannot answer
    pub async fn current_gas_price(&self) -> U256 {
        match self.client.gas_price().await {
            Ok(price) => {
                crate::metrics::record_gas_price(price);
                price
            }
            Err(e) => {
                warn!("Error getting gas price: {}", e);
                self.max_gas_price()
            }
        }
    }

    /// Check if gas price is acceptable
    pub fn is_acceptable(&self, gas_price: U256) -> bool {
        gas_price <= self.max_gas_price()
    }

    /// Fee parameters for the configured strategy, capped at the ceiling
    pub async fn fee_estimate(&self) -> GasPrice {
        match self.config.strategy {
            GasPriceStrategy::Legacy => {
                let price = self.current_gas_price().await;
                GasPrice::Legacy(price.min(self.max_gas_price()))
            }
            GasPriceStrategy::Eip1559 => match self.client.latest_block().await {
                Ok(BlockSnapshot {
                    base_fee_per_gas: Some(base_fee),
                    ..
                }) => self.eip1559_fees(base_fee),
                Ok(_) => {
                    warn!("Latest block has no base fee, using configured fees");
                    self.fallback_fees()
                }
                Err(e) => {
                    warn!("Error estimating EIP-1559 fees: {}", e);
                    self.fallback_fees()
                }
            },
        }
    }

    /// `max_fee = min(base_fee + priority, ceiling)`, priority never above max fee
    pub fn eip1559_fees(&self, base_fee: U256) -> GasPrice {
        let max_fee = base_fee
            .saturating_add(self.priority_fee())
            .min(self.max_gas_price());
        GasPrice::Eip1559 {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: self.priority_fee().min(max_fee),
        }
    }

    fn fallback_fees(&self) -> GasPrice {
        match self.config.strategy {
            GasPriceStrategy::Legacy => GasPrice::Legacy(self.max_gas_price()),
            GasPriceStrategy::Eip1559 => GasPrice::Eip1559 {
                max_fee_per_gas: self.max_gas_price(),
                max_priority_fee_per_gas: self.priority_fee().min(self.max_gas_price()),
            },
        }
    }

    /// Estimate gas for `tx` (plus buffer) and attach current fees
    pub async fn optimize(&self, tx: &TypedTransaction) -> GasParams {
        let gas_limit = match self.client.estimate_gas(tx).await {
            Ok(estimated) => {
                let buffer = estimated * self.config.gas_limit_buffer_percent / 100;
                estimated + buffer
            }
            Err(e) => {
                warn!(
                    "Error estimating gas, using configured limit {}: {}",
                    self.config.gas_limit, e
                );
                U256::from(self.config.gas_limit)
            }
        };

        let price = self.fee_estimate().await;
        debug!("Gas params: limit {} price {:?}", gas_limit, price);

        GasParams { gas_limit, price }
    }

    /// Fees for replacing a pending transaction.
    ///
    /// Each field is the larger of the fresh estimate and the previous value
    /// bumped by `replacement_bump_percent`, then capped at the ceiling.
    pub fn replacement(&self, previous: &GasPrice, fresh: &GasPrice) -> GasPrice {
        let bumped = bump(previous, self.config.replacement_bump_percent);
        let cap = self.max_gas_price();

        match (bumped, fresh) {
            (GasPrice::Legacy(old), GasPrice::Legacy(new)) => {
                GasPrice::Legacy(old.max(*new).min(cap))
            }
            (
                GasPrice::Eip1559 {
                    max_fee_per_gas: old_fee,
                    max_priority_fee_per_gas: old_tip,
                },
                GasPrice::Eip1559 {
                    max_fee_per_gas: new_fee,
                    max_priority_fee_per_gas: new_tip,
                },
            ) => {
                let max_fee = old_fee.max(*new_fee).min(cap);
                GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: old_tip.max(*new_tip).min(max_fee),
                }
            }
            // Strategy changed between attempts; the fresh estimate wins.
            _ => *fresh,
        }
    }

    /// Current network load, `None` if the latest block is unavailable
    pub async fn gas_stats(&self) -> Option<GasStats> {
        match self.client.latest_block().await {
            Ok(block) => Some(stats_from_block(&block)),
            Err(e) => {
                warn!("Error getting gas stats: {}", e);
                None
            }
        }
    }

    /// Base fee within the ceiling and the chain not congested
    pub fn is_favorable(&self, stats: &GasStats) -> bool {
        stats.base_fee_gwei <= wei_to_gwei(self.max_gas_price())
            && stats.utilization < CONGESTED_UTILIZATION_PERCENT
    }

    /// Poll the gas price until it is acceptable or `max_wait` elapses
    pub async fn wait_for_optimal_gas(&self, max_wait: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + max_wait;

        loop {
            let current = self.current_gas_price().await;
            if self.is_acceptable(current) {
                info!("Gas price optimal: {:.4} gwei", wei_to_gwei(current));
                return true;
            }

            if Instant::now() + poll > deadline {
                warn!("Timeout waiting for optimal gas price");
                return false;
            }

            info!(
                "Gas price too high: {:.4} gwei, waiting...",
                wei_to_gwei(current)
            );
            sleep(poll).await;
        }
    }

    /// Worst-case cost in wei of a transaction with these parameters
    pub fn transaction_cost(params: &GasParams) -> U256 {
        params.gas_limit.saturating_mul(params.price.ceiling())
    }
}

/// Scale every fee field by `percent`
pub fn bump(price: &GasPrice, percent: u64) -> GasPrice {
    match price {
        GasPrice::Legacy(price) => GasPrice::Legacy(*price * percent / 100),
        GasPrice::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => GasPrice::Eip1559 {
            max_fee_per_gas: *max_fee_per_gas * percent / 100,
            max_priority_fee_per_gas: *max_priority_fee_per_gas * percent / 100,
        },
    }
}

pub fn stats_from_block(block: &BlockSnapshot) -> GasStats {
    let utilization = if block.gas_limit.is_zero() {
        0.0
    } else {
        u256_to_f64(block.gas_used) / u256_to_f64(block.gas_limit) * 100.0
    };

    GasStats {
        block_number: block.number,
        base_fee_gwei: block.base_fee_per_gas.map(wei_to_gwei).unwrap_or_default(),
        gas_used: block.gas_used,
        gas_limit: block.gas_limit,
        utilization,
    }
}

pub fn wei_to_gwei(wei: U256) -> f64 {
    format_units(wei, "gwei")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(f64::MAX)
}

fn u256_to_f64(value: U256) -> f64 {
    value.to_string().parse().unwrap_or(f64::MAX)
}
