//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Presale polling and phase
//! - Buy attempts and transaction outcomes
//! - Gas price and wallet balance

use ethers::types::U256;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};

use crate::tx::wei_to_gwei;

lazy_static! {
    // Presale metrics
    pub static ref PRESALE_POLLS: Counter = register_counter!(
        "presale_sniper_presale_polls_total",
        "Total presale state reads"
    ).unwrap();

    pub static ref BOT_PHASE: Gauge = register_gauge!(
        "presale_sniper_phase",
        "Current bot phase (0=idle .. 8=stopped)"
    ).unwrap();

    // Buy metrics
    pub static ref BUY_ATTEMPTS: CounterVec = register_counter_vec!(
        "presale_sniper_buy_attempts_total",
        "Buy attempts by result",
        &["result"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: Counter = register_counter!(
        "presale_sniper_transactions_submitted_total",
        "Total transactions broadcast, replacements included"
    ).unwrap();

    pub static ref TX_CONFIRMED: Counter = register_counter!(
        "presale_sniper_transactions_confirmed_total",
        "Total transactions confirmed with success status"
    ).unwrap();

    pub static ref TX_FAILED: Counter = register_counter!(
        "presale_sniper_transactions_failed_total",
        "Total transactions reverted, dropped or timed out"
    ).unwrap();

    pub static ref TX_LATENCY: Histogram = register_histogram!(
        "presale_sniper_transaction_latency_seconds",
        "Time from broadcast to confirmation",
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    // Network metrics
    pub static ref GAS_PRICE_GWEI: Gauge = register_gauge!(
        "presale_sniper_gas_price_gwei",
        "Last gas price reported by the node"
    ).unwrap();

    pub static ref WALLET_BALANCE: Gauge = register_gauge!(
        "presale_sniper_wallet_balance_eth",
        "Wallet balance in ETH"
    ).unwrap();
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_presale_poll() {
    PRESALE_POLLS.inc();
}

pub fn record_phase(code: u8) {
    BOT_PHASE.set(f64::from(code));
}

pub fn record_buy_attempt(result: &str) {
    BUY_ATTEMPTS.with_label_values(&[result]).inc();
}

pub fn record_tx_submitted() {
    TX_SUBMITTED.inc();
}

pub fn record_tx_confirmed() {
    TX_CONFIRMED.inc();
}

pub fn record_tx_failed() {
    TX_FAILED.inc();
}

pub fn record_tx_latency(latency_secs: f64) {
    TX_LATENCY.observe(latency_secs);
}

pub fn record_gas_price(price: U256) {
    GAS_PRICE_GWEI.set(wei_to_gwei(price));
}

pub fn record_wallet_balance(balance_eth: f64) {
    WALLET_BALANCE.set(balance_eth);
}
