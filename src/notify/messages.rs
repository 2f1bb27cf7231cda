//! Operator-facing messages, rendered as Telegram HTML

use crate::chain::PresaleInfo;

use chrono::{DateTime, TimeZone, Utc};
use ethers::types::{Address, H256, U256};
use ethers::utils::{format_ether, format_units};

/// Characters of an address shown in messages
const SHORT_ADDRESS_LEN: usize = 10;

/// Everything the bot tells the operator about
#[derive(Debug, Clone, PartialEq)]
pub enum BotEvent {
    Startup {
        chain_id: u64,
        wallet: Address,
        buy_amount: U256,
        max_gas_price: U256,
    },
    Shutdown,
    PresaleStarting {
        info: PresaleInfo,
        wallet: Address,
        buy_amount: U256,
    },
    BuyAttempt {
        amount: U256,
        gas_price: U256,
        contract: Address,
    },
    BuySuccess {
        tx_hash: H256,
        amount: U256,
        tokens_received: U256,
        gas_used: U256,
    },
    BuyFailure {
        error: String,
        contract: Address,
    },
    GasWarning {
        current: U256,
        max: U256,
    },
    PresaleEnded {
        total_raised: U256,
        hard_cap: U256,
    },
    LowBalance {
        balance: U256,
        required: U256,
    },
    StatusUpdate {
        is_running: bool,
        wallet: Address,
        presale: Address,
        transaction_count: usize,
    },
    Error {
        error: String,
        context: String,
    },
}

impl BotEvent {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            BotEvent::Startup { .. } => "startup",
            BotEvent::Shutdown => "shutdown",
            BotEvent::PresaleStarting { .. } => "presale_starting",
            BotEvent::BuyAttempt { .. } => "buy_attempt",
            BotEvent::BuySuccess { .. } => "buy_success",
            BotEvent::BuyFailure { .. } => "buy_failure",
            BotEvent::GasWarning { .. } => "gas_warning",
            BotEvent::PresaleEnded { .. } => "presale_ended",
            BotEvent::LowBalance { .. } => "low_balance",
            BotEvent::StatusUpdate { .. } => "status_update",
            BotEvent::Error { .. } => "error",
        }
    }

    /// Render the event as a Telegram HTML message stamped with `now`
    pub fn render(&self, now: DateTime<Utc>) -> String {
        let time = now.format("%Y-%m-%d %H:%M:%S UTC");

        match self {
            BotEvent::Startup {
                chain_id,
                wallet,
                buy_amount,
                max_gas_price,
            } => format!(
                "🚀 <b>Presale Sniper Started</b>\n\n\
                 📋 <b>Configuration:</b>\n\
                 • Chain: {}\n\
                 • Wallet: <code>{}</code>\n\
                 • Investment: {} ETH\n\
                 • Max Gas: {} gwei\n\n\
                 ⏰ Time: {}\n\n\
                 ✅ Bot is now monitoring presale conditions",
                chain_id,
                short_address(wallet),
                eth(*buy_amount),
                gwei(*max_gas_price),
                time
            ),
            BotEvent::Shutdown => format!(
                "🛑 <b>Presale Sniper Stopped</b>\n\n\
                 ⏰ Time: {}\n\n\
                 👋 Bot monitoring has been stopped",
                time
            ),
            BotEvent::PresaleStarting {
                info,
                wallet,
                buy_amount,
            } => format!(
                "🚀 <b>Presale Starting!</b>\n\n\
                 📋 <b>Presale Details:</b>\n\
                 • Token: <code>{:?}</code>\n\
                 • Start: {}\n\
                 • End: {}\n\
                 • Soft Cap: {} ETH\n\
                 • Hard Cap: {} ETH\n\n\
                 💰 <b>Bot Status:</b>\n\
                 • Wallet: <code>{}</code>\n\
                 • Investment: {} ETH\n\
                 • Monitoring: ✅ Active\n\n\
                 ⏰ Time: {}",
                info.token,
                timestamp(info.start_time),
                timestamp(info.end_time),
                eth(info.soft_cap),
                eth(info.hard_cap),
                short_address(wallet),
                eth(*buy_amount),
                time
            ),
            BotEvent::BuyAttempt {
                amount,
                gas_price,
                contract,
            } => format!(
                "🔄 <b>Buy Attempt</b>\n\n\
                 💰 <b>Transaction Details:</b>\n\
                 • Amount: {} ETH\n\
                 • Gas Price: {} gwei\n\
                 • Contract: <code>{}</code>\n\n\
                 ⏰ Time: {}",
                eth(*amount),
                gwei(*gas_price),
                short_address(contract),
                time
            ),
            BotEvent::BuySuccess {
                tx_hash,
                amount,
                tokens_received,
                gas_used,
            } => format!(
                "✅ <b>Buy Success!</b>\n\n\
                 💰 <b>Transaction Details:</b>\n\
                 • TX Hash: <code>{:?}</code>\n\
                 • ETH Spent: {} ETH\n\
                 • Tokens Received: {}\n\
                 • Gas Used: {}\n\n\
                 ⏰ Time: {}\n\n\
                 🎉 <b>Presale participation successful!</b>",
                tx_hash,
                eth(*amount),
                format_ether(*tokens_received),
                gas_used,
                time
            ),
            BotEvent::BuyFailure { error, contract } => format!(
                "❌ <b>Buy Failed</b>\n\n\
                 🔍 <b>Error Details:</b>\n\
                 • Error: {}\n\
                 • Contract: <code>{}</code>\n\n\
                 ⏰ Time: {}\n\n\
                 ⚠️ Bot will retry automatically",
                escape_html(error),
                short_address(contract),
                time
            ),
            BotEvent::GasWarning { current, max } => format!(
                "⛽ <b>Gas Price Warning</b>\n\n\
                 💰 <b>Gas Details:</b>\n\
                 • Current: {} gwei\n\
                 • Max Allowed: {} gwei\n\
                 • Status: ⏳ Waiting for better conditions\n\n\
                 ⏰ Time: {}",
                gwei(*current),
                gwei(*max),
                time
            ),
            BotEvent::PresaleEnded {
                total_raised,
                hard_cap,
            } => format!(
                "🏁 <b>Presale Ended</b>\n\n\
                 📊 <b>Final Stats:</b>\n\
                 • Total Raised: {} ETH\n\
                 • Hard Cap: {} ETH\n\
                 • Filled: {}\n\n\
                 ⏰ Time: {}",
                eth(*total_raised),
                eth(*hard_cap),
                if total_raised >= hard_cap { "✅" } else { "❌" },
                time
            ),
            BotEvent::LowBalance { balance, required } => format!(
                "⚠️ <b>Low Balance Warning</b>\n\n\
                 💰 <b>Balance Details:</b>\n\
                 • Current: {} ETH\n\
                 • Required: {} ETH\n\
                 • Shortage: {} ETH\n\n\
                 ⏰ Time: {}\n\n\
                 💡 Please add more ETH to your wallet",
                eth(*balance),
                eth(*required),
                eth(required.saturating_sub(*balance)),
                time
            ),
            BotEvent::StatusUpdate {
                is_running,
                wallet,
                presale,
                transaction_count,
            } => format!(
                "🤖 <b>Bot Status Update</b>\n\n\
                 📊 <b>Current Status:</b>\n\
                 • Running: {}\n\
                 • Wallet: <code>{}</code>\n\
                 • Presale: <code>{}</code>\n\
                 • Transactions: {}\n\n\
                 ⏰ Time: {}",
                if *is_running { "✅" } else { "❌" },
                short_address(wallet),
                short_address(presale),
                transaction_count,
                time
            ),
            BotEvent::Error { error, context } => format!(
                "🚨 <b>Bot Error</b>\n\n\
                 ❌ <b>Error:</b> {}\n\
                 📝 <b>Context:</b> {}\n\n\
                 ⏰ Time: {}\n\n\
                 🔧 Bot will attempt to recover automatically",
                escape_html(error),
                if context.is_empty() {
                    "No additional context".to_string()
                } else {
                    escape_html(context)
                },
                time
            ),
        }
    }
}

/// `0x` plus the first eight hex digits, followed by an ellipsis
pub fn short_address(address: &Address) -> String {
    let full = format!("{:?}", address);
    format!("{}...", &full[..SHORT_ADDRESS_LEN])
}

fn eth(wei: U256) -> String {
    trim_decimals(format_ether(wei))
}

fn gwei(wei: U256) -> String {
    format_units(wei, "gwei")
        .map(trim_decimals)
        .unwrap_or_else(|_| wei.to_string())
}

fn trim_decimals(value: String) -> String {
    if !value.contains('.') {
        return value;
    }
    let trimmed = value.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

fn timestamp(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}

/// Escape text for Telegram's HTML parse mode
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
