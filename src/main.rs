//! Presale Sniper - buys into a token presale the moment it opens
//!
//! Watches a presale contract, waits for it to become active with acceptable
//! gas, submits a single buy and reports progress to Telegram.

use anyhow::Result;
use std::fs::OpenOptions;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod api;
mod bot;
mod chain;
mod config;
mod error;
mod metrics;
mod notify;
mod tx;

use bot::{BotParams, PresaleBot};
use chain::{ChainClient, ChainProvider, EthersClient};
use config::{LoggingConfig, Settings};
use notify::{Notifier, TelegramNotifier};

#[tokio::main]
async fn main() -> Result<()> {
    // Secrets may live in a local .env file
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging
    init_logging(&settings.logging)?;

    info!("Starting Presale Sniper v{}", env!("CARGO_PKG_VERSION"));

    // Initialize chain access
    let provider = ChainProvider::new(&settings.network)?;
    info!(
        "Configured {} RPC endpoint(s) for chain {}",
        provider.endpoint_count(),
        provider.chain_id()
    );
    if !provider.health_check().await {
        warn!("Initial RPC health check failed on every endpoint");
    }

    let client: Arc<dyn ChainClient> = Arc::new(EthersClient::new(
        provider,
        &settings.private_key()?,
        settings.presale_address()?,
    )?);
    info!("Wallet: {:?}", client.wallet_address());
    info!("Presale: {:?}", client.presale_address());

    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(&settings.telegram)?);

    let bot = Arc::new(PresaleBot::new(
        client,
        notifier,
        BotParams::from_settings(&settings)?,
    ));

    // Start API server
    let api_handle = if settings.api.enabled {
        info!(
            "API server: http://{}:{}",
            settings.api.host, settings.api.port
        );
        Some(tokio::spawn({
            let config = settings.api.clone();
            let bot = bot.clone();
            async move {
                if let Err(e) = api::run_server(config, bot).await {
                    error!("API server error: {}", e);
                }
            }
        }))
    } else {
        None
    };

    info!("Presale Sniper is running");

    let completed = tokio::select! {
        completed = bot.run() => completed,
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping...");
            false
        }
    };

    // Graceful shutdown
    bot.stop().await;
    if let Some(h) = api_handle {
        h.abort();
    }

    let status = bot.status().await;
    if completed {
        info!(
            "Presale purchase completed: {:?}",
            status.last_transaction.map(|t| t.tx_hash)
        );
    } else {
        warn!("Presale Sniper finished without a purchase ({:?})", status.phase);
    }

    info!("Presale Sniper stopped");
    Ok(())
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,presale_sniper=debug,hyper=warn"));

    let (console, json) = if config.json {
        (None, Some(fmt::layer().json().with_target(true)))
    } else {
        (
            Some(fmt::layer().with_target(true).with_thread_ids(true)),
            None,
        )
    };

    let file = match &config.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(json)
        .with(file)
        .try_init()?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
