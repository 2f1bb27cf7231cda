//! RPC provider with multi-endpoint support and automatic failover

use crate::config::NetworkConfig;
use crate::error::{BotError, BotResult};

use ethers::providers::{Http, Middleware, Provider};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Expected chain ID
    chain_id: u64,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new provider from the network section
    pub fn new(config: &NetworkConfig) -> BotResult<Self> {
        let mut http_providers = Vec::new();

        for url in config.rpc_urls.iter().filter(|u| !u.trim().is_empty()) {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(500));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(BotError::ChainConnection(
                "No valid RPC providers".to_string(),
            ));
        }

        Ok(Self {
            chain_id: config.chain_id,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        if self.http_providers.len() < 2 {
            return;
        }
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain_id, next);
    }

    /// Run a read against the active provider, failing over on error.
    ///
    /// Every endpoint is tried once before giving up.
    pub async fn read<T, F, Fut>(&self, what: &str, op: F) -> BotResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ethers::providers::ProviderError>>,
    {
        let mut last_error = None;

        for _ in 0..self.http_providers.len() {
            match op(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("Failed to {} on chain {}: {}", what, self.chain_id, e);
                    last_error = Some(e.to_string());
                    self.failover();
                }
            }
        }

        Err(BotError::ChainConnection(format!(
            "All providers failed to {}: {}",
            what,
            last_error.unwrap_or_default()
        )))
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> BotResult<u64> {
        self.read("get block number", |p| async move {
            p.get_block_number().await.map(|b| b.as_u64())
        })
        .await
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        self.get_block_number().await.is_ok()
    }

    /// Configured chain ID
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Number of configured endpoints
    pub fn endpoint_count(&self) -> usize {
        self.http_providers.len()
    }
}
