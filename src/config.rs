//! Configuration management for the presale sniper
//!
//! Loads configuration from a TOML file with environment variable substitution.

use anyhow::{Context, Result};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use ethers::utils::parse_ether;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub network: NetworkConfig,
    pub wallet: WalletConfig,
    pub presale: PresaleConfig,
    #[serde(default)]
    pub gas: GasConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// RPC endpoints in failover order
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Name of the environment variable holding the private key
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresaleConfig {
    pub contract_address: String,
    /// Amount of ETH to commit to the presale
    pub buy_amount_eth: f64,
    /// ETH kept on top of the buy amount to pay for gas
    #[serde(default = "default_gas_reserve_eth")]
    pub gas_reserve_eth: f64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Copy)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GasConfig {
    pub strategy: GasPriceStrategy,
    /// Hard ceiling for gas price and max fee per gas, in wei
    pub max_gas_price_wei: u64,
    /// Gas limit used when estimation fails
    pub gas_limit: u64,
    pub priority_fee_wei: u64,
    pub gas_limit_buffer_percent: u64,
    /// Fee multiplier (percent) applied when replacing a pending transaction
    pub replacement_bump_percent: u64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            strategy: GasPriceStrategy::Eip1559,
            max_gas_price_wei: 100_000_000,
            gas_limit: 500_000,
            priority_fee_wei: 1_000_000_000,
            gas_limit_buffer_percent: 20,
            replacement_bump_percent: 125,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub monitor_interval_secs: u64,
    pub retry_delay_ms: u64,
    /// Attempts to get a single signed transaction accepted by the node
    pub max_send_retries: u32,
    /// Buy attempts before the bot gives up on the presale
    pub max_buy_attempts: u32,
    pub min_confirmations: u64,
    pub receipt_timeout_secs: u64,
    pub receipt_poll_ms: u64,
    pub gas_wait_timeout_secs: u64,
    pub gas_poll_secs: u64,
    /// Seconds before the presale start at which preparation kicks in
    pub prestart_window_secs: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            monitor_interval_secs: 5,
            retry_delay_ms: 2_000,
            max_send_retries: 3,
            max_buy_attempts: 5,
            min_confirmations: 1,
            receipt_timeout_secs: 300,
            receipt_poll_ms: 2_000,
            gas_wait_timeout_secs: 30,
            gas_poll_secs: 10,
            prestart_window_secs: 60,
        }
    }
}

impl BotConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn receipt_poll(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

impl TelegramConfig {
    /// Token and chat id, if both are present and non-empty
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let token = self.bot_token.as_deref().filter(|t| !t.trim().is_empty())?;
        let chat = self.chat_id.as_deref().filter(|c| !c.trim().is_empty())?;
        Some((token, chat))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 9090,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
    pub file: Option<PathBuf>,
}

fn default_chain_id() -> u64 {
    42161
}

fn default_private_key_env() -> String {
    "PRIVATE_KEY".to_string()
}

fn default_gas_reserve_eth() -> f64 {
    0.01
}

impl Settings {
    /// Load settings from the configuration file
    pub fn load() -> Result<Self> {
        let config_path = env::var("PRESALE_SNIPER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.network.rpc_urls.iter().all(|u| u.trim().is_empty()) {
            anyhow::bail!("At least one RPC URL must be configured");
        }

        let mut missing = Vec::new();
        if self.private_key().is_err() {
            missing.push(self.wallet.private_key_env.as_str());
        }
        if self.wallet.address.trim().is_empty() {
            missing.push("wallet.address");
        }
        if self.presale.contract_address.trim().is_empty() {
            missing.push("presale.contract_address");
        }
        if !missing.is_empty() {
            anyhow::bail!("Missing required configuration: {}", missing.join(", "));
        }

        let wallet_address = self.wallet_address()?;
        self.presale_address()?;

        let wallet: LocalWallet = self
            .private_key()?
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid private key: {}", e))?;
        if wallet.address() != wallet_address {
            anyhow::bail!(
                "Wallet address {:?} does not match private key address {:?}",
                wallet_address,
                wallet.address()
            );
        }

        if self.presale.buy_amount_eth <= 0.0 {
            anyhow::bail!("presale.buy_amount_eth must be positive");
        }
        if self.presale.gas_reserve_eth < 0.0 {
            anyhow::bail!("presale.gas_reserve_eth must not be negative");
        }
        if self.gas.max_gas_price_wei == 0 {
            anyhow::bail!("gas.max_gas_price_wei must be positive");
        }
        if self.gas.replacement_bump_percent < 110 {
            tracing::warn!(
                "gas.replacement_bump_percent = {} is below the 110% most nodes require",
                self.gas.replacement_bump_percent
            );
        }
        if self.telegram.credentials().is_none() {
            tracing::warn!("Telegram credentials missing - notifications will be disabled");
        }

        Ok(())
    }

    /// Read the private key from the configured environment variable
    pub fn private_key(&self) -> Result<String> {
        env::var(&self.wallet.private_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .with_context(|| format!("{} is not set", self.wallet.private_key_env))
    }

    pub fn wallet_address(&self) -> Result<Address> {
        self.wallet
            .address
            .trim()
            .parse()
            .with_context(|| format!("Invalid wallet address: {}", self.wallet.address))
    }

    pub fn presale_address(&self) -> Result<Address> {
        self.presale
            .contract_address
            .trim()
            .parse()
            .with_context(|| {
                format!(
                    "Invalid presale contract address: {}",
                    self.presale.contract_address
                )
            })
    }

    /// Configured buy amount in wei
    pub fn buy_amount_wei(&self) -> Result<U256> {
        eth_to_wei(self.presale.buy_amount_eth)
    }

    /// Configured gas reserve in wei
    pub fn gas_reserve_wei(&self) -> Result<U256> {
        eth_to_wei(self.presale.gas_reserve_eth)
    }
}

fn eth_to_wei(amount: f64) -> Result<U256> {
    parse_ether(amount).with_context(|| format!("Invalid ETH amount: {}", amount))
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static regex");

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// Anvil's first dev account
    pub const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    pub const TEST_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
    pub const TEST_PRESALE: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    pub fn sample_toml(key_env: &str) -> String {
        format!(
            r#"
[network]
rpc_urls = ["http://127.0.0.1:8545"]

[wallet]
private_key_env = "{key_env}"
address = "{TEST_ADDRESS}"

[presale]
contract_address = "{TEST_PRESALE}"
buy_amount_eth = 0.1
"#
        )
    }

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn loads_with_defaults() {
        env::set_var("SNIPER_TEST_KEY_DEFAULTS", TEST_KEY);
        let settings = Settings::from_toml_str(&sample_toml("SNIPER_TEST_KEY_DEFAULTS")).unwrap();

        assert_eq!(settings.network.chain_id, 42161);
        assert_eq!(settings.gas.max_gas_price_wei, 100_000_000);
        assert_eq!(settings.gas.strategy, GasPriceStrategy::Eip1559);
        assert_eq!(settings.bot.max_send_retries, 3);
        assert_eq!(settings.bot.monitor_interval(), Duration::from_secs(5));
        assert_eq!(
            settings.buy_amount_wei().unwrap(),
            U256::from(100_000_000_000_000_000u64)
        );
        assert_eq!(
            settings.gas_reserve_wei().unwrap(),
            U256::from(10_000_000_000_000_000u64)
        );
        assert!(settings.telegram.credentials().is_none());
    }

    #[test]
    fn rejects_missing_private_key() {
        let err = Settings::from_toml_str(&sample_toml("SNIPER_TEST_KEY_UNSET")).unwrap_err();
        assert!(err.to_string().contains("SNIPER_TEST_KEY_UNSET"));
    }

    #[test]
    fn rejects_mismatched_wallet_address() {
        env::set_var("SNIPER_TEST_KEY_MISMATCH", TEST_KEY);
        let toml = sample_toml("SNIPER_TEST_KEY_MISMATCH").replace(
            TEST_ADDRESS,
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
        );
        let err = Settings::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn empty_telegram_values_disable_notifications() {
        env::set_var("SNIPER_TEST_KEY_TG", TEST_KEY);
        let toml = format!(
            "{}\n[telegram]\nbot_token = \"${{SNIPER_TG_TOKEN_UNSET}}\"\nchat_id = \"42\"\n",
            sample_toml("SNIPER_TEST_KEY_TG")
        );
        let settings = Settings::from_toml_str(&toml).unwrap();
        assert!(settings.telegram.credentials().is_none());
    }

    #[test]
    fn loads_from_file() {
        env::set_var("SNIPER_TEST_KEY_FILE", TEST_KEY);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{}\n[bot]\nmax_buy_attempts = 9\n",
            sample_toml("SNIPER_TEST_KEY_FILE")
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.bot.max_buy_attempts, 9);
        assert_eq!(settings.bot.min_confirmations, 1);
    }
}
