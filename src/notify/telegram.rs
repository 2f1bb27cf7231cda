//! Telegram Bot API notifier

use super::Notifier;
use crate::config::TelegramConfig;
use crate::error::{BotError, BotResult};

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

/// Sends messages through `sendMessage`; a no-op without credentials
pub struct TelegramNotifier {
    http: Client,
    endpoint: Option<String>,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> BotResult<Self> {
        Self::with_base_url(config, TELEGRAM_API_URL)
    }

    /// Notifier against a custom API host
    pub fn with_base_url(config: &TelegramConfig, base_url: &str) -> BotResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BotError::Notification(format!("Failed to build HTTP client: {}", e)))?;

        let (endpoint, chat_id) = match config.credentials() {
            Some((token, chat_id)) => {
                info!("Telegram notifications enabled");
                (
                    Some(format!(
                        "{}/bot{}/sendMessage",
                        base_url.trim_end_matches('/'),
                        token
                    )),
                    chat_id.to_string(),
                )
            }
            None => {
                warn!("Telegram notifications disabled - missing bot token or chat ID");
                (None, String::new())
            }
        };

        Ok(Self {
            http,
            endpoint,
            chat_id,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str) -> BotResult<()> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            debug!("Telegram disabled, dropping message");
            return Ok(());
        };

        let payload = SendMessage {
            chat_id: &self.chat_id,
            text: message,
            parse_mode: "HTML",
        };

        let response = self
            .http
            .post(endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BotError::Notification(format!("Request error: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let error_text = response.text().await.unwrap_or_default();
        Err(BotError::Notification(format!(
            "Telegram API error {}: {}",
            status, error_text
        )))
    }
}
