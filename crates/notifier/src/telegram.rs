//! Telegram Bot API delivery.
//!
//! Posts plain text to `sendMessage` and maps the Bot API reply onto
//! [`SendError`]: HTTP 429 or a `retry_after` hint means throttled, anything
//! else that is not `ok` is a plain failure.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use algomate_common::config::AppConfig;
use algomate_common::error::AppError;

use crate::sender::{MessageSender, SendError};

/// Wait applied when a 429 reply carries no `retry_after`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// `sendMessage` rejects longer texts with "message is too long".
pub const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Sends notifications to a single Telegram chat.
pub struct TelegramSender {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramSender {
    pub fn new(
        api_url: &str,
        bot_token: &str,
        chat_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        if bot_token.is_empty() {
            return Err(AppError::Config("Telegram bot token is empty".to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/bot{}/sendMessage", api_url.trim_end_matches('/'), bot_token),
            chat_id: chat_id.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::new(
            &config.telegram_api_url,
            &config.telegram_bot_token,
            config.telegram_chat_id.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Map a Bot API reply to a send outcome.
    fn classify(status: StatusCode, body: Option<ApiResponse>) -> Result<(), SendError> {
        let body = body.unwrap_or_default();
        let retry_after = body
            .parameters
            .as_ref()
            .and_then(|p| p.retry_after)
            .map(Duration::from_secs);

        if status.is_success() && body.ok {
            return Ok(());
        }

        if let Some(retry_after) = retry_after {
            return Err(SendError::Throttled { retry_after });
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SendError::Throttled {
                retry_after: DEFAULT_RETRY_AFTER,
            });
        }

        let description = body
            .description
            .unwrap_or_else(|| format!("unexpected reply from Bot API (HTTP {status})"));
        Err(SendError::Failed(description))
    }
}

impl MessageSender for TelegramSender {
    async fn send(&self, text: &str) -> Result<(), SendError> {
        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
        };

        // `without_url` keeps the bot token out of the error message
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| SendError::Failed(e.without_url().to_string()))?;

        let status = response.status();
        let body = response.json::<ApiResponse>().await.ok();

        Self::classify(status, body)
    }

    fn max_text_len(&self) -> Option<usize> {
        Some(MAX_MESSAGE_CHARS)
    }
}
