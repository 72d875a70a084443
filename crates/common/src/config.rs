use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Telegram bot token
    pub telegram_bot_token: String,

    /// Chat or channel the notifications are delivered to
    pub telegram_chat_id: String,

    /// Bot API base URL (default: https://api.telegram.org)
    pub telegram_api_url: String,

    /// Users allowed to drive the bot's command layer
    pub allowed_user_ids: Vec<i64>,

    /// Minimum spacing between two sends in milliseconds (default: 500)
    pub base_interval_ms: u64,

    /// How long the dispatcher waits for work before re-checking for a stop
    /// request, in milliseconds (default: same as `base_interval_ms`)
    pub idle_wait_ms: u64,

    /// HTTP request timeout for the Bot API in seconds (default: 30)
    pub request_timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_interval_ms: u64 = lookup("NOTIFIER_BASE_INTERVAL_MS")
            .unwrap_or_else(|| "500".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("NOTIFIER_BASE_INTERVAL_MS must be a valid u64"))?;

        let idle_wait_ms = match lookup("NOTIFIER_IDLE_WAIT_MS") {
            Some(raw) => raw
                .parse()
                .map_err(|_| anyhow::anyhow!("NOTIFIER_IDLE_WAIT_MS must be a valid u64"))?,
            None => base_interval_ms,
        };

        Ok(Self {
            telegram_bot_token: lookup("TELEGRAM_BOT_TOKEN")
                .ok_or_else(|| anyhow::anyhow!("TELEGRAM_BOT_TOKEN environment variable is required"))?,
            telegram_chat_id: lookup("TELEGRAM_CHAT_ID")
                .ok_or_else(|| anyhow::anyhow!("TELEGRAM_CHAT_ID environment variable is required"))?,
            telegram_api_url: lookup("TELEGRAM_API_URL")
                .unwrap_or_else(|| "https://api.telegram.org".to_string()),
            allowed_user_ids: parse_user_ids(
                &lookup("TELEGRAM_ALLOWED_USER_IDS").unwrap_or_default(),
            )?,
            base_interval_ms,
            idle_wait_ms,
            request_timeout_secs: lookup("NOTIFIER_REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("NOTIFIER_REQUEST_TIMEOUT_SECS must be a valid u64"))?,
        })
    }

    /// Whether `user_id` may use the bot's interactive commands.
    ///
    /// An empty allow-list admits nobody.
    pub fn is_user_allowed(&self, user_id: i64) -> bool {
        self.allowed_user_ids.contains(&user_id)
    }
}

fn parse_user_ids(raw: &str) -> anyhow::Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse()
                .map_err(|_| anyhow::anyhow!("invalid user id in TELEGRAM_ALLOWED_USER_IDS: {id}"))
        })
        .collect()
}
