//! Service configuration.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tapper_core::RewardConfig;

/// Default Telegram Bot API base URL.
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Default channel whose subscription is rewarded.
pub const DEFAULT_TELEGRAM_CHANNEL: &str = "talentsy_official";

/// Default keyword for the keyword task.
pub const DEFAULT_KEYWORD: &str = "talentsy";

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/tapper").
    pub data_dir: String,

    /// PostgreSQL URL. When set, PostgreSQL is used instead of `RocksDB`.
    pub database_url: Option<String>,

    /// Key the trusted gateway presents in `X-Api-Key`.
    pub gateway_api_key: Option<String>,

    /// Key for admin endpoints (`X-Admin-Key`).
    pub admin_api_key: Option<String>,

    /// Telegram bot token used for membership checks (optional).
    pub telegram_bot_token: Option<String>,

    /// Telegram Bot API base URL.
    pub telegram_api_url: String,

    /// Channel username, without the leading `@`.
    pub telegram_channel: String,

    /// Expected answer of the keyword task.
    pub keyword: String,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Interval of the snapshot poller in milliseconds.
    pub snapshot_poll_interval_ms: u64,

    /// Point values and the daily tap cap.
    pub rewards: RewardConfig,
}

/// Telegram secrets file structure.
#[derive(Debug, Deserialize)]
struct TelegramSecrets {
    bot_token: String,
    #[serde(default)]
    api_url: Option<String>,
    #[serde(default)]
    channel: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let telegram = load_telegram_secrets();
        let defaults = RewardConfig::default();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/tapper".into()),
            database_url: std::env::var("DATABASE_URL").ok(),
            gateway_api_key: std::env::var("GATEWAY_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            telegram_bot_token: telegram.bot_token,
            telegram_api_url: telegram
                .api_url
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.into()),
            telegram_channel: telegram
                .channel
                .unwrap_or_else(|| DEFAULT_TELEGRAM_CHANNEL.into())
                .trim_start_matches('@')
                .to_string(),
            keyword: std::env::var("KEYWORD").unwrap_or_else(|_| DEFAULT_KEYWORD.into()),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_or("MAX_BODY_BYTES", 64 * 1024),
            request_timeout_seconds: env_or("REQUEST_TIMEOUT_SECONDS", 30),
            snapshot_poll_interval_ms: env_or("SNAPSHOT_POLL_INTERVAL_MS", 2_000),
            rewards: RewardConfig {
                tap_points: env_or("TAP_POINTS", defaults.tap_points),
                daily_tap_cap: env_or("DAILY_TAP_CAP", defaults.daily_tap_cap),
                quiz_points: env_or("QUIZ_POINTS", defaults.quiz_points),
                keyword_points: env_or("KEYWORD_POINTS", defaults.keyword_points),
                subscription_points: env_or("SUBSCRIPTION_POINTS", defaults.subscription_points),
                referral_points: env_or("REFERRAL_POINTS", defaults.referral_points),
            },
        }
    }

    /// Snapshot poll interval as a `Duration`.
    #[must_use]
    pub const fn snapshot_poll_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_poll_interval_ms)
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Telegram settings resolved from file or environment.
struct TelegramSettings {
    bot_token: Option<String>,
    api_url: Option<String>,
    channel: Option<String>,
}

/// Load Telegram secrets from file or environment.
fn load_telegram_secrets() -> TelegramSettings {
    let secret_paths = [
        ".secrets/telegram.json",
        "tapper/.secrets/telegram.json",
        "../.secrets/telegram.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<TelegramSecrets>(path) {
            tracing::info!(path = %path, "Loaded Telegram secrets from file");
            return TelegramSettings {
                bot_token: Some(secrets.bot_token),
                api_url: secrets
                    .api_url
                    .or_else(|| std::env::var("TELEGRAM_API_URL").ok()),
                channel: secrets
                    .channel
                    .or_else(|| std::env::var("TELEGRAM_CHANNEL").ok()),
            };
        }
    }

    tracing::debug!("Telegram secrets file not found, using environment variables");
    TelegramSettings {
        bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok(),
        api_url: std::env::var("TELEGRAM_API_URL").ok(),
        channel: std::env::var("TELEGRAM_CHANNEL").ok(),
    }
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/tapper".into(),
            database_url: None,
            gateway_api_key: None,
            admin_api_key: None,
            telegram_bot_token: None,
            telegram_api_url: DEFAULT_TELEGRAM_API_URL.into(),
            telegram_channel: DEFAULT_TELEGRAM_CHANNEL.into(),
            keyword: DEFAULT_KEYWORD.into(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 64 * 1024,
            request_timeout_seconds: 30,
            snapshot_poll_interval_ms: 2_000,
            rewards: RewardConfig::default(),
        }
    }
}
