use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Read when no config path is given on the command line, if it exists.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// How updates reach the bot.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BotMode {
    #[default]
    Webhook,
    Polling,
}

impl std::fmt::Display for BotMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotMode::Webhook => write!(f, "webhook"),
            BotMode::Polling => write!(f, "polling"),
        }
    }
}

impl std::str::FromStr for BotMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webhook" => Ok(BotMode::Webhook),
            "polling" => Ok(BotMode::Polling),
            other => anyhow::bail!("Unknown bot mode '{}' (expected webhook or polling)", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Empty means every user is served.
    #[serde(default)]
    pub allowed_user_ids: Vec<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default)]
    pub mode: BotMode,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public base URL; when set in webhook mode the webhook is registered on startup.
    #[serde(default)]
    pub public_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadsConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Where downloads are staged; the system temp dir when unset.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_key_path() -> PathBuf {
    PathBuf::from("key.json")
}

fn default_endpoint() -> String {
    "https://indexing.googleapis.com/v3/urlNotifications:publish".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    16
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: BotMode::default(),
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            key_path: default_key_path(),
            endpoint: default_endpoint(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            max_file_bytes: default_max_file_bytes(),
            temp_dir: None,
        }
    }
}

impl Config {
    /// Load the TOML file, then apply process environment overrides.
    ///
    /// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_PATH`] is
    /// read if present and defaults are used otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_file_if_exists(Path::new(DEFAULT_CONFIG_PATH))?,
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file_if_exists(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Environment variables win over the file: TELEGRAM_TOKEN, KEY_PATH, PORT,
    /// BOT_MODE and PUBLIC_URL.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("TELEGRAM_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(key_path) = get("KEY_PATH") {
            self.indexing.key_path = PathBuf::from(key_path);
        }
        if let Some(port) = get("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT value: {}", port))?;
        }
        if let Some(mode) = get("BOT_MODE") {
            self.server.mode = mode.parse()?;
        }
        if let Some(url) = get("PUBLIC_URL") {
            self.server.public_url = Some(url);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("Telegram bot token is not set (TELEGRAM_TOKEN or [telegram] bot_token)");
        }
        if self.uploads.workers == 0 {
            anyhow::bail!("[uploads] workers must be at least 1");
        }
        if self.uploads.queue_capacity == 0 {
            anyhow::bail!("[uploads] queue_capacity must be at least 1");
        }
        Ok(())
    }

    /// True when `user_id` may use the bot.
    pub fn is_user_allowed(&self, user_id: Option<u64>) -> bool {
        if self.telegram.allowed_user_ids.is_empty() {
            return true;
        }
        user_id.is_some_and(|id| self.telegram.allowed_user_ids.contains(&id))
    }

    /// Full public webhook URL, when a public base URL is configured.
    pub fn webhook_url(&self) -> Option<String> {
        self.server.public_url.as_ref().map(|base| {
            format!(
                "{}/webhook/{}",
                base.trim_end_matches('/'),
                self.telegram.bot_token
            )
        })
    }
}
