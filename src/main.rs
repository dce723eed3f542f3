mod batch;
mod bot;
mod config;
mod indexing;
mod platform;
mod server;
mod uploads;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::AppState;
use crate::config::{BotMode, Config, DEFAULT_CONFIG_PATH};
use crate::indexing::GoogleIndexer;
use crate::platform::telegram::{self, TelegramTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before the filter is built so RUST_LOG can come from it
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,indexbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Ok(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let shown_path = config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    info!("Loading configuration from: {}", shown_path.display());
    let config = Config::load(config_path.as_deref())
        .with_context(|| format!("Failed to load config from {}", shown_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Mode: {}", config.server.mode);
    info!("  Key file: {}", config.indexing.key_path.display());
    info!("  Upload workers: {}", config.uploads.workers);
    info!("  Allowed users: {:?}", config.telegram.allowed_user_ids);

    let bot = teloxide::Bot::new(&config.telegram.bot_token);
    let bot_username = telegram::prepare(&bot).await?;
    info!("  Bot username: {:?}", bot_username);

    let indexer = Arc::new(GoogleIndexer::new(&config.indexing)?);
    let transport = Arc::new(TelegramTransport::new(bot.clone()));
    let mode = config.server.mode;
    let webhook_url = config.webhook_url();

    // Create shared state
    let state = Arc::new(AppState::new(config, bot_username, indexer, transport));

    let result = match mode {
        BotMode::Webhook => {
            match webhook_url {
                Some(url) => telegram::register_webhook(&bot, &url).await?,
                None => warn!("No public_url configured; the webhook must be registered manually"),
            }
            server::serve(state.clone(), shutdown_signal()).await
        }
        BotMode::Polling => telegram::run_polling(bot, state.clone()).await,
    };

    state.shutdown().await;
    info!("Bot stopped");
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
