use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, UpdateKind};
use teloxide::utils::command::BotCommands;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::bot::{AppState, Command};
use crate::platform::{ChatTransport, DocumentInfo, IncomingMessage};

/// Convert a Telegram message into the platform-agnostic shape.
pub fn incoming_from_message(msg: &Message) -> IncomingMessage {
    let user = msg.from.as_ref();
    IncomingMessage {
        chat_id: msg.chat.id.0,
        user_id: user.map(|u| u.id.0),
        user_name: user.map(|u| u.first_name.clone()).unwrap_or_default(),
        text: msg.text().or_else(|| msg.caption()).map(str::to_string),
        document: msg.document().map(|doc| DocumentInfo {
            file_id: doc.file.id.0.clone(),
            file_name: doc.file_name.clone(),
            mime_type: doc.mime_type.as_ref().map(|m| m.essence_str().to_string()),
            size: u64::from(doc.file.size),
        }),
    }
}

/// Only new messages are handled; edits, callbacks and the rest are ignored.
pub fn incoming_from_update(update: &Update) -> Option<IncomingMessage> {
    match &update.kind {
        UpdateKind::Message(msg) => Some(incoming_from_message(msg)),
        _ => None,
    }
}

/// [`ChatTransport`] backed by the Telegram Bot API.
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .context("Failed to send Telegram message")?;
        Ok(())
    }

    async fn download(&self, file_id: &str, dest: &Path) -> Result<()> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .context("Failed to look up Telegram file")?;

        let mut dst = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to open {}", dest.display()))?;
        self.bot
            .download_file(&file.path, &mut dst)
            .await
            .context("Failed to download Telegram file")?;
        dst.flush().await?;
        Ok(())
    }
}

/// Fetch the bot's username and publish the command list.
pub async fn prepare(bot: &Bot) -> Result<Option<String>> {
    let me = bot.get_me().await.context("Failed to call getMe")?;
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register bot commands: {}", e);
    }
    Ok(me.user.username.clone())
}

pub async fn register_webhook(bot: &Bot, url: &str) -> Result<()> {
    let url = reqwest::Url::parse(url).context("Invalid public webhook URL")?;
    bot.set_webhook(url)
        .await
        .context("Failed to register Telegram webhook")?;
    info!("Telegram webhook registered");
    Ok(())
}

/// Run the long-polling dispatcher until Ctrl-C.
pub async fn run_polling(bot: Bot, state: Arc<AppState>) -> Result<()> {
    bot.delete_webhook()
        .await
        .context("Failed to delete webhook before polling")?;

    info!("Starting Telegram long polling...");

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    state.dispatch(incoming_from_message(&msg)).await;
    Ok(())
}
