use std::sync::Arc;

use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};

use crate::batch::{self, BatchReport, SubmitOutcome, NO_URLS_MESSAGE, TELEGRAM_MESSAGE_LIMIT};
use crate::config::Config;
use crate::indexing::Indexer;
use crate::platform::{ChatTransport, DocumentInfo, IncomingMessage};
use crate::uploads::{EnqueueError, UploadJob, UploadQueue, UploadTicket, SHUTTING_DOWN_MESSAGE};

pub const USAGE_SUBMIT: &str = "❌ Usage: /submit https://your-url.com";
pub const REJECT_NON_TEXT: &str = "❌ Only plain-text (.txt) files are supported.";
pub const FILE_RECEIVED: &str = "📥 File received, processing...";
pub const QUEUE_BUSY: &str = "❌ Too many files are being processed, try again later.";

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Commands:")]
pub enum Command {
    #[command(description = "show the welcome message.")]
    Start,
    #[command(description = "show this help.")]
    Help,
    #[command(description = "submit one URL: /submit https://your-url.com")]
    Submit(String),
    #[command(description = "submit many URLs, one per line below the command.")]
    SubmitAll(String),
}

impl Command {
    /// Parse a command line. `Submit` carries everything after the command,
    /// `SubmitAll` carries the lines below the first one.
    ///
    /// Returns `None` for plain text, unknown commands, and commands
    /// addressed to a different bot (`/submit@OtherBot`).
    pub fn from_text(text: &str, bot_username: Option<&str>) -> Option<Self> {
        let text = text.trim_start();
        let rest_of_text = text.strip_prefix('/')?;

        let token_end = rest_of_text
            .find(char::is_whitespace)
            .unwrap_or(rest_of_text.len());
        let (token, args) = rest_of_text.split_at(token_end);

        let name = match token.split_once('@') {
            Some((name, target)) => {
                if let Some(me) = bot_username {
                    if !target.eq_ignore_ascii_case(me) {
                        return None;
                    }
                }
                name
            }
            None => token,
        };

        match name.to_ascii_lowercase().as_str() {
            "start" => Some(Command::Start),
            "help" => Some(Command::Help),
            "submit" => Some(Command::Submit(args.trim().to_string())),
            "submitall" => {
                let body = text.split_once('\n').map(|(_, body)| body).unwrap_or("");
                Some(Command::SubmitAll(body.to_string()))
            }
            _ => None,
        }
    }
}

pub fn help_text() -> String {
    Command::descriptions().to_string()
}

pub fn start_text() -> String {
    format!(
        "Hello! Send me URLs and I'll submit them to the Google Indexing API.\n\
         You can also upload a .txt file with one URL per line.\n\n{}",
        help_text()
    )
}

/// `/submit <url>`: exactly one argument, one publish call.
pub async fn submit_reply(indexer: &dyn Indexer, args: &str) -> String {
    let mut parts = args.split_whitespace();
    let (Some(url), None) = (parts.next(), parts.next()) else {
        return USAGE_SUBMIT.to_string();
    };

    match batch::submit_one(indexer, url).await {
        SubmitOutcome::Submitted { url, response } => {
            format!("✅ Submitted URL: {}\n📬 Response: {}", url, response)
        }
        SubmitOutcome::Failed { error, .. } => format!("❌ Error: {}", error),
    }
}

/// `/submitall` with one URL per line of `body`.
pub async fn submit_all_reply(indexer: &dyn Indexer, body: &str) -> String {
    let urls = batch::parse_url_lines(body);
    if urls.is_empty() {
        return NO_URLS_MESSAGE.to_string();
    }

    let outcomes = batch::submit_batch(indexer, &urls).await;
    let report = BatchReport::from_outcomes(&outcomes);
    info!(
        "Batch of {} URL(s): {} submitted, {} failed",
        urls.len(),
        report.submitted,
        report.failed()
    );
    report.render()
}

/// Checks an attachment before anything is downloaded.
pub fn check_document(document: &DocumentInfo, max_bytes: u64) -> Result<(), String> {
    if !document.is_plain_text() {
        return Err(REJECT_NON_TEXT.to_string());
    }
    if document.size > max_bytes {
        return Err(format!("❌ File is too large (limit is {} bytes).", max_bytes));
    }
    Ok(())
}

/// Per-process bot state, built once in `main` and shared by reference.
pub struct AppState {
    pub config: Config,
    /// Username of this bot, used to ignore commands aimed at other bots.
    pub bot_username: Option<String>,
    indexer: Arc<dyn Indexer>,
    transport: Arc<dyn ChatTransport>,
    uploads: UploadQueue,
}

impl AppState {
    /// Starts the upload workers, so this needs a running Tokio runtime.
    pub fn new(
        config: Config,
        bot_username: Option<String>,
        indexer: Arc<dyn Indexer>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        let uploads = UploadQueue::start(&config.uploads, indexer.clone(), transport.clone());
        Self {
            config,
            bot_username,
            indexer,
            transport,
            uploads,
        }
    }

    pub async fn shutdown(&self) {
        self.uploads.shutdown().await;
    }

    /// Entry point for the update sources. Upload outcomes are logged in the
    /// background once a worker is done with the file.
    pub async fn dispatch(&self, msg: IncomingMessage) {
        if let Some(ticket) = self.handle_message(msg).await {
            ticket.log_when_done();
        }
    }

    /// Handle one inbound message to completion. Uploaded files are only
    /// queued; the returned ticket resolves when a worker is done with them.
    pub async fn handle_message(&self, msg: IncomingMessage) -> Option<UploadTicket> {
        if !self.config.is_user_allowed(msg.user_id) {
            warn!(
                "Ignoring message from unauthorized user {:?} ({})",
                msg.user_id, msg.user_name
            );
            return None;
        }

        if let Some(document) = msg.document {
            info!(
                "Document from {} ({:?}): {:?} {:?}",
                msg.user_name, msg.user_id, document.file_name, document.mime_type
            );
            return self.accept_document(msg.chat_id, document).await;
        }

        let text = msg.text.as_deref()?;
        let command = Command::from_text(text, self.bot_username.as_deref())?;

        info!(
            "Command from {} ({:?}): {:?}",
            msg.user_name, msg.user_id, command
        );

        let reply = match command {
            Command::Start => start_text(),
            Command::Help => help_text(),
            Command::Submit(args) => submit_reply(self.indexer.as_ref(), &args).await,
            Command::SubmitAll(body) => submit_all_reply(self.indexer.as_ref(), &body).await,
        };
        self.reply(msg.chat_id, &reply).await;
        None
    }

    async fn accept_document(&self, chat_id: i64, document: DocumentInfo) -> Option<UploadTicket> {
        if let Err(rejection) = check_document(&document, self.config.uploads.max_file_bytes) {
            self.reply(chat_id, &rejection).await;
            return None;
        }

        let slot = match self.uploads.reserve().await {
            Ok(slot) => slot,
            Err(EnqueueError::Full) => {
                warn!("Upload queue full, rejecting file from chat {}", chat_id);
                self.reply(chat_id, QUEUE_BUSY).await;
                return None;
            }
            Err(EnqueueError::Closed) => {
                self.reply(chat_id, SHUTTING_DOWN_MESSAGE).await;
                return None;
            }
        };

        // Acknowledge while the job is still invisible to the workers.
        self.reply(chat_id, FILE_RECEIVED).await;
        Some(slot.submit(UploadJob { chat_id, document }))
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        let text = batch::truncate_message(text, TELEGRAM_MESSAGE_LIMIT);
        if let Err(e) = self.transport.send_text(chat_id, &text).await {
            error!("Failed to send reply to chat {}: {:#}", chat_id, e);
        }
    }
}
