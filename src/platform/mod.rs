pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// A message received from the chat platform, stripped to what the bot uses.
#[derive(Debug, Clone, Default)]
pub struct IncomingMessage {
    /// Platform-specific chat ID replies go to
    pub chat_id: i64,
    /// Sender, absent for channel posts
    pub user_id: Option<u64>,
    /// Display name of the user
    pub user_name: String,
    /// Message text, or the caption of an attachment
    pub text: Option<String>,
    pub document: Option<DocumentInfo>,
}

/// Metadata of an attached document. Nothing is downloaded until a worker asks.
#[derive(Debug, Clone, Default)]
pub struct DocumentInfo {
    pub file_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub size: u64,
}

impl DocumentInfo {
    /// Plain text by MIME type, or by a `.txt` name when no MIME type was sent.
    pub fn is_plain_text(&self) -> bool {
        match self.mime_type.as_deref() {
            Some(mime) => mime
                .split(';')
                .next()
                .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("text/plain")),
            None => self
                .file_name
                .as_deref()
                .is_some_and(|name| name.to_ascii_lowercase().ends_with(".txt")),
        }
    }
}

/// Outbound side of the chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;

    /// Download the file behind `file_id` into `dest`, replacing its contents.
    async fn download(&self, file_id: &str, dest: &Path) -> Result<()>;
}
