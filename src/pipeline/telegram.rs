//! Telegram client using teloxide.

use std::path::Path;

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, MessageId, ReplyParameters};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Telegram rejects messages longer than this many characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Error)]
#[error("failed to {action}: {detail}")]
pub struct ChatError {
    pub action: &'static str,
    pub detail: String,
}

impl ChatError {
    pub fn new(action: &'static str, detail: impl ToString) -> Self {
        Self {
            action,
            detail: detail.to_string(),
        }
    }
}

/// What the pipeline needs from a chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Sends `text`, returning the id of the last message sent.
    async fn send_text(&self, chat_id: i64, text: &str, reply_to: Option<i32>)
    -> Result<i32, ChatError>;

    /// Sends the audio file at `clip` as a voice message.
    async fn send_voice(&self, chat_id: i64, clip: &Path, reply_to: Option<i32>)
    -> Result<i32, ChatError>;

    /// Downloads a remote file into `dest`, returning the number of bytes written.
    async fn download_file(&self, file_id: &str, dest: &Path) -> Result<u64, ChatError>;
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatPlatform for TelegramClient {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i32>,
    ) -> Result<i32, ChatError> {
        let mut last_id = None;
        for (i, part) in split_message(text, MAX_MESSAGE_CHARS).into_iter().enumerate() {
            let mut request = self.bot.send_message(ChatId(chat_id), part);
            // Only the first part quotes the user's message
            if i == 0
                && let Some(msg_id) = reply_to
            {
                request = request.reply_parameters(ReplyParameters::new(MessageId(msg_id)));
            }

            let sent = request.await.map_err(|e| {
                let err = ChatError::new("send message", e);
                warn!("{}", err);
                err
            })?;
            last_id = Some(sent.id.0);
        }

        last_id.ok_or_else(|| ChatError::new("send message", "message text is empty"))
    }

    async fn send_voice(
        &self,
        chat_id: i64,
        clip: &Path,
        reply_to: Option<i32>,
    ) -> Result<i32, ChatError> {
        info!("🔊 Sending voice to chat {} ({})", chat_id, clip.display());

        let mut request = self.bot.send_voice(ChatId(chat_id), InputFile::file(clip));
        if let Some(msg_id) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(MessageId(msg_id)));
        }

        request.await.map(|msg| msg.id.0).map_err(|e| {
            let err = ChatError::new("send voice", e);
            warn!("{}", err);
            err
        })
    }

    async fn download_file(&self, file_id: &str, dest: &Path) -> Result<u64, ChatError> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| ChatError::new("get file info", e))?;

        let mut out = tokio::fs::File::create(dest)
            .await
            .map_err(|e| ChatError::new("create download file", e))?;
        self.bot
            .download_file(&file.path, &mut out)
            .await
            .map_err(|e| ChatError::new("download file", e))?;
        out.flush().await.map_err(|e| ChatError::new("write download file", e))?;

        let size = out
            .metadata()
            .await
            .map(|m| m.len())
            .map_err(|e| ChatError::new("stat download file", e))?;

        info!("📥 Downloaded voice ({} bytes)", size);
        Ok(size)
    }
}

/// Splits `text` into consecutive parts of at most `max` characters.
pub fn split_message(text: &str, max: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(max.max(1)).map(|c| c.iter().collect()).collect()
}
