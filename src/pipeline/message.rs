//! Inbound chat events, reduced to what the pipeline needs.

use teloxide::types::Message;

/// Name used when Telegram gives us no sender name.
pub const DEFAULT_SENDER_NAME: &str = "Student";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Voice,
}

/// Handle to a voice note stored on Telegram's servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceRef {
    pub file_id: String,
}

/// A single user message, created per update and dropped after handling.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub message_id: i32,
    pub sender_display_name: String,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub voice: Option<VoiceRef>,
}

impl InboundMessage {
    pub fn text(
        chat_id: i64,
        message_id: i32,
        sender: Option<&str>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            chat_id,
            message_id,
            sender_display_name: display_name(sender),
            kind: MessageKind::Text,
            text: Some(text.into()),
            voice: None,
        }
    }

    pub fn voice(
        chat_id: i64,
        message_id: i32,
        sender: Option<&str>,
        voice: Option<VoiceRef>,
    ) -> Self {
        Self {
            chat_id,
            message_id,
            sender_display_name: display_name(sender),
            kind: MessageKind::Voice,
            text: None,
            voice,
        }
    }

    /// Converts a Telegram message. Anything carrying a voice note is a
    /// voice message; everything else is treated as text.
    pub fn from_telegram(msg: &Message) -> Self {
        let sender = msg.from.as_ref().map(|u| u.first_name.as_str());
        let chat_id = msg.chat.id.0;
        let message_id = msg.id.0;

        match msg.voice() {
            Some(voice) => Self::voice(
                chat_id,
                message_id,
                sender,
                Some(VoiceRef { file_id: voice.file.id.0.clone() }),
            ),
            None => Self::text(chat_id, message_id, sender, msg.text().unwrap_or_default()),
        }
    }
}

fn display_name(sender: Option<&str>) -> String {
    sender
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SENDER_NAME)
        .to_string()
}
