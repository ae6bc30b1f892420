//! Message pipeline - answers Telegram text and voice messages with an AI
//! reply in text and speech.

pub mod audio;
pub mod engine;
pub mod llm;
pub mod message;
pub mod scratch;
pub mod telegram;
pub mod transcribe;
pub mod tts;
pub mod whisper;

#[cfg(test)]
mod tests;

pub use engine::{MessagePipeline, PipelineError, PipelineSettings};
pub use message::{InboundMessage, MessageKind, VoiceRef};
pub use telegram::{ChatPlatform, TelegramClient};

/// Cuts `s` to at most `max` characters for log previews.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    }
}
