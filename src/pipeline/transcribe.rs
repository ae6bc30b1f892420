//! Speech-to-text providers.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use tracing::info;

use super::llm::ProviderError;
use super::truncate;

/// Sent in place of a transcript when no speech-to-text is configured.
pub const PLACEHOLDER_TRANSCRIPT: &str =
    "(voice transcription is not available, please type your question)";

const WHISPER_MODEL: &str = "whisper-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcript {
    Spoken(String),
    /// The provider cannot transcribe; not an error.
    Placeholder,
}

impl Transcript {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Spoken(text) => text,
            Self::Placeholder => PLACEHOLDER_TRANSCRIPT,
        }
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transcribes a 16 kHz mono WAV file.
    async fn transcribe(&self, wav: &Path) -> Result<Transcript, ProviderError>;
}

/// Used when the deployment has no speech-to-text capability.
pub struct NoTranscriber;

#[async_trait]
impl Transcriber for NoTranscriber {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn transcribe(&self, _wav: &Path) -> Result<Transcript, ProviderError> {
        Ok(Transcript::Placeholder)
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// OpenAI's hosted Whisper endpoint.
pub struct WhisperApi {
    base_url: String,
    api_key: Secret<String>,
    http: reqwest::Client,
}

impl WhisperApi {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Secret<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http,
        }
    }
}

#[async_trait]
impl Transcriber for WhisperApi {
    fn name(&self) -> &'static str {
        "openai-whisper"
    }

    async fn transcribe(&self, wav: &Path) -> Result<Transcript, ProviderError> {
        let audio = tokio::fs::read(wav)
            .await
            .map_err(|e| ProviderError::Http(format!("failed to read {}: {e}", wav.display())))?;

        let file = Part::bytes(audio)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        let form = Form::new().part("file", file).text("model", WHISPER_MODEL);

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let text = parsed.text.trim().to_string();
        info!("Transcribed: \"{}\"", truncate(&text, 100));
        Ok(Transcript::Spoken(text))
    }
}
