//! Text-to-speech using Google Translate's speech endpoint.
//!
//! This is the service gTTS wraps: it accepts at most 100 characters per
//! request and returns MP3, so long replies are split into chunks whose
//! MP3 frames are concatenated.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};

use super::llm::ProviderError;
use super::truncate;

pub const GOOGLE_TTS_BASE_URL: &str = "https://translate.google.com";

/// Longest text the endpoint accepts in one request.
pub const MAX_CHUNK_CHARS: usize = 100;

static CLAUSE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?;:,।\n]+\s*").unwrap());
static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```[A-Za-z0-9_+-]*").unwrap());
static MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[`*#>~|]+").unwrap());
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Opus,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Opus => "ogg",
        }
    }
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Container of the bytes `synthesize` returns.
    fn format(&self) -> AudioFormat;

    async fn synthesize(&self, text: &str, lang: &str) -> Result<Vec<u8>, ProviderError>;
}

/// TTS client for the Google Translate speech endpoint.
pub struct GoogleTts {
    base_url: String,
    http: reqwest::Client,
}

impl GoogleTts {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    async fn fetch_chunk(
        &self,
        chunk: &str,
        lang: &str,
        idx: usize,
        total: usize,
    ) -> Result<Vec<u8>, ProviderError> {
        let total = total.to_string();
        let idx = idx.to_string();
        let textlen = chunk.chars().count().to_string();

        let response = self
            .http
            .get(format!("{}/translate_tts", self.base_url))
            .query(&[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("tl", lang),
                ("q", chunk),
                ("total", total.as_str()),
                ("idx", idx.as_str()),
                ("textlen", textlen.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleTts {
    fn name(&self) -> &'static str {
        "google-translate"
    }

    fn format(&self) -> AudioFormat {
        AudioFormat::Mp3
    }

    async fn synthesize(&self, text: &str, lang: &str) -> Result<Vec<u8>, ProviderError> {
        info!("TTS: \"{}\"", truncate(text, 50));

        let chunks = split_for_speech(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(ProviderError::Empty);
        }

        let mut audio = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let part = self.fetch_chunk(chunk, lang, idx, chunks.len()).await?;
            debug!("Chunk {}/{}: {} bytes", idx + 1, chunks.len(), part.len());
            audio.extend_from_slice(&part);
        }

        if audio.is_empty() {
            return Err(ProviderError::Empty);
        }

        info!("Generated {} bytes of voice audio", audio.len());
        Ok(audio)
    }
}

/// Removes markdown markup that would otherwise be read aloud.
pub fn speakable(text: &str) -> String {
    let text = CODE_FENCE.replace_all(text, " ");
    let text = MARKUP.replace_all(&text, "");
    let text = SPACES.replace_all(&text, " ");
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Splits `text` into pieces of at most `max` characters, preferring clause
/// boundaries, then whitespace, then arbitrary character positions.
pub fn split_for_speech(text: &str, max: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for m in CLAUSE_END.find_iter(text) {
        pieces.push(&text[start..m.end()]);
        start = m.end();
    }
    pieces.push(&text[start..]);

    let mut chunks = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        for word_chunk in split_long(piece.trim(), max) {
            let joined_len = current.chars().count() + word_chunk.chars().count() + 1;
            if !current.is_empty() && joined_len > max {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&word_chunk);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Breaks one clause into pieces of at most `max` characters at whitespace,
/// hard-splitting words that are longer than `max` on their own.
fn split_long(piece: &str, max: usize) -> Vec<String> {
    if piece.chars().count() <= max {
        return if piece.is_empty() { vec![] } else { vec![piece.to_string()] };
    }

    let mut out = Vec::new();
    let mut current = String::new();
    for word in piece.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > max {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = word.chars().collect();
            for part in chars.chunks(max) {
                out.push(part.iter().collect());
            }
            continue;
        }
        let joined_len = current.chars().count() + word_len + 1;
        if !current.is_empty() && joined_len > max {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}
