//! Local speech-to-text using whisper-rs.
//!
//! Expects the 16 kHz mono WAV produced by the ffmpeg normalization step.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::llm::ProviderError;
use super::transcribe::{Transcriber, Transcript};
use super::truncate;

const SAMPLE_RATE: u32 = 16_000;

/// Whisper transcription engine.
pub struct LocalWhisper {
    ctx: Arc<WhisperContext>,
    language: String,
}

impl LocalWhisper {
    /// Load a Whisper model from a .bin file.
    pub fn new(model_path: &Path, language: impl Into<String>) -> Result<Self, String> {
        info!("Loading Whisper model from {:?}", model_path);

        if !model_path.exists() {
            return Err(format!("Model file not found: {:?}", model_path));
        }

        let ctx = WhisperContext::new_with_params(
            model_path.to_str().ok_or("Invalid model path")?,
            WhisperContextParameters::default(),
        )
        .map_err(|e| format!("Failed to load Whisper model: {e}"))?;

        info!("Whisper model loaded successfully");
        Ok(Self {
            ctx: Arc::new(ctx),
            language: language.into(),
        })
    }

    /// Runs the model over PCM samples. Blocks; call off the async runtime.
    pub fn transcribe_samples(&self, samples: &[f32]) -> Result<String, String> {
        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| format!("Failed to create Whisper state: {e}"))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(&self.language));
        params.set_translate(false);
        params.set_no_timestamps(true);
        params.set_single_segment(false);
        params.set_print_progress(false);

        state
            .full(params, samples)
            .map_err(|e| format!("Whisper transcription failed: {e}"))?;

        let mut text = String::new();
        for segment in state.as_iter() {
            if let Ok(s) = segment.to_str() {
                text.push_str(s);
                text.push(' ');
            }
        }

        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl Transcriber for LocalWhisper {
    fn name(&self) -> &'static str {
        "whisper-local"
    }

    async fn transcribe(&self, wav: &Path) -> Result<Transcript, ProviderError> {
        let samples = read_wav(wav).map_err(ProviderError::Parse)?;
        debug!("Transcribing {} samples", samples.len());

        let engine = Self {
            ctx: self.ctx.clone(),
            language: self.language.clone(),
        };
        let text = tokio::task::spawn_blocking(move || engine.transcribe_samples(&samples))
            .await?
            .map_err(ProviderError::Parse)?;

        info!("Transcribed: \"{}\"", truncate(&text, 100));
        Ok(Transcript::Spoken(text))
    }
}

/// Reads 16 kHz mono 16-bit WAV into f32 samples in [-1, 1).
pub fn read_wav(path: &Path) -> Result<Vec<f32>, String> {
    let mut reader = hound::WavReader::open(path).map_err(|e| format!("Failed to open WAV: {e}"))?;
    let spec = reader.spec();
    if spec.sample_rate != SAMPLE_RATE || spec.channels != 1 || spec.bits_per_sample != 16 {
        return Err(format!(
            "Unexpected WAV format: {} Hz, {} channel(s), {} bits",
            spec.sample_rate, spec.channels, spec.bits_per_sample
        ));
    }

    reader
        .samples::<i16>()
        .map(|s| s.map(|v| v as f32 / 32768.0))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("Failed to read WAV samples: {e}"))
}
