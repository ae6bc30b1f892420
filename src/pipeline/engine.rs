//! Message pipeline - turns one inbound message into a text and voice reply.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{Config, TranscriberChoice, VoiceFormat};
use crate::pipeline::audio::{AudioError, AudioTarget, AudioTranscoder, Ffmpeg};
use crate::pipeline::llm::{self, ChatProvider, OpenAiCompatible, ProviderError};
use crate::pipeline::message::InboundMessage;
use crate::pipeline::scratch::{ScopedFile, ScratchSpace};
use crate::pipeline::telegram::{ChatError, ChatPlatform};
use crate::pipeline::transcribe::{NoTranscriber, Transcriber, Transcript, WhisperApi};
use crate::pipeline::tts::{self, AudioFormat, GOOGLE_TTS_BASE_URL, GoogleTts, SpeechSynthesizer};
use crate::pipeline::truncate;
use crate::pipeline::whisper::LocalWhisper;

pub const VOICE_NOT_FOUND: &str = "Voice not found.";
pub const DOWNLOAD_FAILED: &str = "Could not download your voice message.";
pub const AUDIO_PROCESSING_ERROR: &str = "Sorry, there was an audio processing error.";
pub const NOTHING_HEARD: &str = "I could not hear anything in that voice message.";

/// A failure the handler cannot absorb: the user got no answer.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Chat(#[from] ChatError),
}

/// Why a voice message could not be turned into speech-to-text input.
#[derive(Debug, Error)]
enum IntakeError {
    #[error("scratch file: {0}")]
    Scratch(#[from] std::io::Error),
    #[error(transparent)]
    Download(#[from] ChatError),
    #[error(transparent)]
    Convert(#[from] AudioError),
}

/// Why the best-effort voice reply was skipped.
#[derive(Debug, Error)]
enum VoiceError {
    #[error("synthesis failed: {0}")]
    Synthesis(#[from] ProviderError),
    #[error("scratch file: {0}")]
    Io(#[from] std::io::Error),
    #[error("transcoding failed: {0}")]
    Transcode(#[from] AudioError),
    #[error(transparent)]
    Send(#[from] ChatError),
}

/// Fatal problems while assembling the pipeline at startup.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no API key for the {0} provider")]
    MissingKey(String),
    #[error("{0}")]
    Whisper(String),
}

/// Tunables that do not belong to any collaborator.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub bot_name: String,
    pub tts_lang: String,
    pub voice_format: VoiceFormat,
}

/// Everything a handler invocation needs, built once at startup.
pub struct MessagePipeline {
    chat: Arc<dyn ChatPlatform>,
    llm: Arc<dyn ChatProvider>,
    stt: Arc<dyn Transcriber>,
    tts: Arc<dyn SpeechSynthesizer>,
    transcoder: Arc<dyn AudioTranscoder>,
    scratch: ScratchSpace,
    persona: String,
    settings: PipelineSettings,
}

impl MessagePipeline {
    pub fn new(
        chat: Arc<dyn ChatPlatform>,
        llm: Arc<dyn ChatProvider>,
        stt: Arc<dyn Transcriber>,
        tts: Arc<dyn SpeechSynthesizer>,
        transcoder: Arc<dyn AudioTranscoder>,
        scratch: ScratchSpace,
        settings: PipelineSettings,
    ) -> Self {
        let persona = llm::persona(&settings.bot_name);
        Self {
            chat,
            llm,
            stt,
            tts,
            transcoder,
            scratch,
            persona,
            settings,
        }
    }

    /// Wires the production collaborators selected by `config`.
    pub fn from_config(
        config: &Config,
        chat: Arc<dyn ChatPlatform>,
    ) -> Result<Self, BuildError> {
        let http = llm::http_client(config.request_timeout)?;

        let provider = OpenAiCompatible::from_config(config, http.clone())
            .ok_or_else(|| BuildError::MissingKey(config.provider.to_string()))?;
        info!("Chat provider: {} ({})", provider.name(), provider.model());

        let stt: Arc<dyn Transcriber> = match &config.transcriber {
            TranscriberChoice::OpenAi => {
                let key = config
                    .openai_api_key
                    .clone()
                    .ok_or_else(|| BuildError::MissingKey("openai".to_string()))?;
                Arc::new(WhisperApi::new(llm::OPENAI_BASE_URL, key, http.clone()))
            }
            TranscriberChoice::Whisper { model_path, language } => Arc::new(
                LocalWhisper::new(model_path, language.clone()).map_err(BuildError::Whisper)?,
            ),
            TranscriberChoice::Disabled => Arc::new(NoTranscriber),
        };
        info!("Transcriber: {}", stt.name());

        let tts = GoogleTts::new(GOOGLE_TTS_BASE_URL, http);
        let scratch = ScratchSpace::new(&config.scratch_dir);
        info!("Speech: {} ({:?})", tts.name(), config.voice_format);
        info!("Scratch dir: {}", scratch.dir().display());

        Ok(Self::new(
            chat,
            Arc::new(provider),
            stt,
            Arc::new(tts),
            Arc::new(Ffmpeg::new(&config.ffmpeg_path, config.request_timeout)),
            scratch,
            PipelineSettings {
                bot_name: config.bot_name.clone(),
                tts_lang: config.tts_lang.clone(),
                voice_format: config.voice_format,
            },
        ))
    }

    pub fn bot_name(&self) -> &str {
        &self.settings.bot_name
    }

    /// Answers a text message with a text reply and, if possible, a voice reply.
    pub async fn handle_text(&self, msg: &InboundMessage) -> Result<(), PipelineError> {
        let Some(prompt) = msg.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
            debug!("Ignoring empty text message {}", msg.message_id);
            return Ok(());
        };

        info!(
            "📨 Text from {} in chat {}: \"{}\"",
            msg.sender_display_name,
            msg.chat_id,
            truncate(prompt, 100)
        );
        self.respond(msg, prompt).await
    }

    /// Transcribes a voice message, echoes the transcript, then answers it
    /// like a text message.
    pub async fn handle_voice(&self, msg: &InboundMessage) -> Result<(), PipelineError> {
        let Some(voice) = msg.voice.as_ref() else {
            self.reply(msg, VOICE_NOT_FOUND).await?;
            return Ok(());
        };

        info!("🎤 Voice from {} in chat {}", msg.sender_display_name, msg.chat_id);

        let speech = match self.intake(msg, &voice.file_id).await {
            Ok(file) => file,
            Err(IntakeError::Download(e)) => {
                warn!("Voice download failed: {e}");
                self.reply(msg, DOWNLOAD_FAILED).await?;
                return Ok(());
            }
            Err(e) => {
                error!("Audio processing failed: {e}");
                self.reply(msg, AUDIO_PROCESSING_ERROR).await?;
                return Ok(());
            }
        };

        let transcript = self.stt.transcribe(speech.path()).await;
        speech.release();

        let transcript = match transcript {
            Ok(Transcript::Spoken(text)) if text.trim().is_empty() => {
                self.reply(msg, NOTHING_HEARD).await?;
                return Ok(());
            }
            Ok(t) => t,
            Err(e) => {
                warn!("Transcription via {} failed: {e}", self.stt.name());
                let text = format!("Sorry, I could not transcribe that ({e})");
                self.reply(msg, &text).await?;
                return Ok(());
            }
        };

        let prompt = transcript.as_str().trim();
        self.reply(msg, &format!("Transcribed: {prompt}")).await?;
        self.respond(msg, prompt).await
    }

    /// Answers /start and /help.
    pub async fn handle_command(&self, msg: &InboundMessage) -> Result<(), PipelineError> {
        debug!("Greeting {} in chat {}", msg.sender_display_name, msg.chat_id);
        self.reply(msg, &self.greeting(&msg.sender_display_name)).await?;
        Ok(())
    }

    /// Text shown for /start and /help.
    pub fn greeting(&self, name: &str) -> String {
        format!(
            "Namaste {name}! Main {}, aapka DevOps mentor hoon. \
             Mujhse text ya voice message mein kuch bhi poochho, \
             main text aur voice dono mein jawab dunga.",
            self.settings.bot_name
        )
    }

    /// Downloads the voice note and re-encodes it for speech-to-text. Scratch
    /// files are removed on every error path when they drop.
    async fn intake(&self, msg: &InboundMessage, file_id: &str) -> Result<ScopedFile, IntakeError> {
        let download = self.scratch.reserve("input", msg, "ogg")?;
        self.chat.download_file(file_id, download.path()).await?;

        let speech = self.scratch.reserve("speech", msg, "wav")?;
        self.transcoder
            .convert(download.path(), speech.path(), AudioTarget::SpeechInput)
            .await?;
        download.release();
        Ok(speech)
    }

    /// Steps shared by text and voice: chat reply, text send, voice send.
    async fn respond(&self, msg: &InboundMessage, prompt: &str) -> Result<(), PipelineError> {
        // A provider failure is answered, and spoken, like any other reply
        let answer = match self.llm.reply(&self.persona, prompt).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("{} reply failed: {e}", self.llm.name());
                format!("Sorry, I could not answer that right now ({e})")
            }
        };

        self.reply(msg, &answer).await?;
        if let Err(e) = self.voice_reply(msg, &answer).await {
            error!("Voice reply via {} failed: {e}", self.tts.name());
        }
        Ok(())
    }

    async fn reply(&self, msg: &InboundMessage, text: &str) -> Result<i32, ChatError> {
        self.chat.send_text(msg.chat_id, text, Some(msg.message_id)).await
    }

    async fn voice_reply(&self, msg: &InboundMessage, answer: &str) -> Result<(), VoiceError> {
        let audio = self
            .tts
            .synthesize(&tts::speakable(answer), &self.settings.tts_lang)
            .await?;

        let format = self.tts.format();
        let clip = self.scratch.reserve("voice", msg, format.extension())?;
        tokio::fs::write(clip.path(), &audio).await?;

        let clip = match (self.settings.voice_format, format) {
            (VoiceFormat::Opus, AudioFormat::Mp3) => {
                let note = self.scratch.reserve("voice", msg, AudioFormat::Opus.extension())?;
                let converted = self
                    .transcoder
                    .convert(clip.path(), note.path(), AudioTarget::VoiceNote)
                    .await;
                clip.release();
                converted?;
                note
            }
            _ => clip,
        };

        let sent = self.chat.send_voice(msg.chat_id, clip.path(), Some(msg.message_id)).await;
        clip.release();
        sent?;
        Ok(())
    }
}
