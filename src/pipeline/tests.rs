//! Behavioral tests for the message pipeline.
//!
//! Every collaborator is replaced by a recording mock so the tests can check
//! call order, what the user sees, and that no scratch file survives a handler.
//!
//! Run with: cargo test pipeline

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use super::audio::{AudioError, AudioTarget, AudioTranscoder};
use super::engine::{AUDIO_PROCESSING_ERROR, DOWNLOAD_FAILED, NOTHING_HEARD, VOICE_NOT_FOUND};
use super::llm::{ChatProvider, ProviderError};
use super::scratch::ScratchSpace;
use super::telegram::{ChatError, ChatPlatform};
use super::transcribe::{NoTranscriber, PLACEHOLDER_TRANSCRIPT, Transcriber, Transcript};
use super::tts::{AudioFormat, SpeechSynthesizer};
use super::*;
use crate::config::VoiceFormat;

const ANSWER: &str = "kubectl Kubernetes ka command line tool hai.";

// =============================================================================
// MOCKS
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Download(String),
    Convert(AudioTarget),
    Transcribe,
    ChatReply(String),
    Text(String),
    Synthesize(String),
    Voice(PathBuf),
}

#[derive(Default)]
struct Log {
    events: Mutex<Vec<Event>>,
}

impl Log {
    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn texts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Text(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    fn voices(&self) -> Vec<PathBuf> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Voice(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|&e| pred(e)).count()
    }
}

struct MockChat {
    log: Arc<Log>,
    fail_text: bool,
    fail_voice: bool,
    fail_download: bool,
}

#[async_trait]
impl ChatPlatform for MockChat {
    async fn send_text(
        &self,
        _chat_id: i64,
        text: &str,
        _reply_to: Option<i32>,
    ) -> Result<i32, ChatError> {
        self.log.push(Event::Text(text.to_string()));
        if self.fail_text {
            return Err(ChatError::new("send message", "Forbidden: bot was blocked by the user"));
        }
        Ok(1000)
    }

    async fn send_voice(
        &self,
        _chat_id: i64,
        clip: &Path,
        _reply_to: Option<i32>,
    ) -> Result<i32, ChatError> {
        assert!(clip.exists(), "voice clip must exist while it is being sent");
        self.log.push(Event::Voice(clip.to_path_buf()));
        if self.fail_voice {
            return Err(ChatError::new("send voice", "Bad Request: VOICE_MESSAGES_FORBIDDEN"));
        }
        Ok(1001)
    }

    async fn download_file(&self, file_id: &str, dest: &Path) -> Result<u64, ChatError> {
        self.log.push(Event::Download(file_id.to_string()));
        if self.fail_download {
            return Err(ChatError::new("download file", "connection reset"));
        }
        std::fs::write(dest, b"OggS fake opus").unwrap();
        Ok(14)
    }
}

struct MockLlm {
    log: Arc<Log>,
    answer: Option<String>,
}

#[async_trait]
impl ChatProvider for MockLlm {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn reply(&self, persona: &str, prompt: &str) -> Result<String, ProviderError> {
        assert!(persona.starts_with("You are DevOpsGuru"));
        self.log.push(Event::ChatReply(prompt.to_string()));
        match &self.answer {
            Some(a) => Ok(a.clone()),
            None => Err(ProviderError::Api {
                status: 503,
                body: "upstream down".to_string(),
            }),
        }
    }
}

#[derive(Clone)]
enum SttOutcome {
    Spoken(&'static str),
    Fail,
}

struct MockStt {
    log: Arc<Log>,
    outcome: SttOutcome,
}

#[async_trait]
impl Transcriber for MockStt {
    fn name(&self) -> &'static str {
        "mock-stt"
    }

    async fn transcribe(&self, wav: &Path) -> Result<Transcript, ProviderError> {
        assert!(wav.exists(), "normalized audio must exist during transcription");
        self.log.push(Event::Transcribe);
        match self.outcome {
            SttOutcome::Spoken(text) => Ok(Transcript::Spoken(text.to_string())),
            SttOutcome::Fail => Err(ProviderError::Http("timed out".to_string())),
        }
    }
}

struct MockTts {
    log: Arc<Log>,
    fail: bool,
}

#[async_trait]
impl SpeechSynthesizer for MockTts {
    fn name(&self) -> &'static str {
        "mock-tts"
    }

    fn format(&self) -> AudioFormat {
        AudioFormat::Mp3
    }

    async fn synthesize(&self, text: &str, lang: &str) -> Result<Vec<u8>, ProviderError> {
        assert_eq!(lang, "hi");
        self.log.push(Event::Synthesize(text.to_string()));
        if self.fail {
            return Err(ProviderError::Api {
                status: 429,
                body: "Too Many Requests".to_string(),
            });
        }
        Ok(b"ID3 fake mp3".to_vec())
    }
}

struct MockTranscoder {
    log: Arc<Log>,
    fail: bool,
}

#[async_trait]
impl AudioTranscoder for MockTranscoder {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        target: AudioTarget,
    ) -> Result<(), AudioError> {
        assert!(input.exists(), "transcoder input must exist");
        self.log.push(Event::Convert(target));
        if self.fail {
            return Err(AudioError::Failed {
                status: "exit status: 1".to_string(),
                stderr: "Invalid data found when processing input".to_string(),
            });
        }
        std::fs::write(output, b"converted").unwrap();
        Ok(())
    }
}

// =============================================================================
// HARNESS
// =============================================================================

struct Setup {
    answer: Option<&'static str>,
    stt: Option<SttOutcome>,
    tts_fails: bool,
    transcoder_fails: bool,
    fail_text: bool,
    fail_voice: bool,
    fail_download: bool,
    voice_format: VoiceFormat,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            answer: Some(ANSWER),
            stt: Some(SttOutcome::Spoken("docker kya hai?")),
            tts_fails: false,
            transcoder_fails: false,
            fail_text: false,
            fail_voice: false,
            fail_download: false,
            voice_format: VoiceFormat::Mp3,
        }
    }
}

struct Harness {
    log: Arc<Log>,
    scratch: TempDir,
    pipeline: MessagePipeline,
}

impl Harness {
    fn new(setup: Setup) -> Self {
        let log = Arc::new(Log::default());
        let scratch = tempfile::tempdir().unwrap();

        let stt: Arc<dyn Transcriber> = match setup.stt {
            Some(outcome) => Arc::new(MockStt { log: log.clone(), outcome }),
            None => Arc::new(NoTranscriber),
        };

        let pipeline = MessagePipeline::new(
            Arc::new(MockChat {
                log: log.clone(),
                fail_text: setup.fail_text,
                fail_voice: setup.fail_voice,
                fail_download: setup.fail_download,
            }),
            Arc::new(MockLlm {
                log: log.clone(),
                answer: setup.answer.map(str::to_string),
            }),
            stt,
            Arc::new(MockTts { log: log.clone(), fail: setup.tts_fails }),
            Arc::new(MockTranscoder { log: log.clone(), fail: setup.transcoder_fails }),
            ScratchSpace::new(scratch.path()),
            PipelineSettings {
                bot_name: "DevOpsGuru".to_string(),
                tts_lang: "hi".to_string(),
                voice_format: setup.voice_format,
            },
        );

        Self { log, scratch, pipeline }
    }

    fn scratch_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.scratch.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    fn assert_no_leftovers(&self) {
        let left = self.scratch_files();
        assert!(left.is_empty(), "scratch files leaked: {left:?}");
        for clip in self.log.voices() {
            assert!(!clip.exists(), "voice clip {clip:?} still exists");
        }
    }
}

fn text_msg(text: &str) -> InboundMessage {
    InboundMessage::text(4242, 77, Some("Asha"), text)
}

fn voice_msg() -> InboundMessage {
    InboundMessage::voice(
        4242,
        78,
        Some("Ravi"),
        Some(VoiceRef { file_id: "AwACAgIAAxkBAAIB".to_string() }),
    )
}

// =============================================================================
// TEXT MESSAGES
// =============================================================================

mod text_messages {
    use super::*;

    #[tokio::test]
    async fn test_reply_then_voice() {
        let h = Harness::new(Setup::default());
        h.pipeline.handle_text(&text_msg("kubectl kya hota hai?")).await.unwrap();

        let events = h.log.events();
        assert_eq!(events.len(), 4, "unexpected events: {events:?}");
        assert_eq!(events[0], Event::ChatReply("kubectl kya hota hai?".to_string()));
        assert_eq!(events[1], Event::Text(ANSWER.to_string()));
        assert_eq!(events[2], Event::Synthesize(ANSWER.to_string()));
        assert!(matches!(events[3], Event::Voice(_)));
        h.assert_no_leftovers();
    }

    #[tokio::test]
    async fn test_exactly_one_text_before_any_voice_step() {
        let h = Harness::new(Setup::default());
        h.pipeline.handle_text(&text_msg("helm chart kya hai?")).await.unwrap();

        let events = h.log.events();
        let first_voice_step = events
            .iter()
            .position(|e| matches!(e, Event::Synthesize(_) | Event::Voice(_)))
            .unwrap();
        let texts_before = events[..first_voice_step]
            .iter()
            .filter(|e| matches!(e, Event::Text(_)))
            .count();
        assert_eq!(texts_before, 1);
        assert_eq!(h.log.count(|e| matches!(e, Event::Text(_))), 1);
    }

    #[tokio::test]
    async fn test_kubectl_scenario_sends_text_and_voice_once() {
        let h = Harness::new(Setup::default());
        let result = h.pipeline.handle_text(&text_msg("kubectl kya hota hai?")).await;

        assert!(result.is_ok());
        assert_eq!(h.log.texts(), vec![ANSWER]);
        assert_eq!(h.log.voices().len(), 1);
        let clip = &h.log.voices()[0];
        let name = clip.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("voice_4242_77_"));
        assert!(name.ends_with(".mp3"));
    }

    #[tokio::test]
    async fn test_tts_failure_keeps_text_reply() {
        let h = Harness::new(Setup { tts_fails: true, ..Setup::default() });
        let result = h.pipeline.handle_text(&text_msg("kubectl kya hota hai?")).await;

        assert!(result.is_ok());
        assert_eq!(h.log.texts().len(), 1);
        assert!(h.log.voices().is_empty());
        let events = h.log.events();
        let text_at = events.iter().position(|e| matches!(e, Event::Text(_))).unwrap();
        let synth_at = events.iter().position(|e| matches!(e, Event::Synthesize(_))).unwrap();
        assert!(text_at < synth_at);
        h.assert_no_leftovers();
    }

    #[tokio::test]
    async fn test_voice_send_failure_is_not_propagated() {
        let h = Harness::new(Setup { fail_voice: true, ..Setup::default() });
        let result = h.pipeline.handle_text(&text_msg("kubectl kya hota hai?")).await;

        assert!(result.is_ok());
        assert_eq!(h.log.voices().len(), 1);
        h.assert_no_leftovers();
    }

    #[tokio::test]
    async fn test_provider_error_is_sent_and_spoken() {
        let h = Harness::new(Setup { answer: None, ..Setup::default() });
        h.pipeline.handle_text(&text_msg("kubectl kya hota hai?")).await.unwrap();

        let texts = h.log.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("Sorry, I could not answer that right now"));
        assert!(texts[0].contains("503"));
        assert!(texts[0].contains("upstream down"));

        let events = h.log.events();
        assert_eq!(events[2], Event::Synthesize(texts[0].clone()));
        assert!(matches!(events[3], Event::Voice(_)));
        h.assert_no_leftovers();
    }

    #[tokio::test]
    async fn test_provider_error_with_tts_failure_still_answers() {
        let h = Harness::new(Setup { answer: None, tts_fails: true, ..Setup::default() });
        let result = h.pipeline.handle_text(&text_msg("kubectl kya hota hai?")).await;

        assert!(result.is_ok());
        assert_eq!(h.log.texts().len(), 1);
        assert!(h.log.voices().is_empty());
        h.assert_no_leftovers();
    }

    #[tokio::test]
    async fn test_text_send_failure_propagates() {
        let h = Harness::new(Setup { fail_text: true, ..Setup::default() });
        let result = h.pipeline.handle_text(&text_msg("kubectl kya hota hai?")).await;

        assert!(matches!(result, Err(PipelineError::Chat(_))));
        assert_eq!(h.log.count(|e| matches!(e, Event::Synthesize(_))), 0);
        h.assert_no_leftovers();
    }

    #[tokio::test]
    async fn test_blank_text_is_ignored() {
        let h = Harness::new(Setup::default());
        h.pipeline.handle_text(&text_msg("   \n ")).await.unwrap();
        assert!(h.log.events().is_empty());
    }

    #[tokio::test]
    async fn test_prompt_is_trimmed() {
        let h = Harness::new(Setup::default());
        h.pipeline.handle_text(&text_msg("  terraform plan?  ")).await.unwrap();
        assert_eq!(h.log.events()[0], Event::ChatReply("terraform plan?".to_string()));
    }

    #[tokio::test]
    async fn test_markdown_is_not_spoken() {
        let h = Harness::new(Setup {
            answer: Some("**kubectl** ek `CLI` hai"),
            ..Setup::default()
        });
        h.pipeline.handle_text(&text_msg("kubectl?")).await.unwrap();

        assert_eq!(h.log.texts(), vec!["**kubectl** ek `CLI` hai"]);
        assert!(h.log.events().contains(&Event::Synthesize("kubectl ek CLI hai".to_string())));
    }

    #[tokio::test]
    async fn test_opus_voice_is_transcoded() {
        let h = Harness::new(Setup { voice_format: VoiceFormat::Opus, ..Setup::default() });
        h.pipeline.handle_text(&text_msg("kubectl kya hota hai?")).await.unwrap();

        assert!(h.log.events().contains(&Event::Convert(AudioTarget::VoiceNote)));
        let voices = h.log.voices();
        assert_eq!(voices.len(), 1);
        assert_eq!(voices[0].extension().and_then(|e| e.to_str()), Some("ogg"));
        h.assert_no_leftovers();
    }

    #[tokio::test]
    async fn test_opus_transcode_failure_skips_voice() {
        let h = Harness::new(Setup {
            voice_format: VoiceFormat::Opus,
            transcoder_fails: true,
            ..Setup::default()
        });
        let result = h.pipeline.handle_text(&text_msg("kubectl kya hota hai?")).await;

        assert!(result.is_ok());
        assert_eq!(h.log.texts().len(), 1);
        assert!(h.log.voices().is_empty());
        h.assert_no_leftovers();
    }

    #[tokio::test]
    async fn test_concurrent_messages_use_distinct_clips() {
        let h = Harness::new(Setup::default());
        let a = text_msg("docker?");
        let b = text_msg("docker?");
        let (ra, rb) = tokio::join!(h.pipeline.handle_text(&a), h.pipeline.handle_text(&b));
        ra.unwrap();
        rb.unwrap();

        let voices = h.log.voices();
        assert_eq!(voices.len(), 2);
        assert_ne!(voices[0], voices[1]);
        h.assert_no_leftovers();
    }
}

// =============================================================================
// VOICE MESSAGES
// =============================================================================

mod voice_messages {
    use super::*;

    #[tokio::test]
    async fn test_missing_voice_payload() {
        let h = Harness::new(Setup::default());
        let msg = InboundMessage::voice(4242, 79, None, None);
        h.pipeline.handle_voice(&msg).await.unwrap();

        assert_eq!(h.log.events(), vec![Event::Text(VOICE_NOT_FOUND.to_string())]);
        h.assert_no_leftovers();
    }

    #[tokio::test]
    async fn test_full_voice_flow() {
        let h = Harness::new(Setup::default());
        h.pipeline.handle_voice(&voice_msg()).await.unwrap();

        let events = h.log.events();
        assert_eq!(events[0], Event::Download("AwACAgIAAxkBAAIB".to_string()));
        assert_eq!(events[1], Event::Convert(AudioTarget::SpeechInput));
        assert_eq!(events[2], Event::Transcribe);
        assert_eq!(events[3], Event::Text("Transcribed: docker kya hai?".to_string()));
        assert_eq!(events[4], Event::ChatReply("docker kya hai?".to_string()));
        assert_eq!(events[5], Event::Text(ANSWER.to_string()));
        assert!(matches!(events[6], Event::Synthesize(_)));
        assert!(matches!(events[7], Event::Voice(_)));
        assert_eq!(events.len(), 8);
        h.assert_no_leftovers();
    }

    #[tokio::test]
    async fn test_placeholder_transcript_still_gets_reply() {
        let h = Harness::new(Setup { stt: None, ..Setup::default() });
        h.pipeline.handle_voice(&voice_msg()).await.unwrap();

        let texts = h.log.texts();
        assert_eq!(texts[0], format!("Transcribed: {PLACEHOLDER_TRANSCRIPT}"));
        assert_eq!(texts[1], ANSWER);
        assert!(h.log.events().contains(&Event::ChatReply(PLACEHOLDER_TRANSCRIPT.to_string())));
        assert_eq!(h.log.voices().len(), 1);
        h.assert_no_leftovers();
    }

    #[tokio::test]
    async fn test_conversion_failure_stops_with_fixed_message() {
        let h = Harness::new(Setup { transcoder_fails: true, ..Setup::default() });
        h.pipeline.handle_voice(&voice_msg()).await.unwrap();

        assert_eq!(
            h.log.events(),
            vec![
                Event::Download("AwACAgIAAxkBAAIB".to_string()),
                Event::Convert(AudioTarget::SpeechInput),
                Event::Text(AUDIO_PROCESSING_ERROR.to_string()),
            ]
        );
        h.assert_no_leftovers();
    }

    #[tokio::test]
    async fn test_download_failure() {
        let h = Harness::new(Setup { fail_download: true, ..Setup::default() });
        h.pipeline.handle_voice(&voice_msg()).await.unwrap();

        assert_eq!(h.log.texts(), vec![DOWNLOAD_FAILED]);
        assert_eq!(h.log.count(|e| matches!(e, Event::Convert(_))), 0);
        h.assert_no_leftovers();
    }

    #[tokio::test]
    async fn test_transcription_error_is_reported() {
        let h = Harness::new(Setup { stt: Some(SttOutcome::Fail), ..Setup::default() });
        h.pipeline.handle_voice(&voice_msg()).await.unwrap();

        let texts = h.log.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("Sorry, I could not transcribe that"));
        assert!(texts[0].contains("timed out"));
        assert_eq!(h.log.count(|e| matches!(e, Event::ChatReply(_))), 0);
        h.assert_no_leftovers();
    }

    #[tokio::test]
    async fn test_silence_is_reported() {
        let h = Harness::new(Setup { stt: Some(SttOutcome::Spoken("   ")), ..Setup::default() });
        h.pipeline.handle_voice(&voice_msg()).await.unwrap();

        assert_eq!(h.log.texts(), vec![NOTHING_HEARD]);
        assert_eq!(h.log.count(|e| matches!(e, Event::ChatReply(_))), 0);
        h.assert_no_leftovers();
    }

    #[tokio::test]
    async fn test_tts_failure_after_voice_question() {
        let h = Harness::new(Setup { tts_fails: true, ..Setup::default() });
        let result = h.pipeline.handle_voice(&voice_msg()).await;

        assert!(result.is_ok());
        assert_eq!(h.log.texts().len(), 2);
        assert!(h.log.voices().is_empty());
        h.assert_no_leftovers();
    }

    #[tokio::test]
    async fn test_transcript_send_failure_propagates() {
        let h = Harness::new(Setup { fail_text: true, ..Setup::default() });
        let result = h.pipeline.handle_voice(&voice_msg()).await;

        assert!(matches!(result, Err(PipelineError::Chat(_))));
        assert_eq!(h.log.count(|e| matches!(e, Event::ChatReply(_))), 0);
        h.assert_no_leftovers();
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

mod commands {
    use super::*;

    #[test]
    fn test_greeting_names_bot_and_user() {
        let h = Harness::new(Setup::default());
        let greeting = h.pipeline.greeting("Asha");
        assert!(greeting.contains("Asha"));
        assert!(greeting.contains("DevOpsGuru"));
        assert_eq!(h.pipeline.bot_name(), "DevOpsGuru");
    }

    #[tokio::test]
    async fn test_start_sends_greeting_only() {
        let h = Harness::new(Setup::default());
        h.pipeline.handle_command(&text_msg("/start")).await.unwrap();

        let texts = h.log.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("Namaste Asha!"));
        assert_eq!(h.log.count(|e| matches!(e, Event::ChatReply(_))), 0);
        assert!(h.log.voices().is_empty());
    }
}

// =============================================================================
// LOG PREVIEWS
// =============================================================================

#[test]
fn test_truncate() {
    assert_eq!(truncate("hello", 10), "hello");
    assert_eq!(truncate("hello world", 5), "hello...");
    assert_eq!(truncate("नमस्ते दुनिया", 3), "नमस...");
}
