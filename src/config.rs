use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::Secret;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    /// A variable is set but its value is not usable.
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid { name, reason: reason.into() }
    }
}

/// Which chat-completion API answers questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelProvider {
    OpenAi,
    DeepSeek,
}

impl FromStr for ModelProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "deepseek" => Ok(Self::DeepSeek),
            other => Err(format!("unknown provider '{other}' (expected deepseek or openai)")),
        }
    }
}

impl fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::DeepSeek => write!(f, "deepseek"),
        }
    }
}

/// How voice messages become text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriberChoice {
    /// OpenAI's hosted Whisper endpoint.
    OpenAi,
    /// A local whisper.cpp model.
    Whisper { model_path: PathBuf, language: String },
    /// No speech-to-text; a placeholder transcript is used.
    Disabled,
}

/// Container used for the synthesized voice reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceFormat {
    Mp3,
    Opus,
}

impl FromStr for VoiceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp3" => Ok(Self::Mp3),
            "opus" | "ogg" => Ok(Self::Opus),
            other => Err(format!("unknown voice format '{other}' (expected mp3 or opus)")),
        }
    }
}

const DEFAULT_BOT_NAME: &str = "DevOpsGuru";
const DEFAULT_TTS_LANG: &str = "hi";
const DEFAULT_MAX_TOKENS: u32 = 400;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug)]
pub struct Config {
    pub telegram_token: Secret<String>,
    pub provider: ModelProvider,
    pub openai_api_key: Option<Secret<String>>,
    pub deepseek_api_key: Option<Secret<String>>,
    /// Name the persona introduces itself with.
    pub bot_name: String,
    /// Language code passed to the speech synthesizer.
    pub tts_lang: String,
    /// Overrides the provider's default chat model.
    pub chat_model: Option<String>,
    pub max_tokens: u32,
    pub transcriber: TranscriberChoice,
    pub voice_format: VoiceFormat,
    pub ffmpeg_path: PathBuf,
    /// Applies to every HTTP request and every ffmpeg run.
    pub request_timeout: Duration,
    /// Where downloaded and synthesized audio lives while a message is handled.
    pub scratch_dir: PathBuf,
    /// Enables the rolling log file when set.
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads configuration through `lookup`, treating empty values as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let telegram_token = get("TELEGRAM_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_TOKEN"))?;
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_valid = telegram_token
            .split_once(':')
            .is_some_and(|(id, secret)| id.parse::<u64>().is_ok() && !secret.is_empty());
        if !token_valid {
            return Err(ConfigError::invalid(
                "TELEGRAM_TOKEN",
                "expected format 123456789:ABCdefGHI...",
            ));
        }

        let provider = match get("MODEL_PROVIDER") {
            Some(v) => v.parse().map_err(|e| ConfigError::invalid("MODEL_PROVIDER", e))?,
            None => ModelProvider::DeepSeek,
        };

        let openai_api_key = get("OPENAI_API_KEY");
        let deepseek_api_key = get("DEEPSEEK_API_KEY");
        match provider {
            ModelProvider::OpenAi if openai_api_key.is_none() => {
                return Err(ConfigError::Missing("OPENAI_API_KEY"));
            }
            ModelProvider::DeepSeek if deepseek_api_key.is_none() => {
                return Err(ConfigError::Missing("DEEPSEEK_API_KEY"));
            }
            _ => {}
        }

        let whisper_model_path = get("WHISPER_MODEL_PATH").map(PathBuf::from);
        let whisper_lang = get("WHISPER_LANG").unwrap_or_else(|| "auto".to_string());
        let transcriber = match get("TRANSCRIBER").map(|v| v.to_ascii_lowercase()).as_deref() {
            Some("openai") => {
                if openai_api_key.is_none() {
                    return Err(ConfigError::Missing("OPENAI_API_KEY"));
                }
                TranscriberChoice::OpenAi
            }
            Some("whisper") => TranscriberChoice::Whisper {
                model_path: whisper_model_path.ok_or(ConfigError::Missing("WHISPER_MODEL_PATH"))?,
                language: whisper_lang,
            },
            Some("none") => TranscriberChoice::Disabled,
            Some(other) => {
                return Err(ConfigError::invalid(
                    "TRANSCRIBER",
                    format!("unknown transcriber '{other}' (expected openai, whisper or none)"),
                ));
            }
            None if openai_api_key.is_some() => TranscriberChoice::OpenAi,
            None => match whisper_model_path {
                Some(model_path) => TranscriberChoice::Whisper {
                    model_path,
                    language: whisper_lang,
                },
                None => TranscriberChoice::Disabled,
            },
        };

        let voice_format = match get("VOICE_FORMAT") {
            Some(v) => v.parse().map_err(|e| ConfigError::invalid("VOICE_FORMAT", e))?,
            None => VoiceFormat::Mp3,
        };

        let max_tokens = parse_number(get("MAX_TOKENS"), "MAX_TOKENS", DEFAULT_MAX_TOKENS)?;
        let timeout_secs = parse_number(
            get("REQUEST_TIMEOUT_SECS"),
            "REQUEST_TIMEOUT_SECS",
            DEFAULT_TIMEOUT_SECS,
        )?;
        if max_tokens == 0 {
            return Err(ConfigError::invalid("MAX_TOKENS", "must be greater than zero"));
        }
        if timeout_secs == 0 {
            return Err(ConfigError::invalid("REQUEST_TIMEOUT_SECS", "must be greater than zero"));
        }

        Ok(Self {
            telegram_token: Secret::new(telegram_token),
            provider,
            openai_api_key: openai_api_key.map(Secret::new),
            deepseek_api_key: deepseek_api_key.map(Secret::new),
            bot_name: get("BOT_NAME").unwrap_or_else(|| DEFAULT_BOT_NAME.to_string()),
            tts_lang: get("TTS_LANG").unwrap_or_else(|| DEFAULT_TTS_LANG.to_string()),
            chat_model: get("CHAT_MODEL"),
            max_tokens,
            transcriber,
            voice_format,
            ffmpeg_path: get("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            request_timeout: Duration::from_secs(timeout_secs),
            scratch_dir: get("SCRATCH_DIR").map(PathBuf::from).unwrap_or_else(std::env::temp_dir),
            log_dir: get("LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_number<T: FromStr>(
    value: Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError::invalid(name, format!("'{v}' is not a valid number"))),
        None => Ok(default),
    }
}
