//! Chat-completion providers.
//!
//! OpenAI and DeepSeek speak the same `/chat/completions` dialect, so one
//! client covers both; only the base URL, default model and key differ.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{Config, ModelProvider};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";

const OPENAI_MODEL: &str = "gpt-4o-mini";
const DEEPSEEK_MODEL: &str = "deepseek-chat";

/// Failure of a call to an external AI provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty response")]
    Empty,
    #[error("background task failed: {0}")]
    Task(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}

impl From<tokio::task::JoinError> for ProviderError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

/// Builds the system instruction sent with every request.
pub fn persona(bot_name: &str) -> String {
    format!(
        "You are {bot_name}, a friendly DevOps mentor speaking Hinglish. \
         Explain simply, give examples, shortcuts, and DevOps commands."
    )
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Answers `prompt` in the voice described by `persona`.
    async fn reply(&self, persona: &str, prompt: &str) -> Result<String, ProviderError>;
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for any OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatible {
    name: &'static str,
    base_url: String,
    api_key: Secret<String>,
    model: String,
    max_tokens: u32,
    http: reqwest::Client,
}

impl OpenAiCompatible {
    pub fn new(
        name: &'static str,
        base_url: impl Into<String>,
        api_key: Secret<String>,
        model: impl Into<String>,
        max_tokens: u32,
        http: reqwest::Client,
    ) -> Self {
        Self {
            name,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            max_tokens,
            http,
        }
    }

    /// Builds the client for the provider selected in `config`.
    ///
    /// Returns `None` when the selected provider has no key, which
    /// `Config` already rules out.
    pub fn from_config(config: &Config, http: reqwest::Client) -> Option<Self> {
        let (name, base_url, key, default_model) = match config.provider {
            ModelProvider::OpenAi => (
                "openai",
                OPENAI_BASE_URL,
                config.openai_api_key.as_ref()?,
                OPENAI_MODEL,
            ),
            ModelProvider::DeepSeek => (
                "deepseek",
                DEEPSEEK_BASE_URL,
                config.deepseek_api_key.as_ref()?,
                DEEPSEEK_MODEL,
            ),
        };
        let model = config.chat_model.clone().unwrap_or_else(|| default_model.to_string());
        Some(Self::new(name, base_url, key.clone(), model, config.max_tokens, http))
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatible {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn reply(&self, persona: &str, prompt: &str) -> Result<String, ProviderError> {
        let request = ApiRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![
                ApiMessage { role: "system", content: persona },
                ApiMessage { role: "user", content: prompt },
            ],
        };

        debug!("Chat request to {} ({})", self.name, self.model);
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let text = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(ProviderError::Empty)?;

        info!("{} replied with {} chars", self.name, text.chars().count());
        Ok(text)
    }
}

/// Shared HTTP client with the configured timeout applied to every request.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}
