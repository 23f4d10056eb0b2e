//! Backend identities, the uniform completion request/response model,
//! and the availability resolver.
//!
//! Every external model service sits behind [`ModelBackend`], which owns
//! retry-free single-call semantics: one HTTP request in, one normalized
//! [`CompletionResult`] (or [`BackendError`]) out. Which backends exist is
//! purely a function of which credential variables were present when
//! [`Credentials`] was constructed.

pub mod gemini;
pub mod openai;
pub mod openrouter;
pub mod qwen;

use crate::error::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Default sampling temperature when the request does not specify one.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Default completion size cap when the request does not specify one.
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

/// One configured external model service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Gemini,
    Qwen,
    OpenAi,
    OpenRouter,
}

/// Fixed preference order: fastest/cheapest first.
pub const PRIORITY: [Backend; 4] = [
    Backend::Gemini,
    Backend::Qwen,
    Backend::OpenRouter,
    Backend::OpenAi,
];

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Gemini => "gemini",
            Backend::Qwen => "qwen",
            Backend::OpenAi => "openai",
            Backend::OpenRouter => "openrouter",
        }
    }

    /// Environment variable holding this backend's credential.
    pub fn env_key(&self) -> &'static str {
        match self {
            Backend::Gemini => "GEMINI_API_KEY",
            Backend::Qwen => "QWEN_API_KEY",
            Backend::OpenAi => "OPENAI_API_KEY",
            Backend::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    /// Model requested when the caller does not override one.
    pub fn default_model(&self) -> &'static str {
        match self {
            Backend::Gemini => "gemini-1.5-flash",
            Backend::Qwen => "qwen-turbo",
            Backend::OpenAi => "gpt-4o-mini",
            Backend::OpenRouter => "google/gemini-flash-1.5",
        }
    }

    /// Hand-picked reliability prior in [0, 1], used by the default
    /// consensus confidence model. Backends do not all report calibrated
    /// confidence, so this is a constant per service.
    pub fn confidence_prior(&self) -> f64 {
        match self {
            Backend::Gemini => 0.90,
            Backend::Qwen => 0.85,
            Backend::OpenAi => 0.95,
            Backend::OpenRouter => 0.80,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" => Ok(Backend::Gemini),
            "qwen" => Ok(Backend::Qwen),
            "openai" => Ok(Backend::OpenAi),
            "openrouter" => Ok(Backend::OpenRouter),
            other => Err(format!(
                "unknown backend '{}' (expected gemini, qwen, openai, or openrouter)",
                other
            )),
        }
    }
}

/// Role tag for one chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message in a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Structured vs free-text response mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    #[default]
    Text,
    Json,
}

/// Immutable value describing one logical completion call.
///
/// Constructed once per call; adapters translate it into their own wire
/// shape without mutating it.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub response_mode: ResponseMode,
    pub preferred_backend: Option<Backend>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            model: None,
            temperature: None,
            max_tokens: None,
            response_mode: ResponseMode::Text,
            preferred_backend: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_response_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = mode;
        self
    }

    pub fn with_preferred_backend(mut self, backend: Backend) -> Self {
        self.preferred_backend = Some(backend);
        self
    }

    pub fn temperature(&self) -> f64 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    /// Model to request from the given backend.
    pub fn model_for(&self, backend: Backend) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| backend.default_model().to_string())
    }
}

/// Token-usage counters normalized across backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Normalized result of one successful backend call.
#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub content: String,
    pub backend: Backend,
    pub model: String,
    pub usage: Usage,
}

/// Uniform capability interface over one external model service.
///
/// Implementations issue exactly one request per `complete` call and never
/// retry; retry and fallback policy live in the dispatcher. An empty or
/// missing payload is a successful call with empty content, not an error.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn id(&self) -> Backend;

    async fn complete(&self, request: &CompletionRequest)
        -> Result<CompletionResult, BackendError>;
}

/// Availability resolver: which backends are usable, derived from which
/// credentials were present in the environment at construction.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub gemini: Option<String>,
    pub qwen: Option<String>,
    pub openai: Option<String>,
    pub openrouter: Option<String>,
}

impl Credentials {
    /// Snapshot the credential variables from the process environment.
    pub fn from_env() -> Self {
        fn read(key: &str) -> Option<String> {
            std::env::var(key).ok().filter(|v| !v.is_empty())
        }
        Self {
            gemini: read(Backend::Gemini.env_key()),
            qwen: read(Backend::Qwen.env_key()),
            openai: read(Backend::OpenAi.env_key()),
            openrouter: read(Backend::OpenRouter.env_key()),
        }
    }

    fn key_for(&self, backend: Backend) -> Option<&str> {
        match backend {
            Backend::Gemini => self.gemini.as_deref(),
            Backend::Qwen => self.qwen.as_deref(),
            Backend::OpenAi => self.openai.as_deref(),
            Backend::OpenRouter => self.openrouter.as_deref(),
        }
    }

    /// Configured backends in fixed priority order.
    pub fn available(&self) -> Vec<Backend> {
        PRIORITY
            .iter()
            .copied()
            .filter(|b| self.key_for(*b).is_some())
            .collect()
    }

    /// Highest-priority configured backend, if any.
    pub fn best(&self) -> Option<Backend> {
        self.available().into_iter().next()
    }

    /// Materialize one adapter per configured backend, sharing a single
    /// HTTP client, in priority order.
    pub fn adapters(&self) -> Vec<Arc<dyn ModelBackend>> {
        let client = reqwest::Client::new();
        self.available()
            .into_iter()
            .map(|backend| {
                let key = self
                    .key_for(backend)
                    .unwrap_or_default()
                    .to_string();
                match backend {
                    Backend::Gemini => {
                        Arc::new(gemini::GeminiAdapter::new(client.clone(), key))
                            as Arc<dyn ModelBackend>
                    }
                    Backend::Qwen => Arc::new(qwen::QwenAdapter::new(client.clone(), key)),
                    Backend::OpenAi => Arc::new(openai::OpenAiAdapter::new(client.clone(), key)),
                    Backend::OpenRouter => {
                        Arc::new(openrouter::OpenRouterAdapter::new(client.clone(), key))
                    }
                }
            })
            .collect()
    }
}

/// Truncate a string for error display (Unicode-safe).
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    if s.chars().count() <= max_chars {
        s
    } else {
        let byte_idx = s
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        &s[..byte_idx]
    }
}
