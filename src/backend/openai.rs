//! OpenAI adapter (chat completions endpoint).
//!
//! The wire structs here are shared with the OpenRouter adapter, which
//! speaks the same chat-completions dialect.

use super::{Backend, CompletionRequest, CompletionResult, Message, ModelBackend, ResponseMode, Usage};
use crate::error::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiAdapter {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiAdapter {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[derive(Serialize)]
pub(super) struct ChatRequest<'a> {
    pub model: String,
    pub messages: &'a [Message],
    pub temperature: f64,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
pub(super) struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: &'static str,
}

impl<'a> ChatRequest<'a> {
    pub(super) fn from_request(request: &'a CompletionRequest, backend: Backend) -> Self {
        Self {
            model: request.model_for(backend),
            messages: &request.messages,
            temperature: request.temperature(),
            max_tokens: request.max_tokens(),
            response_format: match request.response_mode {
                ResponseMode::Json => Some(ResponseFormat {
                    format_type: "json_object",
                }),
                ResponseMode::Text => None,
            },
        }
    }
}

#[derive(Deserialize, Default)]
pub(super) struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Deserialize)]
pub(super) struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Deserialize)]
pub(super) struct ChoiceMessage {
    #[serde(default)]
    pub content: String,
}

impl ChatResponse {
    /// First choice's text; an empty choice list is an empty completion.
    pub(super) fn content(&self) -> String {
        self.choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelBackend for OpenAiAdapter {
    fn id(&self) -> Backend {
        Backend::OpenAi
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, BackendError> {
        let backend = self.id();
        let body = ChatRequest::from_request(request, backend);
        let model = body.model.clone();

        let response = self
            .client
            .post(URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::transport(backend, &e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::transport(backend, &e))?;
        if !status.is_success() {
            return Err(BackendError::api(backend, status, &text));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| BackendError::malformed(backend, &e, &text))?;

        Ok(CompletionResult {
            content: parsed.content(),
            backend,
            model,
            usage: parsed.usage,
        })
    }
}
