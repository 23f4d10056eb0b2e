//! OpenRouter adapter (chat-completions dialect, many upstream models).

use super::openai::{ChatRequest, ChatResponse};
use super::{Backend, CompletionRequest, CompletionResult, ModelBackend};
use crate::error::BackendError;
use async_trait::async_trait;

const URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// OpenRouter asks integrators to identify themselves on every request.
const REFERER: &str = "https://github.com/quorum-engine/quorum-engine";
const TITLE: &str = "Quorum Engine";

pub struct OpenRouterAdapter {
    client: reqwest::Client,
    api_key: String,
}

impl OpenRouterAdapter {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl ModelBackend for OpenRouterAdapter {
    fn id(&self) -> Backend {
        Backend::OpenRouter
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
            .header("HTTP-Referer", REFERER)
            .header("X-Title", TITLE)
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
