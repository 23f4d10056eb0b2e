//! Alibaba Qwen adapter (DashScope text-generation endpoint).

use super::{Backend, CompletionRequest, CompletionResult, Message, ModelBackend, ResponseMode, Usage};
use crate::error::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const URL: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation";

pub struct QwenAdapter {
    client: reqwest::Client,
    api_key: String,
}

impl QwenAdapter {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[derive(Serialize)]
struct GenerationRequest<'a> {
    model: String,
    input: Input<'a>,
    parameters: Parameters,
}

#[derive(Serialize)]
struct Input<'a> {
    messages: &'a [Message],
}

#[derive(Serialize)]
struct Parameters {
    temperature: f64,
    max_tokens: u32,
    result_format: &'static str,
}

#[derive(Deserialize, Default)]
struct GenerationResponse {
    #[serde(default)]
    output: Output,
    #[serde(default)]
    usage: QwenUsage,
}

#[derive(Deserialize, Default)]
struct Output {
    #[serde(default)]
    text: Option<String>,
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
    content: String,
}

#[derive(Deserialize, Default)]
struct QwenUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[async_trait]
impl ModelBackend for QwenAdapter {
    fn id(&self) -> Backend {
        Backend::Qwen
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, BackendError> {
        let backend = self.id();
        let model = request.model_for(backend);

        let body = GenerationRequest {
            model: model.clone(),
            input: Input {
                messages: &request.messages,
            },
            parameters: Parameters {
                temperature: request.temperature(),
                max_tokens: request.max_tokens(),
                // DashScope returns structured choices in "message" format.
                result_format: match request.response_mode {
                    ResponseMode::Json => "message",
                    ResponseMode::Text => "text",
                },
            },
        };

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

        let parsed: GenerationResponse = serde_json::from_str(&text)
            .map_err(|e| BackendError::malformed(backend, &e, &text))?;

        let content = parsed
            .output
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .or(parsed.output.text)
            .unwrap_or_default();

        let usage = Usage {
            prompt_tokens: parsed.usage.input_tokens,
            completion_tokens: parsed.usage.output_tokens,
            total_tokens: parsed.usage.input_tokens + parsed.usage.output_tokens,
        };

        Ok(CompletionResult {
            content,
            backend,
            model,
            usage,
        })
    }
}
