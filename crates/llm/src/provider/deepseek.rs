//! DeepSeek adapter.
//!
//! OpenAI-compatible chat completions with nested tool declarations.
//! DeepSeek has no native tools beyond function calling, and the reasoner
//! model rejects tools entirely; anything else offered to it is dropped and
//! recorded on the response. Reasoning models surface their chain of thought
//! in `reasoning_content`, which maps to the canonical reasoning slot.

use std::sync::Arc;

use async_trait::async_trait;
use config::{ProviderConfig, ProviderKind};
use reqwest::{Client, header::AUTHORIZATION};
use secrecy::ExposeSecret;
use tokio::sync::Semaphore;

use super::openai::{
    input::{self, ResponseFormat},
    output::ChatResponse,
};
use crate::{
    LlmError, LlmResult,
    http_client::http_client,
    messages::{GenerationRequest, ModelResponse, ToolCapability, ToolDefinition},
    provider::{ChatProvider, error_for_status, generate_with_retry, partition_tools, retry_after_header},
};

const DEFAULT_DEEPSEEK_API_URL: &str = "https://api.deepseek.com/v1";

fn model_supports_tools(model_id: &str) -> bool {
    !model_id.starts_with("deepseek-reasoner")
}

pub(crate) struct DeepSeekProvider {
    client: Client,
    base_url: String,
    config: ProviderConfig,
    semaphore: Arc<Semaphore>,
}

impl DeepSeekProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_DEEPSEEK_API_URL.to_string());

        Self {
            client: http_client(),
            base_url,
            semaphore: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
        }
    }
}

#[async_trait]
impl ChatProvider for DeepSeekProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::DeepSeek
    }

    fn can_represent(&self, tool: &ToolDefinition) -> bool {
        tool.capability == ToolCapability::Function
    }

    async fn generate(&self, request: GenerationRequest) -> LlmResult<ModelResponse> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| LlmError::ProviderUnavailable("adapter shutting down".into()))?;

        let Some(key) = self.config.api_key.clone() else {
            return Err(LlmError::Unauthorized("no API key configured".into()));
        };

        let (mut tools, mut dropped) = partition_tools(self, &request.tools);

        if !model_supports_tools(&request.config.model_id) {
            dropped.extend(tools.drain(..).map(|tool| tool.name));
        }

        let model_id = request.config.model_id.clone();
        let deadline = request.config.deadline;

        let mut wire = input::chat_request(&request, &tools);

        // No json_schema response format upstream; json_object is the
        // closest mode and the caller's parse ladder covers the rest.
        if request.structured_output.is_some() {
            wire.response_format = Some(ResponseFormat {
                kind: "json_object",
                json_schema: None,
            });
        }

        let body = sonic_rs::to_vec(&wire)
            .map_err(|e| LlmError::SchemaViolation(format!("failed to serialize request: {e}")))?;
        let url = format!("{}/chat/completions", self.base_url);

        generate_with_retry(deadline, || {
            let dropped = dropped.clone();
            let body = body.clone();
            let url = url.clone();
            let key = key.clone();
            let model_id = model_id.clone();

            async move {
                let response = self
                    .client
                    .post(&url)
                    .header(AUTHORIZATION, format!("Bearer {}", key.expose_secret()))
                    .header("Content-Type", "application/json")
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| LlmError::ProviderUnavailable(format!("failed to reach DeepSeek: {e}")))?;

                let status = response.status();

                if !status.is_success() {
                    let retry_after = retry_after_header(response.headers());
                    let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
                    log::error!("DeepSeek API error ({status}): {error_text}");

                    return Err(error_for_status(status.as_u16(), retry_after, error_text));
                }

                let text = response
                    .text()
                    .await
                    .map_err(|e| LlmError::ProviderUnavailable(format!("failed to read DeepSeek response: {e}")))?;

                let parsed: ChatResponse = sonic_rs::from_str(&text).map_err(|e| {
                    log::error!("failed to parse DeepSeek chat completion payload: {e}");
                    LlmError::SchemaViolation("unparseable provider response".into())
                })?;

                Ok(parsed.into_model_response(&model_id, dropped))
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoner_models_reject_tools() {
        assert!(model_supports_tools("deepseek-chat"));
        assert!(!model_supports_tools("deepseek-reasoner"));
    }

    #[test]
    fn only_plain_function_tools_are_representable() {
        let provider = DeepSeekProvider::new(ProviderConfig {
            kind: ProviderKind::DeepSeek,
            api_key: Some("sk-test".to_string().into()),
            base_url: None,
            max_concurrency: 2,
        });

        let tool = |capability| ToolDefinition {
            name: "t".into(),
            description: String::new(),
            parameters: serde_json::json!({}),
            strict: true,
            capability,
        };

        assert!(provider.can_represent(&tool(ToolCapability::Function)));
        assert!(!provider.can_represent(&tool(ToolCapability::WebSearch)));
        assert!(!provider.can_represent(&tool(ToolCapability::ImageGeneration)));
    }
}
