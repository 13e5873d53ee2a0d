// The chat-completions wire shape is shared with the xAI and DeepSeek
// adapters, which speak OpenAI-compatible APIs.
pub(super) mod input;
pub(super) mod output;

use std::sync::Arc;

use async_trait::async_trait;
use config::{ProviderConfig, ProviderKind};
use reqwest::{Client, header::AUTHORIZATION};
use secrecy::ExposeSecret;
use tokio::sync::Semaphore;

use self::output::{ChatResponse, ResponsesResponse};
use crate::{
    LlmError, LlmResult,
    http_client::http_client,
    messages::{GenerationRequest, ModelResponse, ToolCapability, ToolDefinition},
    provider::{ChatProvider, error_for_status, generate_with_retry, partition_tools, retry_after_header},
};

const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Which OpenAI endpoint a model is served from.
///
/// Pure function of the model id; the adapter must never send a shape the
/// endpoint rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireProtocol {
    /// `/responses` with strict top-level tool declarations.
    Responses,
    /// `/chat/completions` with nested `function` tool declarations.
    ChatCompletions,
}

fn wire_protocol(model_id: &str) -> WireProtocol {
    let responses_family = ["gpt-4.1", "gpt-5", "o1", "o3", "o4"];

    if responses_family.iter().any(|prefix| model_id.starts_with(prefix)) {
        WireProtocol::Responses
    } else {
        WireProtocol::ChatCompletions
    }
}

pub(crate) struct OpenAiProvider {
    client: Client,
    base_url: String,
    config: ProviderConfig,
    semaphore: Arc<Semaphore>,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_API_URL.to_string());

        Self {
            client: http_client(),
            base_url,
            semaphore: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
        }
    }

    async fn post_once(&self, url: &str, body: &[u8]) -> LlmResult<reqwest::Response> {
        let Some(key) = self.config.api_key.as_ref() else {
            return Err(LlmError::Unauthorized("no API key configured".into()));
        };

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", key.expose_secret()))
            .header("Content-Type", "application/json")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| LlmError::ProviderUnavailable(format!("failed to reach OpenAI: {e}")))?;

        let status = response.status();

        if !status.is_success() {
            let retry_after = retry_after_header(response.headers());
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("OpenAI API error ({status}): {error_text}");

            return Err(error_for_status(status.as_u16(), retry_after, error_text));
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn can_represent(&self, tool: &ToolDefinition) -> bool {
        matches!(
            tool.capability,
            ToolCapability::Function | ToolCapability::WebSearch | ToolCapability::CodeExecution
        )
    }

    async fn generate(&self, request: GenerationRequest) -> LlmResult<ModelResponse> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| LlmError::ProviderUnavailable("adapter shutting down".into()))?;

        let (tools, dropped) = partition_tools(self, &request.tools);
        let protocol = wire_protocol(&request.config.model_id);
        let model_id = request.config.model_id.clone();
        let deadline = request.config.deadline;

        let (url, body) = match protocol {
            WireProtocol::Responses => {
                let wire = input::responses_request(&request, &tools);
                let body = sonic_rs::to_vec(&wire)
                    .map_err(|e| LlmError::SchemaViolation(format!("failed to serialize request: {e}")))?;
                (format!("{}/responses", self.base_url), body)
            }
            WireProtocol::ChatCompletions => {
                let wire = input::chat_request(&request, &tools);
                let body = sonic_rs::to_vec(&wire)
                    .map_err(|e| LlmError::SchemaViolation(format!("failed to serialize request: {e}")))?;
                (format!("{}/chat/completions", self.base_url), body)
            }
        };

        generate_with_retry(deadline, || {
            let dropped = dropped.clone();
            let url = url.clone();
            let body = body.clone();
            let model_id = model_id.clone();

            async move {
                let response = self.post_once(&url, &body).await?;

                let text = response
                    .text()
                    .await
                    .map_err(|e| LlmError::ProviderUnavailable(format!("failed to read OpenAI response: {e}")))?;

                match protocol {
                    WireProtocol::Responses => {
                        let parsed: ResponsesResponse = sonic_rs::from_str(&text).map_err(|e| {
                            log::error!("failed to parse OpenAI responses payload: {e}");
                            LlmError::SchemaViolation("unparseable provider response".into())
                        })?;
                        Ok(parsed.into_model_response(&model_id, dropped))
                    }
                    WireProtocol::ChatCompletions => {
                        let parsed: ChatResponse = sonic_rs::from_str(&text).map_err(|e| {
                            log::error!("failed to parse OpenAI chat completion payload: {e}");
                            LlmError::SchemaViolation("unparseable provider response".into())
                        })?;
                        Ok(parsed.into_model_response(&model_id, dropped))
                    }
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_selection_is_a_pure_function_of_model_id() {
        assert_eq!(wire_protocol("gpt-4.1"), WireProtocol::Responses);
        assert_eq!(wire_protocol("gpt-4.1-mini"), WireProtocol::Responses);
        assert_eq!(wire_protocol("o4-mini"), WireProtocol::Responses);
        assert_eq!(wire_protocol("gpt-4o"), WireProtocol::ChatCompletions);
        assert_eq!(wire_protocol("gpt-3.5-turbo"), WireProtocol::ChatCompletions);
    }

    #[test]
    fn image_generation_tools_are_not_representable() {
        let provider = OpenAiProvider::new(ProviderConfig {
            kind: ProviderKind::OpenAi,
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
        assert!(provider.can_represent(&tool(ToolCapability::WebSearch)));
        assert!(!provider.can_represent(&tool(ToolCapability::ImageGeneration)));
    }
}
