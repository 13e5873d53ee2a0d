//! xAI Grok adapter.
//!
//! Grok speaks the OpenAI-compatible chat completions shape with nested
//! `{function: {name, parameters}}` tool declarations, plus an xAI-specific
//! `search_parameters` extension that keeps live web and X search available
//! during generation.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use config::{ProviderConfig, ProviderKind};
use reqwest::{Client, header::AUTHORIZATION};
use secrecy::ExposeSecret;
use serde::Serialize;
use tokio::sync::Semaphore;

use super::openai::{input, output::ChatResponse};
use crate::{
    LlmError, LlmResult,
    http_client::http_client,
    messages::{GenerationRequest, ModelResponse, ToolCapability, ToolDefinition},
    provider::{ChatProvider, error_for_status, generate_with_retry, partition_tools, retry_after_header},
};

const DEFAULT_XAI_API_URL: &str = "https://api.x.ai/v1";

#[derive(Debug, Serialize)]
struct XaiRequest {
    #[serde(flatten)]
    chat: input::ChatRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_parameters: Option<SearchParameters>,
}

#[derive(Debug, Serialize)]
struct SearchParameters {
    mode: &'static str,
}

pub(crate) struct XaiProvider {
    client: Client,
    base_url: String,
    config: ProviderConfig,
    semaphore: Arc<Semaphore>,
}

impl XaiProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let base_url = config.base_url.clone().unwrap_or_else(|| DEFAULT_XAI_API_URL.to_string());

        Self {
            client: http_client(),
            base_url,
            semaphore: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
        }
    }
}

#[async_trait]
impl ChatProvider for XaiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Xai
    }

    fn can_represent(&self, tool: &ToolDefinition) -> bool {
        // Live search, X search and image generation are all native.
        matches!(
            tool.capability,
            ToolCapability::Function | ToolCapability::WebSearch | ToolCapability::ImageGeneration
        )
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

        let (tools, dropped) = partition_tools(self, &request.tools);
        let model_id = request.config.model_id.clone();
        let deadline = request.config.deadline;

        let wire = XaiRequest {
            chat: input::chat_request(&request, &tools),
            search_parameters: Some(SearchParameters { mode: "auto" }),
        };

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
                    .map_err(|e| LlmError::ProviderUnavailable(format!("failed to reach xAI: {e}")))?;

                let status = response.status();

                if !status.is_success() {
                    let retry_after = retry_after_header(response.headers());
                    let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
                    log::error!("xAI API error ({status}): {error_text}");

                    return Err(error_for_status(status.as_u16(), retry_after, error_text));
                }

                let text = response
                    .text()
                    .await
                    .map_err(|e| LlmError::ProviderUnavailable(format!("failed to read xAI response: {e}")))?;

                let parsed: ChatResponse = sonic_rs::from_str(&text).map_err(|e| {
                    log::error!("failed to parse xAI chat completion payload: {e}");
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
    use crate::messages::{ChatMessage, GenerationConfig};

    #[test]
    fn wire_request_nests_tools_and_adds_search_parameters() {
        let request = GenerationRequest {
            system: None,
            messages: vec![ChatMessage::user("what happened today?")],
            tools: vec![ToolDefinition {
                name: "read_doc".into(),
                description: "Read a Drive doc".into(),
                parameters: serde_json::json!({"type": "object", "properties": {}, "required": [], "additionalProperties": false}),
                strict: true,
                capability: ToolCapability::Function,
            }],
            structured_output: None,
            config: GenerationConfig::new("grok-3-latest", 2048, Duration::from_secs(30)),
        };

        let wire = XaiRequest {
            chat: input::chat_request(&request, &request.tools),
            search_parameters: Some(SearchParameters { mode: "auto" }),
        };

        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["search_parameters"]["mode"], "auto");
        assert_eq!(json["tools"][0]["function"]["name"], "read_doc");
        assert_eq!(json["model"], "grok-3-latest");
    }
}
