mod input;
mod output;

use std::sync::Arc;

use async_trait::async_trait;
use config::{ProviderConfig, ProviderKind};
use reqwest::Client;
use secrecy::ExposeSecret;
use tokio::sync::Semaphore;

use self::output::AnthropicResponse;
use crate::{
    LlmError, LlmResult,
    http_client::http_client,
    messages::{GenerationRequest, ModelResponse, ToolCapability, ToolDefinition},
    provider::{ChatProvider, error_for_status, generate_with_retry, partition_tools, retry_after_header},
};

const DEFAULT_ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub(crate) struct AnthropicProvider {
    client: Client,
    base_url: String,
    config: ProviderConfig,
    semaphore: Arc<Semaphore>,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_ANTHROPIC_API_URL.to_string());

        Self {
            client: http_client(),
            base_url,
            semaphore: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
        }
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn can_represent(&self, tool: &ToolDefinition) -> bool {
        // Native web search, bash and editor tools; no image generation.
        !matches!(tool.capability, ToolCapability::ImageGeneration)
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

        let wire = input::anthropic_request(&request, &tools);
        let body = sonic_rs::to_vec(&wire)
            .map_err(|e| LlmError::SchemaViolation(format!("failed to serialize request: {e}")))?;
        let url = format!("{}/messages", self.base_url);

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
                    .header("x-api-key", key.expose_secret())
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .header("Content-Type", "application/json")
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| LlmError::ProviderUnavailable(format!("failed to reach Anthropic: {e}")))?;

                let status = response.status();

                if !status.is_success() {
                    let retry_after = retry_after_header(response.headers());
                    let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
                    log::error!("Anthropic API error ({status}): {error_text}");

                    return Err(error_for_status(status.as_u16(), retry_after, error_text));
                }

                let text = response
                    .text()
                    .await
                    .map_err(|e| LlmError::ProviderUnavailable(format!("failed to read Anthropic response: {e}")))?;

                let parsed: AnthropicResponse = sonic_rs::from_str(&text).map_err(|e| {
                    log::error!("failed to parse Anthropic messages payload: {e}");
                    LlmError::SchemaViolation("unparseable provider response".into())
                })?;

                Ok(parsed.into_model_response(&model_id, dropped))
            }
        })
        .await
    }
}
