//! Provider adapters.
//!
//! One adapter per upstream API family. Each adapter presents the uniform
//! [`ChatProvider`] interface and owns the pure translation between the
//! canonical types in [`crate::messages`] and its provider's wire format.

pub(crate) mod anthropic;
pub(crate) mod deepseek;
pub(crate) mod openai;
pub(crate) mod xai;

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use config::{LlmConfig, ProviderKind};
use rand::Rng;

use crate::{
    LlmError, LlmResult,
    messages::{GenerationRequest, ModelResponse, ToolDefinition},
};

/// Uniform adapter interface.
///
/// Guarantees:
/// - returns within the request deadline or fails with [`LlmError::Timeout`];
/// - a response with pending tool calls carries no final content;
/// - retries happen inside the adapter, per the policy in [`RetryPolicy`].
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// The API family this adapter speaks.
    fn kind(&self) -> ProviderKind;

    /// Whether this provider can represent the given tool on the wire.
    fn can_represent(&self, tool: &ToolDefinition) -> bool;

    /// Run one generation call.
    async fn generate(&self, request: GenerationRequest) -> LlmResult<ModelResponse>;
}

/// Shared handle type for adapters.
pub type SharedProvider = Arc<dyn ChatProvider>;

/// The set of adapters this process can route to.
pub struct ProviderSet {
    by_kind: HashMap<ProviderKind, SharedProvider>,
}

impl ProviderSet {
    /// Build adapters for every configured provider with credentials.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut by_kind: HashMap<ProviderKind, SharedProvider> = HashMap::new();

        for (name, provider) in &config.providers {
            if provider.api_key.is_none() {
                log::debug!("provider '{name}' has no API key, leaving inactive");
                continue;
            }

            let adapter: SharedProvider = match provider.kind {
                ProviderKind::OpenAi => Arc::new(openai::OpenAiProvider::new(provider.clone())),
                ProviderKind::Xai => Arc::new(xai::XaiProvider::new(provider.clone())),
                ProviderKind::Anthropic => Arc::new(anthropic::AnthropicProvider::new(provider.clone())),
                ProviderKind::DeepSeek => Arc::new(deepseek::DeepSeekProvider::new(provider.clone())),
            };

            by_kind.insert(provider.kind, adapter);
        }

        Self { by_kind }
    }

    /// Look up the adapter for a provider kind.
    pub fn get(&self, kind: ProviderKind) -> Option<SharedProvider> {
        self.by_kind.get(&kind).cloned()
    }

    /// Active provider kinds.
    pub fn kinds(&self) -> impl Iterator<Item = ProviderKind> + '_ {
        self.by_kind.keys().copied()
    }

    /// Register a prebuilt adapter. Tests use this to install fakes.
    pub fn insert(&mut self, adapter: SharedProvider) {
        self.by_kind.insert(adapter.kind(), adapter);
    }

    /// An empty set, for tests that install fakes.
    pub fn empty() -> Self {
        Self { by_kind: HashMap::new() }
    }
}

/// Split the offered tools into representable ones and dropped names.
pub(crate) fn partition_tools(
    provider: &dyn ChatProvider,
    tools: &[ToolDefinition],
) -> (Vec<ToolDefinition>, Vec<String>) {
    let mut kept = Vec::with_capacity(tools.len());
    let mut dropped = Vec::new();

    for tool in tools {
        if provider.can_represent(tool) {
            kept.push(tool.clone());
        } else {
            log::debug!(
                "dropping tool '{}' for provider {}: capability not representable",
                tool.name,
                provider.kind()
            );
            dropped.push(tool.name.clone());
        }
    }

    (kept, dropped)
}

/// Parse a `Retry-After` seconds header, when present and well-formed.
pub(crate) fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Map a provider HTTP status to the error taxonomy.
pub(crate) fn error_for_status(status: u16, retry_after: Option<Duration>, body: String) -> LlmError {
    match status {
        401 | 403 => LlmError::Unauthorized(body),
        400 | 404 | 422 => LlmError::SchemaViolation(body),
        429 => LlmError::RateLimited {
            retry_after,
            message: body,
        },
        _ => LlmError::ProviderUnavailable(format!("status {status}: {body}")),
    }
}

/// Retry policy shared by all adapters.
///
/// One retry on `RateLimited` honoring the advertised wait; two attempts
/// with exponential backoff (500 ms base) and jitter on transient
/// `ProviderUnavailable`. Everything else surfaces immediately.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    base_backoff: Duration,
    transient_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_millis(500),
            transient_attempts: 2,
        }
    }
}

impl RetryPolicy {
    /// How long to wait before retrying, or `None` to give up.
    pub(crate) fn backoff_for(&self, error: &LlmError, rate_limit_retries: u32, transient_retries: u32) -> Option<Duration> {
        match error {
            LlmError::RateLimited { retry_after, .. } if rate_limit_retries == 0 => {
                Some(retry_after.unwrap_or(Duration::from_secs(1)))
            }
            LlmError::ProviderUnavailable(_) if transient_retries < self.transient_attempts => {
                let exp = self.base_backoff * 2u32.pow(transient_retries);
                let jitter = rand::rng().random_range(Duration::ZERO..self.base_backoff / 2);
                Some(exp + jitter)
            }
            _ => None,
        }
    }
}

/// Run `attempt` under the retry policy, bounded by `deadline`.
pub(crate) async fn generate_with_retry<F, Fut>(deadline: Duration, attempt: F) -> LlmResult<ModelResponse>
where
    F: Fn() -> Fut,
    Fut: Future<Output = LlmResult<ModelResponse>>,
{
    let policy = RetryPolicy::default();

    let run = async {
        let mut rate_limit_retries = 0;
        let mut transient_retries = 0;

        loop {
            let error = match attempt().await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            let Some(wait) = policy.backoff_for(&error, rate_limit_retries, transient_retries) else {
                return Err(error);
            };

            match &error {
                LlmError::RateLimited { .. } => rate_limit_retries += 1,
                _ => transient_retries += 1,
            }

            log::debug!("retrying provider call in {wait:?} after: {error}");
            tokio::time::sleep(wait).await;
        }
    };

    match tokio::time::timeout(deadline, run).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(error_for_status(401, None, String::new()).kind(), "unauthorized");
        assert_eq!(error_for_status(400, None, String::new()).kind(), "schema_violation");
        assert_eq!(error_for_status(429, None, String::new()).kind(), "rate_limited");
        assert_eq!(error_for_status(503, None, String::new()).kind(), "provider_unavailable");
    }

    #[test]
    fn rate_limit_retries_once_honoring_advertised_wait() {
        let policy = RetryPolicy::default();
        let error = LlmError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
            message: String::new(),
        };

        assert_eq!(policy.backoff_for(&error, 0, 0), Some(Duration::from_secs(7)));
        assert_eq!(policy.backoff_for(&error, 1, 0), None);
    }

    #[test]
    fn transient_backoff_is_exponential_and_bounded() {
        let policy = RetryPolicy::default();
        let error = LlmError::ProviderUnavailable("502".into());

        let first = policy.backoff_for(&error, 0, 0).unwrap();
        let second = policy.backoff_for(&error, 0, 1).unwrap();

        assert!(first >= Duration::from_millis(500));
        assert!(second >= Duration::from_secs(1));
        assert_eq!(policy.backoff_for(&error, 0, 2), None);
    }

    #[test]
    fn non_retryable_errors_surface_immediately() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(&LlmError::Timeout, 0, 0), None);
        assert_eq!(policy.backoff_for(&LlmError::Unauthorized("no".into()), 0, 0), None);
    }

    #[tokio::test(start_paused = true)]
    async fn generate_with_retry_times_out() {
        let result = generate_with_retry(Duration::from_secs(1), || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(LlmError::ProviderUnavailable("never".into()))
        })
        .await;

        assert!(matches!(result, Err(LlmError::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn generate_with_retry_recovers_from_transient_failure() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let calls = AtomicU32::new(0);
        let result = generate_with_retry(Duration::from_secs(30), || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(LlmError::ProviderUnavailable("502".into()))
                } else {
                    Ok(ModelResponse::from_error("m", &LlmError::Timeout))
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
