//! LLM provider and consensus configuration.

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Which upstream API family a provider entry speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat and responses APIs.
    OpenAi,
    /// xAI Grok API.
    Xai,
    /// Anthropic messages API.
    Anthropic,
    /// DeepSeek OpenAI-compatible API.
    DeepSeek,
}

impl ProviderKind {
    /// The stable lowercase tag used in model catalogs and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Xai => "xai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::DeepSeek => "deepseek",
        }
    }

    /// The environment key carrying this provider's API key.
    pub fn api_key_env(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Xai => "GROK_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }

    /// All provider kinds, in catalog order.
    pub fn all() -> [ProviderKind; 4] {
        [
            ProviderKind::OpenAi,
            ProviderKind::Xai,
            ProviderKind::Anthropic,
            ProviderKind::DeepSeek,
        ]
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for one upstream provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// API family of this provider.
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    /// API key. A provider without a key stays inactive and its models are
    /// filtered from the catalog.
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Custom base URL, for proxies and compatible endpoints.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Maximum concurrent in-flight requests to this provider.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl ProviderConfig {
    pub(crate) fn inactive(kind: ProviderKind) -> Self {
        Self {
            kind,
            api_key: None,
            base_url: None,
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_max_concurrency() -> usize {
    8
}

/// Tool loop budgets.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolLoopConfig {
    /// Maximum provider ↔ tool iterations within one model turn.
    pub max_iterations: u32,
    /// Per-tool-call deadline in seconds.
    pub call_deadline_secs: u64,
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            call_deadline_secs: 30,
        }
    }
}

/// LLM configuration settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Configured providers, keyed by name. Order is preserved and used for
    /// catalog listings.
    pub providers: IndexMap<String, ProviderConfig>,
    /// Model used for consensus synthesis.
    pub judge_model: String,
    /// Default output token budget for model calls without a per-model value.
    pub max_output_tokens: u32,
    /// Overall deadline for one consensus generation, in seconds.
    pub generation_deadline_secs: u64,
    /// Tool loop budgets.
    pub tool_loop: ToolLoopConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: IndexMap::new(),
            judge_model: "gpt-4.1".to_string(),
            max_output_tokens: 2048,
            generation_deadline_secs: 180,
            tool_loop: ToolLoopConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Whether any provider of the given kind has credentials.
    pub fn provider_enabled(&self, kind: ProviderKind) -> bool {
        self.providers
            .values()
            .any(|provider| provider.kind == kind && provider.api_key.is_some())
    }

    /// Whether at least one provider has credentials.
    pub fn has_active_providers(&self) -> bool {
        self.providers.values().any(|provider| provider.api_key.is_some())
    }

    pub(crate) fn entry_for(&mut self, kind: ProviderKind) -> &mut ProviderConfig {
        let name = kind.as_str().to_string();
        self.providers.entry(name).or_insert_with(|| ProviderConfig::inactive(kind))
    }
}
