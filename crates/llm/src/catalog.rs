//! The model catalog.
//!
//! Descriptors are compiled in; configuration decides which entries are
//! active by supplying provider credentials. A session may only select
//! active descriptors.

use config::{LlmConfig, ProviderKind};
use serde::Serialize;

/// Capability flags for one model.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModelCapabilities {
    /// Incremental output support.
    pub streaming: bool,
    /// Tool / function calling.
    pub function_calling: bool,
    /// Image input.
    pub vision: bool,
    /// Image output.
    pub image_generation: bool,
    /// Access to live search at generation time.
    pub realtime_search: bool,
}

/// Catalog entry for a selectable model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    /// Stable model id, e.g. `gpt-4.1-mini`.
    pub id: &'static str,
    /// Owning provider.
    pub provider: ProviderKind,
    /// Human-readable name for pickers.
    pub display_name: &'static str,
    /// Context window in tokens.
    pub context_window: u32,
    /// Capability flags.
    pub capabilities: ModelCapabilities,
    /// Whether the provider has credentials in this process.
    pub active: bool,
}

const FULL: ModelCapabilities = ModelCapabilities {
    streaming: true,
    function_calling: true,
    vision: true,
    image_generation: false,
    realtime_search: true,
};

const TEXT_TOOLS: ModelCapabilities = ModelCapabilities {
    streaming: true,
    function_calling: true,
    vision: false,
    image_generation: false,
    realtime_search: false,
};

/// The selectable model table.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    entries: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    /// Build the catalog, marking entries active per provider credentials.
    pub fn for_config(config: &LlmConfig) -> Self {
        let mut entries = builtin_entries();

        for entry in &mut entries {
            entry.active = config.provider_enabled(entry.provider);
        }

        Self { entries }
    }

    /// Look up a descriptor by id, active or not.
    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Look up an active descriptor by id.
    pub fn get_active(&self, id: &str) -> Option<&ModelDescriptor> {
        self.get(id).filter(|entry| entry.active)
    }

    /// All active entries, in catalog order.
    pub fn active(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.entries.iter().filter(|entry| entry.active)
    }

    /// All entries.
    pub fn entries(&self) -> &[ModelDescriptor] {
        &self.entries
    }
}

fn builtin_entries() -> Vec<ModelDescriptor> {
    fn entry(
        id: &'static str,
        provider: ProviderKind,
        display_name: &'static str,
        context_window: u32,
        capabilities: ModelCapabilities,
    ) -> ModelDescriptor {
        ModelDescriptor {
            id,
            provider,
            display_name,
            context_window,
            capabilities,
            active: false,
        }
    }

    vec![
        entry("gpt-4.1", ProviderKind::OpenAi, "GPT-4.1", 1_047_576, FULL),
        entry("gpt-4.1-mini", ProviderKind::OpenAi, "GPT-4.1 Mini", 1_047_576, FULL),
        entry("gpt-4o", ProviderKind::OpenAi, "GPT-4o", 128_000, FULL),
        entry(
            "grok-3-latest",
            ProviderKind::Xai,
            "Grok 3",
            131_072,
            ModelCapabilities {
                streaming: true,
                function_calling: true,
                vision: false,
                image_generation: true,
                realtime_search: true,
            },
        ),
        entry("grok-3-mini", ProviderKind::Xai, "Grok 3 Mini", 131_072, TEXT_TOOLS),
        entry(
            "claude-sonnet-4-20250514",
            ProviderKind::Anthropic,
            "Claude Sonnet 4",
            200_000,
            FULL,
        ),
        entry(
            "claude-3-5-haiku-20241022",
            ProviderKind::Anthropic,
            "Claude Haiku 3.5",
            200_000,
            TEXT_TOOLS,
        ),
        entry("deepseek-chat", ProviderKind::DeepSeek, "DeepSeek Chat", 65_536, TEXT_TOOLS),
        entry(
            "deepseek-reasoner",
            ProviderKind::DeepSeek,
            "DeepSeek Reasoner",
            65_536,
            ModelCapabilities {
                streaming: true,
                function_calling: false,
                vision: false,
                image_generation: false,
                realtime_search: false,
            },
        ),
    ]
}
