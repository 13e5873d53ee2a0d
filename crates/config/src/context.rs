//! Context assembly budgets.

use serde::Deserialize;

/// Budgets for the context builder.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextConfig {
    /// Number of trailing session messages included in the envelope.
    pub max_messages: usize,
    /// Per-message character cap before truncation.
    pub message_chars: usize,
    /// Per-file character cap for attached and knowledge-base entries.
    pub file_chars: usize,
    /// Running cap for the knowledge-base section.
    pub max_kb_chars: usize,
    /// Fraction of a model's context window the whole envelope may consume.
    pub window_fraction: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            message_chars: 500,
            file_chars: 3_000,
            max_kb_chars: 15_000,
            window_fraction: 0.6,
        }
    }
}
