//! Provider adapters for the consensus orchestrator.
//!
//! Exposes a uniform `generate` interface over OpenAI, xAI Grok, Anthropic
//! and DeepSeek, plus the canonical message types every adapter translates
//! to and from its provider's wire format.

mod catalog;
mod error;
mod http_client;
pub mod messages;
pub mod provider;

pub use catalog::{ModelCapabilities, ModelCatalog, ModelDescriptor};
pub use error::{LlmError, LlmResult};
pub use provider::{ChatProvider, ProviderSet, SharedProvider};
