//! Concord configuration structures to map the concord.toml configuration.
//!
//! Every documented environment key from the deployment surface
//! (`DATABASE_URL`, provider API keys, Google OAuth credentials, budget
//! knobs) overlays the file-based configuration through [`Config::apply_env`].

#![deny(missing_docs)]

mod auth;
mod context;
mod google;
mod llm;
mod loader;
mod server;
mod storage;

use std::path::Path;

pub use auth::AuthConfig;
pub use context::ContextConfig;
pub use google::GoogleConfig;
pub use llm::{LlmConfig, ProviderConfig, ProviderKind, ToolLoopConfig};
pub use server::ServerConfig;
pub use storage::{DatabaseUrl, StorageConfig};

use serde::Deserialize;

/// Main configuration structure for the Concord application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// LLM provider and consensus configuration settings.
    pub llm: LlmConfig,
    /// Context assembly budgets.
    pub context: ContextConfig,
    /// Google Drive integration settings.
    pub google: GoogleConfig,
    /// Client token signing settings.
    pub auth: AuthConfig,
    /// Storage backing settings.
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a file path, then overlay environment keys.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        let mut config = loader::load(path)?;
        config.apply_env();
        Ok(config)
    }

    /// Build a configuration from defaults and the environment alone.
    pub fn from_env() -> anyhow::Result<Config> {
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Overlay the documented environment keys on top of this configuration.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay configuration keys from an arbitrary lookup.
    ///
    /// The lookup receives the documented key names; tests pass a map here
    /// instead of mutating the process environment.
    pub fn apply_env_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        loader::overlay(self, &get);
    }

    /// Validates that the configuration can serve at least one provider.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }
}
