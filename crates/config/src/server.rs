//! HTTP server configuration.

use std::net::SocketAddr;

use serde::Deserialize;

/// Configuration for the HTTP and WebSocket listener.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server binds to. Defaults to 127.0.0.1:8000
    /// when unset.
    pub listen_address: Option<SocketAddr>,
    /// Health endpoint settings.
    pub health: HealthConfig,
}

impl ServerConfig {
    /// The address to bind, falling back to the default.
    pub fn listen_address_or_default(&self) -> SocketAddr {
        self.listen_address
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8000)))
    }
}

/// Health endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    /// Whether the health endpoint is exposed.
    pub enabled: bool,
    /// Path of the health endpoint.
    pub path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/health".to_string(),
        }
    }
}
