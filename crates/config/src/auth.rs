//! Client token signing settings.

use secrecy::SecretString;
use serde::Deserialize;

/// Settings for issuing and validating client tokens.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// HS256 signing secret. Without it the server refuses to start.
    pub jwt_secret: Option<SecretString>,
    /// Token lifetime in seconds.
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_secs: 86_400,
        }
    }
}
