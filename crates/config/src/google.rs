//! Google Drive integration settings.

use secrecy::SecretString;
use serde::Deserialize;

/// Google OAuth credentials and Drive policy.
///
/// The OAuth handshake itself lives behind the Drive facade; these values are
/// handed to it verbatim.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct GoogleConfig {
    /// OAuth client id.
    pub client_id: Option<String>,
    /// OAuth client secret.
    pub client_secret: Option<SecretString>,
    /// Exact OAuth callback URL; must match the provider configuration.
    pub redirect_uri: Option<String>,
    /// Route Drive writes through the approval workflow instead of applying
    /// them immediately.
    pub require_approval: bool,
    /// Seconds until a pending approval request expires.
    #[serde(default = "default_approval_ttl")]
    pub approval_ttl_secs: u64,
}

impl GoogleConfig {
    /// Whether Drive integration has complete credentials.
    pub fn is_configured(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some() && self.redirect_uri.is_some()
    }
}

fn default_approval_ttl() -> u64 {
    3_600
}
