//! Client token issuance and validation.
//!
//! HS256 tokens signed with `JWT_SECRET_KEY`. Password verification is an
//! external collaborator; this module only owns the token boundary.

use jwt_compact::{
    AlgorithmExt, Claims, Header, Token, UntrustedToken,
    alg::{Hs256, Hs256Key},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Claims carried by a client token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User id, stringly per JWT convention.
    pub sub: String,
    /// User email, informational.
    pub email: String,
    /// Expiry as a unix timestamp in seconds.
    pub exp: i64,
}

/// Signs and validates client tokens.
#[derive(Clone)]
pub struct TokenAuthority {
    key: Hs256Key,
    ttl_secs: u64,
}

impl TokenAuthority {
    /// Build from the configured signing secret.
    pub fn new(secret: &SecretString, ttl_secs: u64) -> Self {
        Self {
            key: Hs256Key::new(secret.expose_secret().as_bytes()),
            ttl_secs,
        }
    }

    /// Issue a token for the user.
    pub fn issue(&self, user_id: i64, email: &str) -> Result<String, ApiError> {
        let exp = jiff::Timestamp::now().as_second() + self.ttl_secs.min(i64::MAX as u64) as i64;

        let claims = Claims::new(TokenClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            exp,
        });

        Hs256.token(&Header::empty(), &claims, &self.key).map_err(|e| {
            log::error!("failed to sign client token: {e}");
            ApiError::internal()
        })
    }

    /// Validate a token and return the authenticated identity.
    pub fn verify(&self, raw: &str) -> Result<AuthenticatedUser, ApiError> {
        let untrusted = UntrustedToken::new(raw).map_err(|_| ApiError::unauthorized("malformed token"))?;

        let token: Token<TokenClaims> = Hs256
            .validator(&self.key)
            .validate(&untrusted)
            .map_err(|_| ApiError::unauthorized("invalid token signature"))?;

        let claims = &token.claims().custom;

        if claims.exp <= jiff::Timestamp::now().as_second() {
            return Err(ApiError::unauthorized("token expired"));
        }

        let user_id = claims
            .sub
            .parse::<i64>()
            .map_err(|_| ApiError::unauthorized("invalid token subject"))?;

        Ok(AuthenticatedUser {
            user_id,
            email: claims.email.clone(),
        })
    }

    /// Validate an `Authorization: Bearer …` header value.
    pub fn verify_bearer(&self, header: &str) -> Result<AuthenticatedUser, ApiError> {
        let raw = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or_else(|| ApiError::unauthorized("expected a Bearer token"))?;

        self.verify(raw.trim())
    }
}

/// The identity a validated token resolves to.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// Canonical user id.
    pub user_id: i64,
    /// Email at issuance time.
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> TokenAuthority {
        TokenAuthority::new(&SecretString::from("test-secret".to_string()), 3_600)
    }

    #[test]
    fn issued_tokens_validate() {
        let authority = authority();
        let token = authority.issue(42, "a@example.com").unwrap();

        let user = authority.verify(&token).unwrap();
        assert_eq!(user.user_id, 42);
        assert_eq!(user.email, "a@example.com");
    }

    #[test]
    fn foreign_signatures_are_rejected() {
        let token = authority().issue(42, "a@example.com").unwrap();
        let other = TokenAuthority::new(&SecretString::from("other-secret".to_string()), 3_600);

        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let expired = TokenAuthority::new(&SecretString::from("test-secret".to_string()), 0);
        let token = expired.issue(42, "a@example.com").unwrap();

        // ttl 0 makes exp == now, which fails the strict check.
        assert!(expired.verify(&token).is_err());
    }

    #[test]
    fn bearer_prefix_is_required() {
        let authority = authority();
        let token = authority.issue(1, "a@example.com").unwrap();

        assert!(authority.verify_bearer(&format!("Bearer {token}")).is_ok());
        assert!(authority.verify_bearer(&token).is_err());
    }
}
