use std::time::Duration;

use thiserror::Error;

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Provider-level errors.
///
/// Adapter failures never abort a consensus on their own; the engine captures
/// them into the per-model response slot and the generation survives as long
/// as one provider succeeds.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// Missing or rejected credentials. Never retried.
    #[error("provider rejected credentials: {0}")]
    Unauthorized(String),

    /// Provider throttled the request.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Provider-advertised wait, when the response carried one.
        retry_after: Option<Duration>,
        /// Provider error body.
        message: String,
    },

    /// The call did not complete within its deadline.
    #[error("provider call timed out")]
    Timeout,

    /// Provider rejected the request or tool schema shape.
    #[error("provider rejected request schema: {0}")]
    SchemaViolation(String),

    /// Transient upstream failure (5xx, connection refused, reset).
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The request asked for something this provider cannot do.
    #[error("unsupported capability: {0}")]
    UnsupportedCapability(String),
}

impl LlmError {
    /// Stable snake_case kind string used on the wire and in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout => "timeout",
            Self::SchemaViolation(_) => "schema_violation",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::UnsupportedCapability(_) => "unsupported_capability",
        }
    }

    /// Whether the retry policy may attempt this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::ProviderUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(LlmError::Timeout.kind(), "timeout");
        assert_eq!(
            LlmError::RateLimited {
                retry_after: None,
                message: "slow down".into()
            }
            .kind(),
            "rate_limited"
        );
        assert_eq!(LlmError::Unauthorized("bad key".into()).kind(), "unauthorized");
    }

    #[test]
    fn only_capacity_and_transient_errors_retry() {
        assert!(
            LlmError::RateLimited {
                retry_after: Some(Duration::from_secs(1)),
                message: String::new()
            }
            .is_retryable()
        );
        assert!(LlmError::ProviderUnavailable("502".into()).is_retryable());
        assert!(!LlmError::Unauthorized(String::new()).is_retryable());
        assert!(!LlmError::Timeout.is_retryable());
        assert!(!LlmError::SchemaViolation(String::new()).is_retryable());
    }
}
