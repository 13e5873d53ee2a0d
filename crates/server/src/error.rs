//! API error mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use consensus::ConsensusError;
use serde::Serialize;
use storage::StorageError;

/// An error surfaced to API clients, with a stable kind string.
#[derive(Debug, Clone)]
pub struct ApiError {
    kind: String,
    message: String,
    status: StatusCode,
}

impl ApiError {
    fn new(kind: &str, message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            kind: kind.to_string(),
            message: message.into(),
            status,
        }
    }

    /// Missing or invalid credentials.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message, StatusCode::UNAUTHORIZED)
    }

    /// The caller may not touch this resource.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("forbidden", message, StatusCode::FORBIDDEN)
    }

    /// A session id that is neither a number nor a numeric string.
    pub fn invalid_session_id(raw: impl std::fmt::Display) -> Self {
        Self::new(
            "invalid_session_id",
            format!("'{raw}' is not a valid session id"),
            StatusCode::BAD_REQUEST,
        )
    }

    /// Malformed request input.
    pub fn argument_invalid(message: impl Into<String>) -> Self {
        Self::new("argument_invalid", message, StatusCode::BAD_REQUEST)
    }

    /// The referenced resource does not exist.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message, StatusCode::NOT_FOUND)
    }

    /// A generation is already in flight and the queue slot is taken.
    pub fn session_busy() -> Self {
        Self::new(
            "session_busy",
            "a generation is already queued for this session, try again shortly",
            StatusCode::TOO_MANY_REQUESTS,
        )
    }

    /// Internal failure; details stay in the logs.
    pub fn internal() -> Self {
        Self::new("internal_error", "internal server error", StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// The stable kind string.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Developer-facing message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::NotFound(what) => ApiError::not_found(what),
            StorageError::Conflict(message) => Self::new("conflict", message, StatusCode::CONFLICT),
            StorageError::Database(message) => {
                log::error!("storage failure: {message}");
                ApiError::internal()
            }
        }
    }
}

impl From<&ConsensusError> for ApiError {
    fn from(error: &ConsensusError) -> Self {
        match error {
            ConsensusError::NoModelsSelected => ApiError::argument_invalid("at least one model must be selected"),
            ConsensusError::AllProvidersFailed => {
                Self::new("all_providers_failed", error.to_string(), StatusCode::BAD_GATEWAY)
            }
            ConsensusError::Cancelled => Self::new("cancelled", error.to_string(), StatusCode::CONFLICT),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetails,
}

#[derive(Serialize)]
struct ErrorDetails {
    kind: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetails {
                kind: self.kind,
                message: self.message,
            },
        };

        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_the_wire_taxonomy() {
        assert_eq!(ApiError::unauthorized("x").kind(), "unauthorized");
        assert_eq!(ApiError::invalid_session_id("abc").kind(), "invalid_session_id");
        assert_eq!(ApiError::session_busy().kind(), "session_busy");
        assert_eq!(ApiError::from(&ConsensusError::AllProvidersFailed).kind(), "all_providers_failed");
    }

    #[test]
    fn storage_errors_do_not_leak_details() {
        let error = ApiError::from(StorageError::Database("password in dsn".into()));
        assert_eq!(error.kind(), "internal_error");
        assert!(!error.message().contains("password"));
    }
}
