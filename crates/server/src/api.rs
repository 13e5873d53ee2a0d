//! HTTP API handlers.
//!
//! These endpoints exist for clients in the ecosystem; the hard engineering
//! lives in the coordinator and engine. Handlers authenticate with a Bearer
//! token, delegate, and map errors through [`ApiError`].

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, header::AUTHORIZATION},
};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storage::{ApprovalRecord, ApprovalStatus, ChatSession, StoredFile, StoredMessage};

use crate::{
    AppState,
    auth::AuthenticatedUser,
    coordinator::{PostMessage, parse_session_id},
    error::ApiError,
};

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthenticatedUser, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized("missing Authorization header"))?
        .to_str()
        .map_err(|_| ApiError::unauthorized("malformed Authorization header"))?;

    state.auth.verify_bearer(header)
}

// ── Auth ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct LoginRequest {
    email: String,
    // Verified by the external auth collaborator; accepted here so the
    // endpoint shape matches clients.
    #[serde(default)]
    #[allow(dead_code)]
    password: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginResponse {
    access_token: String,
    token_type: &'static str,
}

/// Issue a client token, registering the account on first login.
pub(crate) async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    if request.email.trim().is_empty() {
        return Err(ApiError::argument_invalid("email must not be empty"));
    }

    let user = match state.repository.user_by_email(&request.email).await? {
        Some(user) => user,
        None => state.repository.create_user(&request.email, None).await?,
    };

    let access_token = state.auth.issue(user.id, &user.email)?;

    Ok(Json(LoginResponse {
        access_token,
        token_type: "bearer",
    }))
}

// ── Chat ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct ChatMessageRequest {
    #[serde(default)]
    session_id: Option<Value>,
    message: String,
    #[serde(default)]
    attached_file_ids: Vec<i64>,
    #[serde(default)]
    selected_models: Vec<String>,
    #[serde(default)]
    user_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatMessageResponse {
    session_id: i64,
    message_id: i64,
    session_created: bool,
    queued: bool,
}

/// HTTP fallback for posting a user message.
pub(crate) async fn post_chat_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatMessageRequest>,
) -> Result<Json<ChatMessageResponse>, ApiError> {
    let user = authenticate(&state, &headers)?;
    let session_id = parse_session_id(request.session_id.as_ref())?;

    if request.message.trim().is_empty() {
        return Err(ApiError::argument_invalid("message must not be empty"));
    }

    let ack = state
        .coordinator
        .post_user_message(PostMessage {
            user_id: user.user_id,
            session_id,
            text: request.message,
            attached_file_ids: request.attached_file_ids,
            selected_models: request.selected_models,
            user_name: request.user_name,
        })
        .await?;

    Ok(Json(ChatMessageResponse {
        session_id: ack.session_id,
        message_id: ack.message_id,
        session_created: ack.created_session,
        queued: ack.queued,
    }))
}

/// The authenticated user's sessions, newest first.
pub(crate) async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatSession>>, ApiError> {
    let user = authenticate(&state, &headers)?;
    let sessions = state.repository.sessions_for_user(user.user_id).await?;

    Ok(Json(sessions))
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagesQuery {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    before: Option<i64>,
}

/// A session's messages in insertion order.
pub(crate) async fn session_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<i64>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    let user = authenticate(&state, &headers)?;

    let session = state
        .repository
        .session(session_id)
        .await?
        .ok_or_else(|| ApiError::not_found("session"))?;

    if session.user_id != user.user_id {
        return Err(ApiError::forbidden("session belongs to another user"));
    }

    let messages = state
        .repository
        .messages(session_id, query.limit, query.before)
        .await?;

    Ok(Json(messages))
}

/// Cancel the session's in-flight generation.
pub(crate) async fn cancel_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let user = authenticate(&state, &headers)?;

    let session = state
        .repository
        .session(session_id)
        .await?
        .ok_or_else(|| ApiError::not_found("session"))?;

    if session.user_id != user.user_id {
        return Err(ApiError::forbidden("session belongs to another user"));
    }

    state.coordinator.cancel(session_id);

    Ok(Json(serde_json::json!({"cancelled": true})))
}

// ── Catalog & files ─────────────────────────────────────────────────────────

/// Active model catalog entries.
pub(crate) async fn list_models(State(state): State<AppState>) -> Json<Vec<llm::ModelDescriptor>> {
    let models: Vec<llm::ModelDescriptor> = state.coordinator.catalog().active().cloned().collect();
    Json(models)
}

/// Metadata for the user's files.
pub(crate) async fn list_files(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<FileSummary>>, ApiError> {
    let user = authenticate(&state, &headers)?;
    let files = state.repository.files_for_user(user.user_id).await?;

    Ok(Json(files.iter().map(FileSummary::from).collect()))
}

#[derive(Debug, Serialize)]
pub(crate) struct FileSummary {
    id: i64,
    filename: String,
    content_type: String,
    processed: bool,
    uploaded_at: Timestamp,
}

impl From<&StoredFile> for FileSummary {
    fn from(file: &StoredFile) -> Self {
        Self {
            id: file.id,
            filename: file.filename.clone(),
            content_type: file.content_type.clone(),
            processed: file.processed,
            uploaded_at: file.uploaded_at,
        }
    }
}

/// A file's extracted text.
pub(crate) async fn file_content(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(file_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let user = authenticate(&state, &headers)?;

    let files = state.repository.files_by_ids(user.user_id, &[file_id]).await?;
    let file = files.first().ok_or_else(|| ApiError::not_found("file"))?;

    Ok(Json(serde_json::json!({
        "id": file.id,
        "filename": file.filename,
        "processed": file.processed,
        "content": file.extracted_text,
    })))
}

/// Whether Drive integration is configured and connected for this user.
pub(crate) async fn google_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user = authenticate(&state, &headers)?;

    let connected = state
        .drive
        .as_ref()
        .is_some_and(|connector| connector.facade_for(user.user_id).is_some());

    Ok(Json(serde_json::json!({
        "configured": state.google_configured,
        "connected": connected,
    })))
}

// ── Approvals ───────────────────────────────────────────────────────────────

/// Pending approval requests, with read-time expiry.
pub(crate) async fn list_approvals(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ApprovalRecord>>, ApiError> {
    let user = authenticate(&state, &headers)?;
    let now = Timestamp::now();

    let mut still_pending = Vec::new();

    for mut approval in state.repository.pending_approvals(user.user_id).await? {
        if approval.expire_if_due(now) {
            state.repository.update_approval(&approval).await?;
            continue;
        }

        still_pending.push(approval);
    }

    Ok(Json(still_pending))
}

#[derive(Debug, Deserialize)]
pub(crate) struct DecideRequest {
    approve: bool,
}

/// Decide a pending approval; approved document edits are applied to Drive
/// when the user's facade is available.
pub(crate) async fn decide_approval(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(approval_id): Path<String>,
    Json(request): Json<DecideRequest>,
) -> Result<Json<ApprovalRecord>, ApiError> {
    let user = authenticate(&state, &headers)?;

    let mut approval = state
        .repository
        .approval(&approval_id)
        .await?
        .ok_or_else(|| ApiError::not_found("approval request"))?;

    if approval.user_id != user.user_id {
        return Err(ApiError::forbidden("approval belongs to another user"));
    }

    if approval.expire_if_due(Timestamp::now()) {
        state.repository.update_approval(&approval).await?;
        return Err(ApiError::argument_invalid("approval request has expired"));
    }

    let transition = if request.approve {
        approval.approve()
    } else {
        approval.reject()
    };

    transition.map_err(|e| ApiError::argument_invalid(e.to_string()))?;
    state.repository.update_approval(&approval).await?;

    if approval.status == ApprovalStatus::Approved
        && let Some(facade) = state
            .drive
            .as_ref()
            .and_then(|connector| connector.facade_for(user.user_id))
    {
        match facade.edit_document(&approval.file_id, &approval.proposed_content).await {
            Ok(()) => {
                if approval.mark_applied().is_ok() {
                    state.repository.update_approval(&approval).await?;
                }
            }
            Err(error) => {
                log::error!("failed to apply approved edit {approval_id}: {error}");
            }
        }
    }

    Ok(Json(approval))
}
