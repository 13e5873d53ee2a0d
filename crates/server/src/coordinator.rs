//! The session coordinator.
//!
//! Owns live conversations: accepts user messages, enforces at most one
//! in-flight generation per session with a FIFO queue of depth one, routes
//! progress and terminal events to the session's room, and translates
//! failures into the fixed user-facing apology plus a developer error event.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use consensus::{ConsensusEngine, ContextBuilder, EnginePhase};
use serde_json::Value;
use storage::{MessageRole, NewMessage, SharedRepository, StoredFile};
use tokio_util::sync::CancellationToken;
use tools::{ApprovalSink, DriveFacade, ToolError, UserContext};

use crate::{
    delivery::{DeliveryHub, EventPayload, ProcessingPhase},
    error::ApiError,
};

/// The fixed user-facing failure message.
pub const APOLOGY: &str =
    "I'm sorry, I encountered an error while processing your request. Please try again.";

/// How much history is fetched for context assembly; the builder trims
/// further.
const HISTORY_FETCH_LIMIT: usize = 50;

/// Canonicalize a wire session id: a JSON number or a numeric string.
pub fn parse_session_id(raw: Option<&Value>) -> Result<Option<i64>, ApiError> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    match raw {
        Value::Null => Ok(None),
        Value::Number(number) => number
            .as_i64()
            .map(Some)
            .ok_or_else(|| ApiError::invalid_session_id(number)),
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ApiError::invalid_session_id(text)),
        other => Err(ApiError::invalid_session_id(other)),
    }
}

/// Builds per-user Drive facades on demand. The OAuth handshake and token
/// refresh live behind this boundary.
pub trait DriveConnector: Send + Sync {
    /// The facade for a user, when their Drive is connected.
    fn facade_for(&self, user_id: i64) -> Option<Arc<dyn DriveFacade>>;
}

/// Persists proposed Drive edits through the repository.
pub struct RepositoryApprovalSink {
    repository: SharedRepository,
}

impl RepositoryApprovalSink {
    /// A sink writing to the given repository.
    pub fn new(repository: SharedRepository) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl ApprovalSink for RepositoryApprovalSink {
    async fn submit(&self, record: storage::ApprovalRecord) -> Result<(), ToolError> {
        self.repository
            .insert_approval(record)
            .await
            .map_err(|e| ToolError::HandlerError(format!("failed to persist approval request: {e}")))
    }
}

/// An inbound user message.
#[derive(Debug, Clone)]
pub struct PostMessage {
    /// Authenticated author.
    pub user_id: i64,
    /// Target session, or `None` to create one.
    pub session_id: Option<i64>,
    /// Message text.
    pub text: String,
    /// Files attached to this turn.
    pub attached_file_ids: Vec<i64>,
    /// Models to fan out over; empty selects the default model.
    pub selected_models: Vec<String>,
    /// Display name for the system prompt.
    pub user_name: Option<String>,
}

/// Acknowledgement for an accepted message.
#[derive(Debug, Clone)]
pub struct PostAck {
    /// Canonical session id.
    pub session_id: i64,
    /// Persisted user message id.
    pub message_id: i64,
    /// Whether a new session was created.
    pub created_session: bool,
    /// Whether the generation was queued behind an in-flight one.
    pub queued: bool,
}

#[derive(Debug, Clone)]
struct GenerationJob {
    session_id: i64,
    user_id: i64,
    user_message_id: i64,
    text: String,
    attached_file_ids: Vec<i64>,
    selected_models: Vec<String>,
    user_name: Option<String>,
}

#[derive(Default)]
struct SessionSlot {
    in_flight: bool,
    queued: VecDeque<GenerationJob>,
    cancel: CancellationToken,
}

/// Serializes generations per session and routes their events.
pub struct SessionCoordinator {
    repository: SharedRepository,
    engine: Arc<ConsensusEngine>,
    context_builder: ContextBuilder,
    delivery: Arc<DeliveryHub>,
    drive: Option<Arc<dyn DriveConnector>>,
    approval_sink: Arc<dyn ApprovalSink>,
    require_approval: bool,
    approval_ttl: Duration,
    slots: Mutex<HashMap<i64, SessionSlot>>,
}

impl SessionCoordinator {
    /// Build the coordinator.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: SharedRepository,
        engine: Arc<ConsensusEngine>,
        context_builder: ContextBuilder,
        delivery: Arc<DeliveryHub>,
        drive: Option<Arc<dyn DriveConnector>>,
        require_approval: bool,
        approval_ttl: Duration,
    ) -> Arc<Self> {
        let approval_sink = Arc::new(RepositoryApprovalSink::new(repository.clone()));

        Arc::new(Self {
            repository,
            engine,
            context_builder,
            delivery,
            drive,
            approval_sink,
            require_approval,
            approval_ttl,
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// The delivery hub events are routed through.
    pub fn delivery(&self) -> Arc<DeliveryHub> {
        self.delivery.clone()
    }

    /// The engine's model catalog.
    pub fn catalog(&self) -> &llm::ModelCatalog {
        self.engine.catalog()
    }

    /// Accept a user message, persist it, and start or queue a generation.
    pub async fn post_user_message(self: &Arc<Self>, post: PostMessage) -> Result<PostAck, ApiError> {
        let (session, created) = match post.session_id {
            Some(id) => {
                let session = self
                    .repository
                    .session(id)
                    .await?
                    .ok_or_else(|| ApiError::not_found("session"))?;

                if session.user_id != post.user_id {
                    return Err(ApiError::forbidden("session belongs to another user"));
                }

                (session, false)
            }
            None => {
                let title: String = post.text.chars().take(60).collect();
                let title = if title.is_empty() { "New chat".to_string() } else { title };

                let session = self.repository.create_session(post.user_id, &title).await?;
                (session, true)
            }
        };

        let message = self
            .repository
            .append_message(NewMessage {
                session_id: session.id,
                role: MessageRole::User,
                content: post.text.clone(),
                model_used: None,
                consensus_data: None,
            })
            .await?;

        if created {
            self.delivery.publish(
                session.id,
                EventPayload::SessionCreated {
                    session_id: session.id,
                    title: session.title.clone(),
                },
            );
        }

        let job = GenerationJob {
            session_id: session.id,
            user_id: post.user_id,
            user_message_id: message.id,
            text: post.text,
            attached_file_ids: post.attached_file_ids,
            selected_models: post.selected_models,
            user_name: post.user_name,
        };

        let queued = self.start_or_queue(job)?;

        Ok(PostAck {
            session_id: session.id,
            message_id: message.id,
            created_session: created,
            queued,
        })
    }

    /// Cancel any in-flight generation for the session.
    pub fn cancel(&self, session_id: i64) {
        let slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(slot) = slots.get(&session_id)
            && slot.in_flight
        {
            log::info!("cancelling in-flight generation for session {session_id}");
            slot.cancel.cancel();
        }
    }

    fn start_or_queue(self: &Arc<Self>, job: GenerationJob) -> Result<bool, ApiError> {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let slot = slots.entry(job.session_id).or_default();

        if slot.in_flight {
            if !slot.queued.is_empty() {
                return Err(ApiError::session_busy());
            }

            slot.queued.push_back(job);
            return Ok(true);
        }

        slot.in_flight = true;
        slot.cancel = CancellationToken::new();
        let cancel = slot.cancel.clone();
        drop(slots);

        tokio::spawn(Arc::clone(self).run_generation(job, cancel));
        Ok(false)
    }

    fn finish_and_maybe_continue(self: &Arc<Self>, session_id: i64) {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let Some(slot) = slots.get_mut(&session_id) else {
            return;
        };

        if let Some(job) = slot.queued.pop_front() {
            slot.cancel = CancellationToken::new();
            let cancel = slot.cancel.clone();
            drop(slots);

            tokio::spawn(Arc::clone(self).run_generation(job, cancel));
        } else {
            slot.in_flight = false;
        }
    }

    async fn run_generation(self: Arc<Self>, job: GenerationJob, cancel: CancellationToken) {
        let session_id = job.session_id;

        self.status(session_id, ProcessingPhase::Analyzing, "Assembling conversation context");

        match self.generate(&job, cancel).await {
            Ok(()) => {}
            Err(error) => {
                log::error!("generation for session {session_id} failed: {error}");

                self.delivery.publish(
                    session_id,
                    EventPayload::Error {
                        session_id: Some(session_id),
                        kind: error.kind().to_string(),
                        message: error.message().to_string(),
                    },
                );

                if error.kind() != "cancelled" {
                    self.emit_apology(&job).await;
                }
            }
        }

        self.finish_and_maybe_continue(session_id);
    }

    async fn generate(&self, job: &GenerationJob, cancel: CancellationToken) -> Result<(), ApiError> {
        let history: Vec<storage::StoredMessage> = self
            .repository
            .messages(job.session_id, Some(HISTORY_FETCH_LIMIT), None)
            .await?
            .into_iter()
            .filter(|message| message.id != job.user_message_id)
            .collect();

        let attached = self
            .repository
            .files_by_ids(job.user_id, &job.attached_file_ids)
            .await?;

        // Knowledge-base failures degrade to an empty section rather than
        // failing the turn.
        let kb: Vec<StoredFile> = match self.repository.files_for_user(job.user_id).await {
            Ok(files) => files,
            Err(error) => {
                log::warn!("knowledge base unavailable, continuing without it: {error}");
                Vec::new()
            }
        };

        let envelope = self.context_builder.build(
            job.user_name.as_deref(),
            &history,
            &job.text,
            &attached,
            &kb,
        );

        let selected = self.resolve_models(&job.selected_models);

        let mut ctx = UserContext::new(job.user_id);

        if let Some(connector) = &self.drive
            && let Some(facade) = connector.facade_for(job.user_id)
        {
            ctx = ctx.with_drive(facade);

            if self.require_approval {
                ctx = ctx.with_approvals(self.approval_sink.clone(), self.approval_ttl);
            }
        }

        let delivery = self.delivery.clone();
        let hook_session = job.session_id;
        let hook: consensus::PhaseHook = Arc::new(move |phase| {
            let (phase, message) = match phase {
                EnginePhase::FanOut => (ProcessingPhase::Processing, "Querying the selected models"),
                EnginePhase::Judge => (ProcessingPhase::Consensus, "Synthesizing the consensus answer"),
            };

            delivery.publish(
                hook_session,
                EventPayload::ProcessingStatus {
                    session_id: hook_session,
                    phase,
                    message: message.to_string(),
                },
            );
        });

        let result = self
            .engine
            .generate_consensus(envelope, &selected, &ctx, cancel, Some(hook))
            .await
            .map_err(|e| ApiError::from(&e))?;

        self.status(job.session_id, ProcessingPhase::Finalizing, "Saving the answer");

        let model_used = if selected.len() == 1 {
            selected.first().cloned()
        } else {
            Some("consensus".to_string())
        };

        let consensus_data = serde_json::to_value(&result).map_err(|e| {
            log::error!("failed to serialize consensus payload: {e}");
            ApiError::internal()
        })?;

        let message = self
            .repository
            .append_message(NewMessage {
                session_id: job.session_id,
                role: MessageRole::Assistant,
                content: result.final_consensus.clone(),
                model_used: model_used.clone(),
                consensus_data: Some(consensus_data.clone()),
            })
            .await?;

        self.delivery.publish(
            job.session_id,
            EventPayload::NewMessage {
                session_id: job.session_id,
                role: MessageRole::Assistant.as_str().to_string(),
                content: message.content,
                model_used,
                consensus_data: Some(consensus_data),
            },
        );

        Ok(())
    }

    fn resolve_models(&self, selected: &[String]) -> Vec<String> {
        if !selected.is_empty() {
            return selected.to_vec();
        }

        self.engine
            .catalog()
            .active()
            .next()
            .map(|entry| vec![entry.id.to_string()])
            .unwrap_or_default()
    }

    /// Persist and deliver the fixed apology as the turn's terminal message.
    async fn emit_apology(&self, job: &GenerationJob) {
        let persisted = self
            .repository
            .append_message(NewMessage {
                session_id: job.session_id,
                role: MessageRole::Assistant,
                content: APOLOGY.to_string(),
                model_used: None,
                consensus_data: None,
            })
            .await;

        if let Err(error) = persisted {
            log::error!("failed to persist apology message: {error}");
        }

        self.delivery.publish(
            job.session_id,
            EventPayload::NewMessage {
                session_id: job.session_id,
                role: MessageRole::Assistant.as_str().to_string(),
                content: APOLOGY.to_string(),
                model_used: None,
                consensus_data: None,
            },
        );
    }

    fn status(&self, session_id: i64, phase: ProcessingPhase, message: &str) {
        self.delivery.publish(
            session_id,
            EventPayload::ProcessingStatus {
                session_id,
                phase,
                message: message.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_strings_canonicalize() {
        let id = parse_session_id(Some(&serde_json::json!("42"))).unwrap();
        assert_eq!(id, Some(42));

        let id = parse_session_id(Some(&serde_json::json!(7))).unwrap();
        assert_eq!(id, Some(7));

        assert_eq!(parse_session_id(None).unwrap(), None);
        assert_eq!(parse_session_id(Some(&Value::Null)).unwrap(), None);
    }

    #[test]
    fn malformed_session_ids_are_rejected() {
        for raw in [
            serde_json::json!("42abc"),
            serde_json::json!("abc"),
            serde_json::json!(4.5),
            serde_json::json!(["42"]),
        ] {
            let error = parse_session_id(Some(&raw)).unwrap_err();
            assert_eq!(error.kind(), "invalid_session_id");
        }
    }
}
