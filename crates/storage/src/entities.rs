//! Persisted domain entities.
//!
//! Sessions hold message ids, messages hold an opaque consensus blob; there
//! are no back-edges from tool calls to their enclosing message.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A registered account. Owns sessions and files.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    /// Immutable identity.
    pub id: i64,
    /// Login email.
    pub email: String,
    /// Optional display name.
    pub display_name: Option<String>,
    /// Registration instant.
    pub created_at: Timestamp,
}

/// An ordered conversation owned by one user.
#[derive(Debug, Clone, Serialize)]
pub struct ChatSession {
    /// Session id, the canonical integer form used on the wire.
    pub id: i64,
    /// Owning user.
    pub user_id: i64,
    /// Title, derived from the first message when not set explicitly.
    pub title: String,
    /// Creation instant.
    pub created_at: Timestamp,
}

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// End-user input.
    User,
    /// Generated answer.
    Assistant,
    /// Injected system content.
    System,
}

impl MessageRole {
    /// Stable storage tag.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }

    /// Parse a storage tag.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "system" => Some(MessageRole::System),
            _ => None,
        }
    }
}

/// A persisted session entry. Immutable once written.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    /// Message id.
    pub id: i64,
    /// Owning session.
    pub session_id: i64,
    /// Author role.
    pub role: MessageRole,
    /// Plain text or markdown content.
    pub content: String,
    /// Model tag for single-model answers.
    pub model_used: Option<String>,
    /// Opaque consensus payload attached to assistant messages.
    pub consensus_data: Option<Value>,
    /// Insertion instant; message order within a session follows it.
    pub created_at: Timestamp,
}

/// Fields for inserting a message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Owning session.
    pub session_id: i64,
    /// Author role.
    pub role: MessageRole,
    /// Content.
    pub content: String,
    /// Model tag.
    pub model_used: Option<String>,
    /// Consensus payload.
    pub consensus_data: Option<Value>,
}

/// A user-owned document.
#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    /// File id.
    pub id: i64,
    /// Owning user.
    pub user_id: i64,
    /// Original filename.
    pub filename: String,
    /// MIME type.
    pub content_type: String,
    /// Whether extraction completed.
    pub processed: bool,
    /// Extracted text, when available.
    pub extracted_text: Option<String>,
    /// Upload instant.
    pub uploaded_at: Timestamp,
}

impl StoredFile {
    /// Only processed files with extracted text may be injected into model
    /// context.
    pub fn context_eligible(&self) -> bool {
        self.processed && self.extracted_text.as_deref().is_some_and(|text| !text.is_empty())
    }
}

/// Lifecycle of a proposed Drive edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    /// Awaiting a user decision.
    Pending,
    /// Accepted, not yet written to Drive.
    Approved,
    /// Declined. Terminal.
    Rejected,
    /// Deadline passed without a decision. Terminal.
    Expired,
    /// Written to Drive. Terminal; implies a prior approval.
    Applied,
}

impl ApprovalStatus {
    /// Stable storage tag.
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
            ApprovalStatus::Applied => "applied",
        }
    }

    /// Parse a storage tag.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            "expired" => Some(ApprovalStatus::Expired),
            "applied" => Some(ApprovalStatus::Applied),
            _ => None,
        }
    }

    /// Whether no further transitions are allowed.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ApprovalStatus::Rejected | ApprovalStatus::Expired | ApprovalStatus::Applied
        )
    }
}

/// An illegal approval transition.
#[derive(Debug, thiserror::Error)]
#[error("cannot move approval from {from:?} to {to:?}")]
pub struct ApprovalTransition {
    /// Current status.
    pub from: ApprovalStatus,
    /// Requested status.
    pub to: ApprovalStatus,
}

/// A proposed Drive file edit awaiting user review.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRecord {
    /// Request id.
    pub id: String,
    /// User who must decide.
    pub user_id: i64,
    /// Target Drive file id.
    pub file_id: String,
    /// Content before the edit.
    pub original_content: String,
    /// Content the model proposes.
    pub proposed_content: String,
    /// Model-stated rationale for the edit.
    pub ai_reasoning: String,
    /// Model confidence in the edit.
    pub confidence: f64,
    /// Lifecycle status.
    pub status: ApprovalStatus,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Decision deadline.
    pub expires_at: Timestamp,
}

impl ApprovalRecord {
    fn transition(&mut self, from: ApprovalStatus, to: ApprovalStatus) -> Result<(), ApprovalTransition> {
        if self.status != from {
            return Err(ApprovalTransition { from: self.status, to });
        }

        self.status = to;
        Ok(())
    }

    /// Accept a pending request.
    pub fn approve(&mut self) -> Result<(), ApprovalTransition> {
        self.transition(ApprovalStatus::Pending, ApprovalStatus::Approved)
    }

    /// Decline a pending request.
    pub fn reject(&mut self) -> Result<(), ApprovalTransition> {
        self.transition(ApprovalStatus::Pending, ApprovalStatus::Rejected)
    }

    /// Mark an approved request as written to Drive.
    pub fn mark_applied(&mut self) -> Result<(), ApprovalTransition> {
        self.transition(ApprovalStatus::Approved, ApprovalStatus::Applied)
    }

    /// Expire a pending request whose deadline has passed.
    ///
    /// Returns whether the status changed.
    pub fn expire_if_due(&mut self, now: Timestamp) -> bool {
        if self.status == ApprovalStatus::Pending && now >= self.expires_at {
            self.status = ApprovalStatus::Expired;
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ApprovalRecord {
        let now = Timestamp::UNIX_EPOCH;
        ApprovalRecord {
            id: "a1".into(),
            user_id: 1,
            file_id: "drive-file".into(),
            original_content: "old".into(),
            proposed_content: "new".into(),
            ai_reasoning: "requested edit".into(),
            confidence: 0.9,
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at: now + jiff::Span::new().hours(1),
        }
    }

    #[test]
    fn applied_requires_prior_approval() {
        let mut approval = record();
        assert!(approval.mark_applied().is_err());

        approval.approve().unwrap();
        approval.mark_applied().unwrap();
        assert_eq!(approval.status, ApprovalStatus::Applied);
        assert!(approval.status.is_terminal());
    }

    #[test]
    fn terminal_statuses_admit_no_transitions() {
        let mut approval = record();
        approval.reject().unwrap();

        assert!(approval.approve().is_err());
        assert!(approval.mark_applied().is_err());
        assert!(!approval.expire_if_due(Timestamp::MAX));
    }

    #[test]
    fn pending_requests_expire_after_deadline() {
        let mut approval = record();
        assert!(!approval.expire_if_due(Timestamp::UNIX_EPOCH));
        assert!(approval.expire_if_due(Timestamp::UNIX_EPOCH + jiff::Span::new().hours(2)));
        assert_eq!(approval.status, ApprovalStatus::Expired);
    }

    #[test]
    fn unprocessed_files_are_not_context_eligible() {
        let file = StoredFile {
            id: 1,
            user_id: 1,
            filename: "notes.txt".into(),
            content_type: "text/plain".into(),
            processed: false,
            extracted_text: Some("text".into()),
            uploaded_at: Timestamp::UNIX_EPOCH,
        };
        assert!(!file.context_eligible());

        let empty = StoredFile {
            processed: true,
            extracted_text: Some(String::new()),
            ..file.clone()
        };
        assert!(!empty.context_eligible());
    }
}
