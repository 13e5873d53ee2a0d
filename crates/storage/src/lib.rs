//! Repository layer over users, sessions, messages, files and approvals.
//!
//! The orchestrator only sees the [`Repository`] trait; backends are SQLite
//! (via `DATABASE_URL`) and an in-memory implementation used by tests.

#![deny(missing_docs)]

mod entities;
mod memory;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use config::DatabaseUrl;

pub use entities::{
    ApprovalRecord, ApprovalStatus, ApprovalTransition, ChatSession, MessageRole, NewMessage, StoredFile,
    StoredMessage, User,
};
pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(&'static str),

    /// Unique constraint or state conflict.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backend failure.
    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(error: rusqlite::Error) -> Self {
        StorageError::Database(error.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(error: serde_json::Error) -> Self {
        StorageError::Database(format!("payload serialization: {error}"))
    }
}

/// Result alias for repository calls.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Shared repository handle.
pub type SharedRepository = Arc<dyn Repository>;

/// Uniform persistence interface.
///
/// Ordering contract: [`Repository::messages`] returns rows sorted by
/// insertion time (id as tie-break), ascending. Writes to one session are
/// serialized by the session coordinator; reads may proceed concurrently.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert a user. Fails with `Conflict` when the email is taken.
    async fn create_user(&self, email: &str, display_name: Option<&str>) -> StorageResult<User>;

    /// Look up a user by email.
    async fn user_by_email(&self, email: &str) -> StorageResult<Option<User>>;

    /// Look up a user by id.
    async fn user_by_id(&self, id: i64) -> StorageResult<Option<User>>;

    /// Create a session owned by the user.
    async fn create_session(&self, user_id: i64, title: &str) -> StorageResult<ChatSession>;

    /// Look up a session.
    async fn session(&self, id: i64) -> StorageResult<Option<ChatSession>>;

    /// The user's sessions, newest first.
    async fn sessions_for_user(&self, user_id: i64) -> StorageResult<Vec<ChatSession>>;

    /// Append a message to its session.
    async fn append_message(&self, message: NewMessage) -> StorageResult<StoredMessage>;

    /// A session's messages in insertion order, optionally limited to the
    /// `limit` entries before message id `before`.
    async fn messages(
        &self,
        session_id: i64,
        limit: Option<usize>,
        before: Option<i64>,
    ) -> StorageResult<Vec<StoredMessage>>;

    /// Insert a file record. `extracted_text` present marks it processed.
    async fn create_file(
        &self,
        user_id: i64,
        filename: &str,
        content_type: &str,
        extracted_text: Option<&str>,
    ) -> StorageResult<StoredFile>;

    /// The user's files, newest first.
    async fn files_for_user(&self, user_id: i64) -> StorageResult<Vec<StoredFile>>;

    /// Look up files by id, skipping ids the user does not own.
    async fn files_by_ids(&self, user_id: i64, ids: &[i64]) -> StorageResult<Vec<StoredFile>>;

    /// Insert an approval request.
    async fn insert_approval(&self, record: ApprovalRecord) -> StorageResult<()>;

    /// Look up an approval request.
    async fn approval(&self, id: &str) -> StorageResult<Option<ApprovalRecord>>;

    /// The user's pending approval requests, oldest first.
    async fn pending_approvals(&self, user_id: i64) -> StorageResult<Vec<ApprovalRecord>>;

    /// Persist an approval's current state.
    async fn update_approval(&self, record: &ApprovalRecord) -> StorageResult<()>;
}

/// Open the repository selected by `DATABASE_URL`.
pub fn open(url: &DatabaseUrl) -> StorageResult<SharedRepository> {
    let repository: SharedRepository = match url {
        DatabaseUrl::Memory => Arc::new(SqliteRepository::open_in_memory()?),
        DatabaseUrl::SqliteFile(path) => Arc::new(SqliteRepository::open(path)?),
    };

    Ok(repository)
}
