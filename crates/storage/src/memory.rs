//! In-memory repository for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use jiff::Timestamp;

use crate::{
    ApprovalRecord, ChatSession, NewMessage, Repository, StorageError, StorageResult, StoredFile, StoredMessage, User,
};

#[derive(Default)]
struct Inner {
    users: Vec<User>,
    sessions: Vec<ChatSession>,
    messages: Vec<StoredMessage>,
    files: Vec<StoredFile>,
    approvals: Vec<ApprovalRecord>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A repository living entirely in process memory.
#[derive(Default)]
pub struct MemoryRepository {
    inner: Mutex<Inner>,
}

impl MemoryRepository {
    /// An empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning only happens after a panic in this module; state is
        // still consistent for reads.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_user(&self, email: &str, display_name: Option<&str>) -> StorageResult<User> {
        let mut inner = self.lock();

        if inner.users.iter().any(|user| user.email == email) {
            return Err(StorageError::Conflict(format!("email '{email}' already registered")));
        }

        let user = User {
            id: inner.next_id(),
            email: email.to_string(),
            display_name: display_name.map(str::to_string),
            created_at: Timestamp::now(),
        };

        inner.users.push(user.clone());
        Ok(user)
    }

    async fn user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        Ok(self.lock().users.iter().find(|user| user.email == email).cloned())
    }

    async fn user_by_id(&self, id: i64) -> StorageResult<Option<User>> {
        Ok(self.lock().users.iter().find(|user| user.id == id).cloned())
    }

    async fn create_session(&self, user_id: i64, title: &str) -> StorageResult<ChatSession> {
        let mut inner = self.lock();

        let session = ChatSession {
            id: inner.next_id(),
            user_id,
            title: title.to_string(),
            created_at: Timestamp::now(),
        };

        inner.sessions.push(session.clone());
        Ok(session)
    }

    async fn session(&self, id: i64) -> StorageResult<Option<ChatSession>> {
        Ok(self.lock().sessions.iter().find(|session| session.id == id).cloned())
    }

    async fn sessions_for_user(&self, user_id: i64) -> StorageResult<Vec<ChatSession>> {
        let mut sessions: Vec<ChatSession> = self
            .lock()
            .sessions
            .iter()
            .filter(|session| session.user_id == user_id)
            .cloned()
            .collect();

        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(sessions)
    }

    async fn append_message(&self, message: NewMessage) -> StorageResult<StoredMessage> {
        let mut inner = self.lock();

        if !inner.sessions.iter().any(|session| session.id == message.session_id) {
            return Err(StorageError::NotFound("session"));
        }

        let stored = StoredMessage {
            id: inner.next_id(),
            session_id: message.session_id,
            role: message.role,
            content: message.content,
            model_used: message.model_used,
            consensus_data: message.consensus_data,
            created_at: Timestamp::now(),
        };

        inner.messages.push(stored.clone());
        Ok(stored)
    }

    async fn messages(
        &self,
        session_id: i64,
        limit: Option<usize>,
        before: Option<i64>,
    ) -> StorageResult<Vec<StoredMessage>> {
        let inner = self.lock();

        let mut rows: Vec<StoredMessage> = inner
            .messages
            .iter()
            .filter(|message| message.session_id == session_id)
            .filter(|message| before.is_none_or(|cutoff| message.id < cutoff))
            .cloned()
            .collect();

        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        if let Some(limit) = limit
            && rows.len() > limit
        {
            rows.drain(..rows.len() - limit);
        }

        Ok(rows)
    }

    async fn create_file(
        &self,
        user_id: i64,
        filename: &str,
        content_type: &str,
        extracted_text: Option<&str>,
    ) -> StorageResult<StoredFile> {
        let mut inner = self.lock();

        let file = StoredFile {
            id: inner.next_id(),
            user_id,
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            processed: extracted_text.is_some(),
            extracted_text: extracted_text.map(str::to_string),
            uploaded_at: Timestamp::now(),
        };

        inner.files.push(file.clone());
        Ok(file)
    }

    async fn files_for_user(&self, user_id: i64) -> StorageResult<Vec<StoredFile>> {
        let mut files: Vec<StoredFile> = self
            .lock()
            .files
            .iter()
            .filter(|file| file.user_id == user_id)
            .cloned()
            .collect();

        files.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at).then(b.id.cmp(&a.id)));
        Ok(files)
    }

    async fn files_by_ids(&self, user_id: i64, ids: &[i64]) -> StorageResult<Vec<StoredFile>> {
        let inner = self.lock();

        Ok(ids
            .iter()
            .filter_map(|id| {
                inner
                    .files
                    .iter()
                    .find(|file| file.id == *id && file.user_id == user_id)
                    .cloned()
            })
            .collect())
    }

    async fn insert_approval(&self, record: ApprovalRecord) -> StorageResult<()> {
        self.lock().approvals.push(record);
        Ok(())
    }

    async fn approval(&self, id: &str) -> StorageResult<Option<ApprovalRecord>> {
        Ok(self.lock().approvals.iter().find(|approval| approval.id == id).cloned())
    }

    async fn pending_approvals(&self, user_id: i64) -> StorageResult<Vec<ApprovalRecord>> {
        let mut pending: Vec<ApprovalRecord> = self
            .lock()
            .approvals
            .iter()
            .filter(|approval| approval.user_id == user_id && approval.status == crate::ApprovalStatus::Pending)
            .cloned()
            .collect();

        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    async fn update_approval(&self, record: &ApprovalRecord) -> StorageResult<()> {
        let mut inner = self.lock();

        let Some(slot) = inner.approvals.iter_mut().find(|approval| approval.id == record.id) else {
            return Err(StorageError::NotFound("approval"));
        };

        *slot = record.clone();
        Ok(())
    }
}
