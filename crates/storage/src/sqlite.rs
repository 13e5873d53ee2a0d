//! SQLite-backed repository.
//!
//! One bundled SQLite connection behind a mutex. Statements here are short
//! and indexed; session-level write serialization is the coordinator's job.

use std::{path::Path, str::FromStr, sync::Mutex};

use async_trait::async_trait;
use jiff::Timestamp;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::{
    ApprovalRecord, ApprovalStatus, ChatSession, MessageRole, NewMessage, Repository, StorageError, StorageResult,
    StoredFile, StoredMessage, User,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    email        TEXT NOT NULL UNIQUE,
    display_name TEXT,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id    INTEGER NOT NULL REFERENCES users(id),
    title      TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id     INTEGER NOT NULL REFERENCES sessions(id),
    role           TEXT NOT NULL,
    content        TEXT NOT NULL,
    model_used     TEXT,
    consensus_data TEXT,
    created_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_session
    ON messages(session_id, created_at, id);

CREATE TABLE IF NOT EXISTS files (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id        INTEGER NOT NULL REFERENCES users(id),
    filename       TEXT NOT NULL,
    content_type   TEXT NOT NULL,
    processed      INTEGER NOT NULL DEFAULT 0,
    extracted_text TEXT,
    uploaded_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS approvals (
    id               TEXT PRIMARY KEY,
    user_id          INTEGER NOT NULL REFERENCES users(id),
    file_id          TEXT NOT NULL,
    original_content TEXT NOT NULL,
    proposed_content TEXT NOT NULL,
    ai_reasoning     TEXT NOT NULL,
    confidence       REAL NOT NULL,
    status           TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    expires_at       TEXT NOT NULL
);
"#;

/// Repository over a single SQLite database.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open or create the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open a process-private in-memory database.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        // journal_mode replies with the effective mode, so it goes through a
        // query; in-memory databases report "memory" instead of "wal".
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn timestamp(raw: &str) -> StorageResult<Timestamp> {
    Timestamp::from_str(raw).map_err(|e| StorageError::Database(format!("bad timestamp '{raw}': {e}")))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, String, Option<String>, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn build_user(parts: (i64, String, Option<String>, String)) -> StorageResult<User> {
    Ok(User {
        id: parts.0,
        email: parts.1,
        display_name: parts.2,
        created_at: timestamp(&parts.3)?,
    })
}

fn build_session(parts: (i64, i64, String, String)) -> StorageResult<ChatSession> {
    Ok(ChatSession {
        id: parts.0,
        user_id: parts.1,
        title: parts.2,
        created_at: timestamp(&parts.3)?,
    })
}

type MessageParts = (i64, i64, String, String, Option<String>, Option<String>, String);

fn build_message(parts: MessageParts) -> StorageResult<StoredMessage> {
    let role = MessageRole::parse(&parts.2)
        .ok_or_else(|| StorageError::Database(format!("unknown message role '{}'", parts.2)))?;

    let consensus_data = match parts.5 {
        Some(raw) => Some(serde_json::from_str(&raw)?),
        None => None,
    };

    Ok(StoredMessage {
        id: parts.0,
        session_id: parts.1,
        role,
        content: parts.3,
        model_used: parts.4,
        consensus_data,
        created_at: timestamp(&parts.6)?,
    })
}

type FileParts = (i64, i64, String, String, bool, Option<String>, String);

fn build_file(parts: FileParts) -> StorageResult<StoredFile> {
    Ok(StoredFile {
        id: parts.0,
        user_id: parts.1,
        filename: parts.2,
        content_type: parts.3,
        processed: parts.4,
        extracted_text: parts.5,
        uploaded_at: timestamp(&parts.6)?,
    })
}

type ApprovalParts = (String, i64, String, String, String, String, f64, String, String, String);

fn build_approval(parts: ApprovalParts) -> StorageResult<ApprovalRecord> {
    let status = ApprovalStatus::parse(&parts.7)
        .ok_or_else(|| StorageError::Database(format!("unknown approval status '{}'", parts.7)))?;

    Ok(ApprovalRecord {
        id: parts.0,
        user_id: parts.1,
        file_id: parts.2,
        original_content: parts.3,
        proposed_content: parts.4,
        ai_reasoning: parts.5,
        confidence: parts.6,
        status,
        created_at: timestamp(&parts.8)?,
        expires_at: timestamp(&parts.9)?,
    })
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn create_user(&self, email: &str, display_name: Option<&str>) -> StorageResult<User> {
        let conn = self.lock();
        let now = Timestamp::now().to_string();

        let result = conn.execute(
            "INSERT INTO users (email, display_name, created_at) VALUES (?1, ?2, ?3)",
            params![email, display_name, now],
        );

        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                return Err(StorageError::Conflict(format!("email '{email}' already registered")));
            }
            Err(e) => return Err(e.into()),
        }

        let id = conn.last_insert_rowid();

        build_user((id, email.to_string(), display_name.map(str::to_string), now))
    }

    async fn user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        let conn = self.lock();

        let parts = conn
            .query_row(
                "SELECT id, email, display_name, created_at FROM users WHERE email = ?1",
                params![email],
                user_from_row,
            )
            .optional()?;

        parts.map(build_user).transpose()
    }

    async fn user_by_id(&self, id: i64) -> StorageResult<Option<User>> {
        let conn = self.lock();

        let parts = conn
            .query_row(
                "SELECT id, email, display_name, created_at FROM users WHERE id = ?1",
                params![id],
                user_from_row,
            )
            .optional()?;

        parts.map(build_user).transpose()
    }

    async fn create_session(&self, user_id: i64, title: &str) -> StorageResult<ChatSession> {
        let conn = self.lock();
        let now = Timestamp::now().to_string();

        conn.execute(
            "INSERT INTO sessions (user_id, title, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, title, now],
        )?;

        build_session((conn.last_insert_rowid(), user_id, title.to_string(), now))
    }

    async fn session(&self, id: i64) -> StorageResult<Option<ChatSession>> {
        let conn = self.lock();

        let parts = conn
            .query_row(
                "SELECT id, user_id, title, created_at FROM sessions WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        parts.map(build_session).transpose()
    }

    async fn sessions_for_user(&self, user_id: i64) -> StorageResult<Vec<ChatSession>> {
        let conn = self.lock();

        let mut statement = conn.prepare(
            "SELECT id, user_id, title, created_at FROM sessions
             WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;

        let rows = statement.query_map(params![user_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;

        rows.map(|parts| build_session(parts?)).collect()
    }

    async fn append_message(&self, message: NewMessage) -> StorageResult<StoredMessage> {
        let conn = self.lock();
        let now = Timestamp::now().to_string();

        let session_exists: bool = conn
            .query_row("SELECT 1 FROM sessions WHERE id = ?1", params![message.session_id], |_| Ok(true))
            .optional()?
            .unwrap_or(false);

        if !session_exists {
            return Err(StorageError::NotFound("session"));
        }

        let consensus_data = message
            .consensus_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            "INSERT INTO messages (session_id, role, content, model_used, consensus_data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.session_id,
                message.role.as_str(),
                message.content,
                message.model_used,
                consensus_data,
                now
            ],
        )?;

        Ok(StoredMessage {
            id: conn.last_insert_rowid(),
            session_id: message.session_id,
            role: message.role,
            content: message.content,
            model_used: message.model_used,
            consensus_data: message.consensus_data,
            created_at: timestamp(&now)?,
        })
    }

    async fn messages(
        &self,
        session_id: i64,
        limit: Option<usize>,
        before: Option<i64>,
    ) -> StorageResult<Vec<StoredMessage>> {
        let conn = self.lock();

        let mut statement = conn.prepare(
            "SELECT id, session_id, role, content, model_used, consensus_data, created_at
             FROM messages
             WHERE session_id = ?1 AND (?2 IS NULL OR id < ?2)
             ORDER BY created_at ASC, id ASC",
        )?;

        let rows = statement.query_map(params![session_id, before], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?;

        let mut messages: Vec<StoredMessage> = rows
            .map(|parts| build_message(parts?))
            .collect::<StorageResult<Vec<_>>>()?;

        if let Some(limit) = limit
            && messages.len() > limit
        {
            messages.drain(..messages.len() - limit);
        }

        Ok(messages)
    }

    async fn create_file(
        &self,
        user_id: i64,
        filename: &str,
        content_type: &str,
        extracted_text: Option<&str>,
    ) -> StorageResult<StoredFile> {
        let conn = self.lock();
        let now = Timestamp::now().to_string();

        conn.execute(
            "INSERT INTO files (user_id, filename, content_type, processed, extracted_text, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![user_id, filename, content_type, extracted_text.is_some(), extracted_text, now],
        )?;

        build_file((
            conn.last_insert_rowid(),
            user_id,
            filename.to_string(),
            content_type.to_string(),
            extracted_text.is_some(),
            extracted_text.map(str::to_string),
            now,
        ))
    }

    async fn files_for_user(&self, user_id: i64) -> StorageResult<Vec<StoredFile>> {
        let conn = self.lock();

        let mut statement = conn.prepare(
            "SELECT id, user_id, filename, content_type, processed, extracted_text, uploaded_at
             FROM files WHERE user_id = ?1 ORDER BY uploaded_at DESC, id DESC",
        )?;

        let rows = statement.query_map(params![user_id], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?;

        rows.map(|parts| build_file(parts?)).collect()
    }

    async fn files_by_ids(&self, user_id: i64, ids: &[i64]) -> StorageResult<Vec<StoredFile>> {
        let mut files = Vec::with_capacity(ids.len());

        for id in ids {
            let conn = self.lock();

            let parts = conn
                .query_row(
                    "SELECT id, user_id, filename, content_type, processed, extracted_text, uploaded_at
                     FROM files WHERE id = ?1 AND user_id = ?2",
                    params![id, user_id],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                        ))
                    },
                )
                .optional()?;

            if let Some(parts) = parts {
                files.push(build_file(parts)?);
            }
        }

        Ok(files)
    }

    async fn insert_approval(&self, record: ApprovalRecord) -> StorageResult<()> {
        let conn = self.lock();

        conn.execute(
            "INSERT INTO approvals
             (id, user_id, file_id, original_content, proposed_content, ai_reasoning, confidence, status, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id,
                record.user_id,
                record.file_id,
                record.original_content,
                record.proposed_content,
                record.ai_reasoning,
                record.confidence,
                record.status.as_str(),
                record.created_at.to_string(),
                record.expires_at.to_string()
            ],
        )?;

        Ok(())
    }

    async fn approval(&self, id: &str) -> StorageResult<Option<ApprovalRecord>> {
        let conn = self.lock();

        let parts = conn
            .query_row(
                "SELECT id, user_id, file_id, original_content, proposed_content, ai_reasoning, confidence, status, created_at, expires_at
                 FROM approvals WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                    ))
                },
            )
            .optional()?;

        parts.map(build_approval).transpose()
    }

    async fn pending_approvals(&self, user_id: i64) -> StorageResult<Vec<ApprovalRecord>> {
        let conn = self.lock();

        let mut statement = conn.prepare(
            "SELECT id, user_id, file_id, original_content, proposed_content, ai_reasoning, confidence, status, created_at, expires_at
             FROM approvals WHERE user_id = ?1 AND status = 'pending' ORDER BY created_at ASC",
        )?;

        let rows = statement.query_map(params![user_id], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
            ))
        })?;

        rows.map(|parts| build_approval(parts?)).collect()
    }

    async fn update_approval(&self, record: &ApprovalRecord) -> StorageResult<()> {
        let conn = self.lock();

        let changed = conn.execute(
            "UPDATE approvals SET status = ?2 WHERE id = ?1",
            params![record.id, record.status.as_str()],
        )?;

        if changed == 0 {
            return Err(StorageError::NotFound("approval"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> SqliteRepository {
        SqliteRepository::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn messages_come_back_in_insertion_order() {
        let repo = repo();
        let user = repo.create_user("a@example.com", None).await.unwrap();
        let session = repo.create_session(user.id, "ordering").await.unwrap();

        for n in 0..5 {
            repo.append_message(NewMessage {
                session_id: session.id,
                role: if n % 2 == 0 { MessageRole::User } else { MessageRole::Assistant },
                content: format!("message {n}"),
                model_used: None,
                consensus_data: None,
            })
            .await
            .unwrap();
        }

        let messages = repo.messages(session.id, None, None).await.unwrap();
        assert_eq!(messages.len(), 5);

        for window in messages.windows(2) {
            assert!(window[0].created_at <= window[1].created_at);
            assert!(window[0].id < window[1].id);
        }

        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["message 0", "message 1", "message 2", "message 3", "message 4"]);
    }

    #[tokio::test]
    async fn limit_returns_most_recent_tail() {
        let repo = repo();
        let user = repo.create_user("a@example.com", None).await.unwrap();
        let session = repo.create_session(user.id, "tail").await.unwrap();

        for n in 0..4 {
            repo.append_message(NewMessage {
                session_id: session.id,
                role: MessageRole::User,
                content: format!("m{n}"),
                model_used: None,
                consensus_data: None,
            })
            .await
            .unwrap();
        }

        let tail = repo.messages(session.id, Some(2), None).await.unwrap();
        let contents: Vec<&str> = tail.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m2", "m3"]);
    }

    #[tokio::test]
    async fn consensus_data_round_trips_through_storage() {
        let repo = repo();
        let user = repo.create_user("a@example.com", None).await.unwrap();
        let session = repo.create_session(user.id, "blob").await.unwrap();

        let payload = serde_json::json!({
            "final_consensus": "Paris",
            "confidence": 0.92,
            "debate_points": ["one model hedged"]
        });

        let stored = repo
            .append_message(NewMessage {
                session_id: session.id,
                role: MessageRole::Assistant,
                content: "Paris".into(),
                model_used: Some("consensus".into()),
                consensus_data: Some(payload.clone()),
            })
            .await
            .unwrap();

        let fetched = repo.messages(session.id, None, None).await.unwrap();
        assert_eq!(fetched[0].id, stored.id);
        assert_eq!(fetched[0].consensus_data.as_ref().unwrap(), &payload);
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let repo = repo();
        repo.create_user("dup@example.com", None).await.unwrap();

        let error = repo.create_user("dup@example.com", None).await.unwrap_err();
        assert!(matches!(error, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn files_by_ids_skips_foreign_files() {
        let repo = repo();
        let owner = repo.create_user("owner@example.com", None).await.unwrap();
        let other = repo.create_user("other@example.com", None).await.unwrap();

        let mine = repo
            .create_file(owner.id, "mine.txt", "text/plain", Some("mine"))
            .await
            .unwrap();
        let theirs = repo
            .create_file(other.id, "theirs.txt", "text/plain", Some("theirs"))
            .await
            .unwrap();

        let files = repo.files_by_ids(owner.id, &[mine.id, theirs.id]).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, mine.id);
    }

    #[tokio::test]
    async fn approval_lifecycle_persists() {
        let repo = repo();
        let user = repo.create_user("a@example.com", None).await.unwrap();

        let now = Timestamp::now();
        let record = ApprovalRecord {
            id: "appr-1".into(),
            user_id: user.id,
            file_id: "drive-1".into(),
            original_content: "old".into(),
            proposed_content: "new".into(),
            ai_reasoning: "edit requested".into(),
            confidence: 0.8,
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at: now + jiff::Span::new().hours(1),
        };

        repo.insert_approval(record.clone()).await.unwrap();
        assert_eq!(repo.pending_approvals(user.id).await.unwrap().len(), 1);

        let mut approved = record;
        approved.approve().unwrap();
        repo.update_approval(&approved).await.unwrap();

        assert!(repo.pending_approvals(user.id).await.unwrap().is_empty());
        assert_eq!(
            repo.approval("appr-1").await.unwrap().unwrap().status,
            ApprovalStatus::Approved
        );
    }

    #[tokio::test]
    async fn survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("concord.db");

        {
            let repo = SqliteRepository::open(&path).unwrap();
            let user = repo.create_user("a@example.com", None).await.unwrap();
            repo.create_session(user.id, "persisted").await.unwrap();
        }

        let repo = SqliteRepository::open(&path).unwrap();
        let user = repo.user_by_email("a@example.com").await.unwrap().unwrap();
        let sessions = repo.sessions_for_user(user.id).await.unwrap();

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].title, "persisted");
    }
}
