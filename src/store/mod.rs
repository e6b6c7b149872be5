//! Message store — session ownership checks and chat turn persistence.
//!
//! DESIGN
//! ======
//! The chat pipeline talks to a narrow trait so tests can run against an
//! in-memory double. `PgMessageStore` is the production implementation.
//!
//! Ownership is enforced inside the query: sessions are always fetched
//! scoped to the caller's principal, so a session belonging to someone else
//! looks exactly like a missing one. Message order comes from an insertion
//! sequence, not timestamps.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::envelope::ErrorCode;

/// Current time as milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> i64 {
    let Ok(elapsed) = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(elapsed.as_millis()).unwrap_or(0)
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        "SERVICE_UNAVAILABLE"
    }

    fn suggested_action(&self) -> Option<&'static str> {
        Some("retry_after_delay")
    }
}

/// A chat session row.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: Uuid,
    pub principal_id: String,
    pub title: Option<String>,
    pub created_at_ms: i64,
}

/// One persisted chat turn, oldest-first when listed.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: String,
    pub content: String,
    pub model_used: Option<String>,
    pub created_at_ms: i64,
}

/// An assistant turn awaiting insertion.
#[derive(Debug, Clone)]
pub struct NewAssistantMessage {
    pub session_id: Uuid,
    pub content: String,
    pub model_used: String,
}

// =============================================================================
// TRAIT
// =============================================================================

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Fetch a session only when it belongs to `principal_id`.
    async fn find_owned_session(
        &self,
        session_id: Uuid,
        principal_id: &str,
    ) -> Result<Option<SessionRecord>, StoreError>;

    /// All turns of a session, oldest first.
    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<StoredMessage>, StoreError>;

    /// Insert one assistant turn, returning its id.
    async fn append_assistant_message(&self, message: &NewAssistantMessage) -> Result<Uuid, StoreError>;
}

// =============================================================================
// POSTGRES IMPLEMENTATION
// =============================================================================

pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn find_owned_session(
        &self,
        session_id: Uuid,
        principal_id: &str,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, principal_id, title, created_at_ms
             FROM chat_sessions
             WHERE id = $1 AND principal_id = $2",
        )
        .bind(session_id)
        .bind(principal_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| SessionRecord {
            id: row.get("id"),
            principal_id: row.get("principal_id"),
            title: row.get("title"),
            created_at_ms: row.get("created_at_ms"),
        }))
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<StoredMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, model_used, created_at_ms
             FROM chat_messages
             WHERE session_id = $1
             ORDER BY seq ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| StoredMessage {
                id: row.get("id"),
                session_id: row.get("session_id"),
                role: row.get("role"),
                content: row.get("content"),
                model_used: row.get("model_used"),
                created_at_ms: row.get("created_at_ms"),
            })
            .collect())
    }

    async fn append_assistant_message(&self, message: &NewAssistantMessage) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO chat_messages (id, session_id, role, content, model_used, created_at_ms)
             VALUES ($1, $2, 'assistant', $3, $4, $5)",
        )
        .bind(id)
        .bind(message.session_id)
        .bind(&message.content)
        .bind(&message.model_used)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }
}

#[cfg(all(test, feature = "live-db-tests"))]
#[path = "live_test.rs"]
mod live_tests;
