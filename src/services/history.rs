//! Session access — ownership resolution and history loading.
//!
//! Ownership strictly precedes history: the session is fetched scoped to the
//! caller's principal, and a session owned by someone else behaves exactly
//! like a missing one. History is only ever loaded for an owned session, so
//! a denied or absent session contributes nothing to the prompt and nothing
//! gets persisted later.

use uuid::Uuid;

use crate::llm::types::{Content, PromptMessage};
use crate::store::{MessageStore, SessionRecord, StoreError};

/// The caller's relationship to the requested session.
#[derive(Debug, Clone)]
pub enum SessionAccess {
    /// No session id supplied. Stateless turn; nothing is persisted.
    None,
    /// Session missing or owned by a different principal.
    Denied { session_id: Uuid },
    /// Caller owns the session.
    Owned(SessionRecord),
}

impl SessionAccess {
    /// Session the reply should be persisted into, if any.
    #[must_use]
    pub fn persist_target(&self) -> Option<Uuid> {
        match self {
            Self::Owned(record) => Some(record.id),
            Self::None | Self::Denied { .. } => None,
        }
    }
}

/// Resolve the caller's access to the requested session.
///
/// # Errors
///
/// Returns [`StoreError`] when the lookup itself fails.
pub async fn resolve_access(
    store: &dyn MessageStore,
    session_id: Option<Uuid>,
    principal_id: &str,
) -> Result<SessionAccess, StoreError> {
    let Some(session_id) = session_id else {
        return Ok(SessionAccess::None);
    };
    match store.find_owned_session(session_id, principal_id).await? {
        Some(record) => Ok(SessionAccess::Owned(record)),
        None => Ok(SessionAccess::Denied { session_id }),
    }
}

/// Prior turns for the model call, oldest first. Empty unless owned.
///
/// # Errors
///
/// Returns [`StoreError`] when listing fails.
pub async fn load_history(
    store: &dyn MessageStore,
    access: &SessionAccess,
) -> Result<Vec<PromptMessage>, StoreError> {
    let SessionAccess::Owned(record) = access else {
        return Ok(Vec::new());
    };
    let rows = store.list_messages(record.id).await?;
    Ok(rows
        .into_iter()
        .map(|row| PromptMessage { role: row.role, content: Content::Text(row.content) })
        .collect())
}

#[cfg(test)]
#[path = "history_test.rs"]
mod tests;
