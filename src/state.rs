//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! Everything inside is cheap to clone: the store and model set sit behind
//! `Arc`, the limiter shares its interior, and the limits are `Copy`.
//! The store and model fields are trait-facing so tests can substitute
//! in-memory doubles without a database or network.

use std::sync::Arc;

use crate::config::ChatLimits;
use crate::llm::catalog::ModelSet;
use crate::rate_limit::RateLimiter;
use crate::store::MessageStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MessageStore>,
    pub models: Arc<ModelSet>,
    pub rate_limiter: RateLimiter,
    pub limits: ChatLimits,
}

impl AppState {
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        models: Arc<ModelSet>,
        rate_limiter: RateLimiter,
        limits: ChatLimits,
    ) -> Self {
        Self { store, models, rate_limiter, limits }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::llm::config::HostedApiConfig;
    use crate::rate_limit::{RateLimitConfig, RateLimiter};
    use crate::store::{NewAssistantMessage, SessionRecord, StoreError, StoredMessage};

    /// In-memory store double. Seed sessions and messages directly; writes
    /// are counted so tests can assert exactly-once persistence.
    #[derive(Default)]
    pub struct MemoryStore {
        pub sessions: Mutex<Vec<SessionRecord>>,
        pub messages: Mutex<Vec<StoredMessage>>,
        pub writes: AtomicUsize,
        /// When set, every write fails with a store error.
        pub fail_writes: bool,
    }

    impl MemoryStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// A store holding one session owned by `principal_id`.
        pub fn with_session(principal_id: &str) -> (Self, Uuid) {
            let store = Self::new();
            let session_id = Uuid::new_v4();
            store.sessions.lock().unwrap().push(SessionRecord {
                id: session_id,
                principal_id: principal_id.to_string(),
                title: Some("test session".to_string()),
                created_at_ms: 1,
            });
            (store, session_id)
        }

        /// Seed one prior turn into a session.
        pub fn push_message(&self, session_id: Uuid, role: &str, content: &str) {
            let mut messages = self.messages.lock().unwrap();
            let created_at_ms = 1 + messages.len() as i64;
            messages.push(StoredMessage {
                id: Uuid::new_v4(),
                session_id,
                role: role.to_string(),
                content: content.to_string(),
                model_used: None,
                created_at_ms,
            });
        }

        pub fn write_count(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageStore for MemoryStore {
        async fn find_owned_session(
            &self,
            session_id: Uuid,
            principal_id: &str,
        ) -> Result<Option<SessionRecord>, StoreError> {
            let sessions = self.sessions.lock().unwrap();
            Ok(sessions
                .iter()
                .find(|s| s.id == session_id && s.principal_id == principal_id)
                .cloned())
        }

        async fn list_messages(&self, session_id: Uuid) -> Result<Vec<StoredMessage>, StoreError> {
            let messages = self.messages.lock().unwrap();
            Ok(messages.iter().filter(|m| m.session_id == session_id).cloned().collect())
        }

        async fn append_assistant_message(
            &self,
            message: &NewAssistantMessage,
        ) -> Result<Uuid, StoreError> {
            if self.fail_writes {
                return Err(StoreError::Database(sqlx::Error::PoolClosed));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            let id = Uuid::new_v4();
            let mut messages = self.messages.lock().unwrap();
            let created_at_ms = 1 + messages.len() as i64;
            messages.push(StoredMessage {
                id,
                session_id: message.session_id,
                role: "assistant".to_string(),
                content: message.content.clone(),
                model_used: Some(message.model_used.clone()),
                created_at_ms,
            });
            Ok(id)
        }
    }

    /// App state wired to the given store, no live backends, and a limiter
    /// generous enough to never fire in tests.
    pub fn test_app_state(store: Arc<MemoryStore>) -> AppState {
        AppState::new(
            store,
            Arc::new(ModelSet::new(None, None, HostedApiConfig::default())),
            RateLimiter::with_config(RateLimitConfig {
                per_ip_limit: 10_000,
                ..RateLimitConfig::default()
            }),
            ChatLimits::default(),
        )
    }
}
