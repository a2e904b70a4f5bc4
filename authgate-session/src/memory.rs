use crate::{Session, SessionStore};
use async_trait::async_trait;
use authgate_core::AuthError;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// An in-process session store.
///
/// Sessions are kept as handles, so attribute changes are visible without an
/// explicit save. Invalid sessions are evicted on load and swept on every save.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemoryStore {
    /// Number of stored sessions, including ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load_session(&self, id: &str) -> Result<Option<Session>, AuthError> {
        let session = self.sessions.read().await.get(id).cloned();
        match session {
            Some(session) if session.is_valid() => Ok(Some(session)),
            Some(_) => {
                debug!(session_id = id, "evicting invalid session");
                self.sessions.write().await.remove(id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn save_session(&self, session: &Session) -> Result<(), AuthError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, stored| stored.is_valid());
        if sessions.len() < before {
            debug!(evicted = before - sessions.len(), "swept invalid sessions");
        }
        sessions.insert(session.id().to_string(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<(), AuthError> {
        self.sessions.write().await.remove(id);
        Ok(())
    }
}
