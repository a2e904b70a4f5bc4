use crate::{Session, SessionConfig, SessionStore};
use async_trait::async_trait;
use authgate_core::{utils::extract_cookie, AuthError};
use http::request::Parts;
use std::sync::Arc;
use tracing::debug;

/// Resolves the session of a request, creating one when needed.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Return the session bound to `request`, or a new one.
    ///
    /// New sessions are not persisted until [`save_session`](Self::save_session).
    /// `Ok(None)` means no session can be provided for this request.
    async fn get_or_create_session(&self, request: &Parts) -> Result<Option<Session>, AuthError>;

    /// Persist changes made to `session`.
    async fn save_session(&self, session: &Session) -> Result<(), AuthError>;

    /// Replace `session` with a copy under a new id, e.g. after a login.
    async fn rotate_session(&self, session: &Session) -> Result<Session, AuthError> {
        session.rotate()
    }
}

/// A [`SessionFactory`] backed by a [`SessionStore`] and the session cookie.
pub struct StoreSessionFactory {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

impl StoreSessionFactory {
    /// Create a factory over `store`, reading the cookie described by `config`.
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    /// The underlying store.
    pub fn store(&self) -> Arc<dyn SessionStore> {
        self.store.clone()
    }

    /// The cookie configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

#[async_trait]
impl SessionFactory for StoreSessionFactory {
    async fn get_or_create_session(&self, request: &Parts) -> Result<Option<Session>, AuthError> {
        if let Some(session) = request.extensions.get::<Session>() {
            if session.is_valid() {
                return Ok(Some(session.clone()));
            }
        }

        if let Some(id) = extract_cookie(&request.headers, &self.config.cookie_name) {
            if let Some(session) = self.store.load_session(id).await? {
                return Ok(Some(session));
            }
        }

        let session = Session::new(self.config.lifetime());
        debug!(session_id = session.id(), "created session");
        Ok(Some(session))
    }

    async fn save_session(&self, session: &Session) -> Result<(), AuthError> {
        self.store.save_session(session).await
    }

    async fn rotate_session(&self, session: &Session) -> Result<Session, AuthError> {
        let previous = session.id().to_string();
        let rotated = session.rotate()?;
        self.store.save_session(&rotated).await?;
        self.store.delete_session(&previous).await?;
        debug!(from = %previous, to = rotated.id(), "rotated session");
        Ok(rotated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use http::Request;

    fn parts(builder: http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn reuses_session_from_cookie() {
        let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::default());
        let factory = StoreSessionFactory::new(store.clone(), SessionConfig::default());
        let existing = Session::new(chrono::Duration::minutes(5));
        store.save_session(&existing).await.unwrap();

        let request = parts(
            Request::builder().header("cookie", format!("authgate_session={}", existing.id())),
        );
        let session = factory.get_or_create_session(&request).await.unwrap().unwrap();
        assert!(session.ptr_eq(&existing));
    }

    #[tokio::test]
    async fn prefers_session_in_extensions() {
        let factory =
            StoreSessionFactory::new(Arc::new(MemoryStore::default()), SessionConfig::default());
        let existing = Session::new(chrono::Duration::minutes(5));
        let mut request = parts(Request::builder());
        request.extensions.insert(existing.clone());

        let session = factory.get_or_create_session(&request).await.unwrap().unwrap();
        assert!(session.ptr_eq(&existing));
    }

    #[tokio::test]
    async fn new_session_is_stored_only_when_saved() {
        let store = Arc::new(MemoryStore::default());
        let factory = StoreSessionFactory::new(store.clone(), SessionConfig::default());

        let request = parts(Request::builder().header("cookie", "authgate_session=unknown"));
        let session = factory.get_or_create_session(&request).await.unwrap().unwrap();
        assert_ne!(session.id(), "unknown");
        assert!(store.is_empty().await);

        factory.save_session(&session).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn rotation_replaces_stored_session() {
        let store = Arc::new(MemoryStore::default());
        let factory = StoreSessionFactory::new(store.clone(), SessionConfig::default());
        let session = Session::new(chrono::Duration::minutes(5));
        session.set_attribute("k", &1).unwrap();
        store.save_session(&session).await.unwrap();

        let rotated = factory.rotate_session(&session).await.unwrap();

        assert!(store.load_session(session.id()).await.unwrap().is_none());
        let loaded = store.load_session(rotated.id()).await.unwrap().unwrap();
        assert_eq!(loaded.attribute::<i32>("k").unwrap(), Some(1));
        assert_eq!(store.len().await, 1);
    }
}
