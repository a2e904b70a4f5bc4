use crate::response::{write_location, ResponseSink};
use authgate_session::{Session, SessionStore};
use http::request::Parts;
use http::StatusCode;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Endpoint the provider returns the user agent to after logout.
///
/// It ends the local session and sends the user agent on to a landing page.
#[derive(Clone)]
pub struct OidcCallbackEndpoint {
    store: Option<Arc<dyn SessionStore>>,
    redirect_to: String,
}

impl Default for OidcCallbackEndpoint {
    fn default() -> Self {
        Self {
            store: None,
            redirect_to: "/".to_string(),
        }
    }
}

impl OidcCallbackEndpoint {
    /// An endpoint redirecting to `/` without a store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also delete invalidated sessions from `store`.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Where the user agent goes once logged out. Defaults to `/`.
    pub fn redirect_to(mut self, location: impl Into<String>) -> Self {
        self.redirect_to = location.into();
        self
    }

    /// Invalidate the session of `request` and redirect.
    ///
    /// Returns `400 Bad Request` when the request or response is missing or the
    /// request has no live session; nothing is invalidated then. Otherwise the
    /// session is invalidated exactly once and `307 Temporary Redirect` is returned.
    pub async fn logout(
        &self,
        request: Option<&Parts>,
        response: Option<&mut dyn ResponseSink>,
    ) -> StatusCode {
        let (Some(request), Some(response)) = (request, response) else {
            debug!("logout callback without request or response");
            return StatusCode::BAD_REQUEST;
        };

        let Some(session) = request
            .extensions
            .get::<Session>()
            .filter(|s| !s.is_invalidated())
        else {
            debug!("logout callback without a session");
            return StatusCode::BAD_REQUEST;
        };

        if session.invalidate() {
            info!(session_id = session.id(), "session invalidated");
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.delete_session(session.id()).await {
                warn!(session_id = session.id(), error = %e, "failed to delete session");
            }
        }

        if let Err(e) = write_location(response, StatusCode::TEMPORARY_REDIRECT, &self.redirect_to)
        {
            warn!(error = %e, "cannot write logout redirect");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
        StatusCode::TEMPORARY_REDIRECT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{request, session};
    use crate::BufferedResponse;
    use async_trait::async_trait;
    use authgate_core::AuthError;
    use http::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStore {
        deletes: AtomicUsize,
    }

    #[async_trait]
    impl SessionStore for CountingStore {
        async fn load_session(&self, _id: &str) -> Result<Option<Session>, AuthError> {
            Ok(None)
        }

        async fn save_session(&self, _session: &Session) -> Result<(), AuthError> {
            Ok(())
        }

        async fn delete_session(&self, _id: &str) -> Result<(), AuthError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn missing_request_is_rejected() {
        let mut response = BufferedResponse::new();
        let status = OidcCallbackEndpoint::new()
            .logout(None, Some(&mut response))
            .await;
        assert_ne!(status, StatusCode::OK);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(response.status().is_none());
    }

    #[tokio::test]
    async fn missing_response_is_rejected() {
        let session = session();
        let mut request = request(Method::GET, "/auth/oidc/logout/callback");
        request.extensions.insert(session.clone());

        let status = OidcCallbackEndpoint::new().logout(Some(&request), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!session.is_invalidated());
    }

    #[tokio::test]
    async fn request_without_session_is_rejected() {
        let request = request(Method::GET, "/auth/oidc/logout/callback");
        let mut response = BufferedResponse::new();
        let status = OidcCallbackEndpoint::new()
            .logout(Some(&request), Some(&mut response))
            .await;
        assert_ne!(status, StatusCode::OK);
        assert!(response.location().is_none());
    }

    #[tokio::test]
    async fn invalidates_session_once_and_redirects() {
        let store = Arc::new(CountingStore::default());
        let endpoint = OidcCallbackEndpoint::new()
            .with_store(store.clone())
            .redirect_to("/goodbye");
        let session = session();
        let mut request = request(Method::GET, "/auth/oidc/logout/callback");
        request.extensions.insert(session.clone());
        let mut response = BufferedResponse::new();

        let status = endpoint.logout(Some(&request), Some(&mut response)).await;

        assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.status(), Some(StatusCode::TEMPORARY_REDIRECT));
        assert_eq!(response.location(), Some("/goodbye"));
        assert!(session.is_invalidated());
        assert_eq!(store.deletes.load(Ordering::SeqCst), 1);

        let mut again = BufferedResponse::new();
        let status = endpoint.logout(Some(&request), Some(&mut again)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(store.deletes.load(Ordering::SeqCst), 1);
    }
}
