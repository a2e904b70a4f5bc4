use crate::response::{write_location, ResponseSink};
use crate::{Configured, Missing};
use authgate_core::{AuthError, Identity, OidcCredentials};
use authgate_oidc::{ensure_ready, Evaluation, SharedConfiguration};
use authgate_session::{SecurityTokenHolder, Session, SessionFactory};
use http::request::Parts;
use http::{Method, StatusCode};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Session attribute holding the path and query a user asked for before being
/// sent to the provider.
pub const REQUESTED_URL_KEY: &str = "authgate.oidc.requested_url";

/// Authentication type reported by tokens produced here.
pub const AUTHENTICATION_TYPE: &str = "OIDC";

/// What the handler did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Nothing to do; the request continues unauthenticated.
    NoAction,
    /// The response now redirects to the identity provider.
    Redirected,
    /// A token is available.
    Completed,
    /// Authentication failed.
    Error,
}

/// Credentials plus the identity derived from them.
#[derive(Debug, Clone, PartialEq)]
pub struct OidcAuthenticationToken {
    credentials: OidcCredentials,
    identity: Option<Identity>,
}

impl OidcAuthenticationToken {
    /// Wrap credentials and the identity derived from them.
    pub fn new(credentials: OidcCredentials, identity: Option<Identity>) -> Self {
        Self {
            credentials,
            identity,
        }
    }

    /// The provider credentials.
    pub fn credentials(&self) -> &OidcCredentials {
        &self.credentials
    }

    /// `None` for plain OAuth credentials without an ID token.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Always [`AUTHENTICATION_TYPE`].
    pub fn authentication_type(&self) -> &'static str {
        AUTHENTICATION_TYPE
    }
}

/// The normalized outcome of [`OidcHandler::get_normalized_token`].
#[derive(Debug)]
pub struct HandlerResult {
    status: Status,
    token: Option<OidcAuthenticationToken>,
    session: Option<Session>,
    error: Option<AuthError>,
}

impl HandlerResult {
    fn no_action(session: Option<Session>) -> Self {
        Self {
            status: Status::NoAction,
            token: None,
            session,
            error: None,
        }
    }

    fn redirected(session: Session) -> Self {
        Self {
            status: Status::Redirected,
            token: None,
            session: Some(session),
            error: None,
        }
    }

    fn completed(token: OidcAuthenticationToken, session: Session) -> Self {
        Self {
            status: Status::Completed,
            token: Some(token),
            session: Some(session),
            error: None,
        }
    }

    fn failed(error: AuthError, session: Option<Session>) -> Self {
        Self {
            status: Status::Error,
            token: None,
            session,
            error: Some(error),
        }
    }

    /// What happened.
    pub fn status(&self) -> Status {
        self.status
    }

    /// The token, for [`Status::Completed`].
    pub fn token(&self) -> Option<&OidcAuthenticationToken> {
        self.token.as_ref()
    }

    /// The session the request was evaluated against. After a login this is a
    /// new session replacing the one the request arrived with.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// The failure behind [`Status::Error`].
    pub fn error(&self) -> Option<&AuthError> {
        self.error.as_ref()
    }

    /// Consume the result, keeping the token.
    pub fn into_token(self) -> Option<OidcAuthenticationToken> {
        self.token
    }
}

/// Turns requests into [`HandlerResult`]s, driving the OIDC flow when needed.
#[derive(Clone)]
pub struct OidcHandler {
    configuration: SharedConfiguration,
    session_factory: Option<Arc<dyn SessionFactory>>,
}

impl OidcHandler {
    /// A handler without a session factory: requests that do not already carry
    /// a session are left alone.
    pub fn new(configuration: SharedConfiguration) -> Self {
        Self {
            configuration,
            session_factory: None,
        }
    }

    /// Create a new [`OidcHandlerBuilder`].
    pub fn builder() -> OidcHandlerBuilder<Missing> {
        OidcHandlerBuilder::default()
    }

    /// The shared handler configuration.
    pub fn configuration(&self) -> &SharedConfiguration {
        &self.configuration
    }

    /// The session factory, if any.
    pub fn session_factory(&self) -> Option<&Arc<dyn SessionFactory>> {
        self.session_factory.as_ref()
    }

    /// Inspect `request` and produce a normalized result.
    ///
    /// `HEAD` requests and requests without a session (when no factory can create
    /// one) get a `200` response flushed once and [`Status::NoAction`]. Stored
    /// credentials complete immediately. Anything else is evaluated by the
    /// identity provider client; a redirect is written to `response` only when
    /// `resolve` is set, and only then is the session saved.
    ///
    /// A fresh login moves the session to a new id through the factory.
    pub async fn get_normalized_token(
        &self,
        request: &Parts,
        response: &mut dyn ResponseSink,
        resolve: bool,
    ) -> HandlerResult {
        if request.method == Method::HEAD {
            debug!(path = request.uri.path(), "answering HEAD request");
            return acknowledge(response, None);
        }

        let session = match self.resolve_session(request).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                debug!(path = request.uri.path(), "no session for request");
                return acknowledge(response, None);
            }
            Err(e) => {
                error!(error = %e, "session lookup failed");
                return HandlerResult::failed(e, None);
            }
        };

        match stored_credentials(&session) {
            Ok(Some(credentials)) => return self.complete(credentials, session).await,
            Ok(None) => {}
            Err(e) => {
                error!(session_id = session.id(), error = %e, "token slot unreadable");
                return HandlerResult::failed(e, Some(session));
            }
        }

        let client = match ensure_ready(&self.configuration).await {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "OIDC configuration unavailable");
                return HandlerResult::failed(e, Some(session));
            }
        };

        match client.evaluate(request, &session).await {
            Ok(Evaluation::Authenticated(credentials)) => {
                let session = match self.rotate(session).await {
                    Ok(session) => session,
                    Err(e) => {
                        error!(error = %e, "cannot rotate session");
                        return HandlerResult::failed(e, None);
                    }
                };
                if let Err(e) = self.store_credentials(&session, &credentials).await {
                    error!(session_id = session.id(), error = %e, "cannot store credentials");
                    return HandlerResult::failed(e, Some(session));
                }
                info!(session_id = session.id(), "OIDC login completed");
                self.complete(credentials, session).await
            }
            Ok(Evaluation::Redirect(action)) => {
                if !resolve {
                    return HandlerResult::no_action(Some(session));
                }
                if let Err(e) = self.remember_requested_url(request, &session).await {
                    error!(session_id = session.id(), error = %e, "cannot save session");
                    return HandlerResult::failed(e, Some(session));
                }
                let written = write_location(response, StatusCode::FOUND, action.location())
                    .and_then(|_| response.flush());
                match written {
                    Ok(()) => {
                        debug!(location = action.location(), "redirecting to provider");
                        HandlerResult::redirected(session)
                    }
                    Err(e) => HandlerResult::failed(e, Some(session)),
                }
            }
            Err(e) => {
                warn!(session_id = session.id(), error = %e, "OIDC authentication failed");
                HandlerResult::failed(e, Some(session))
            }
        }
    }

    async fn resolve_session(&self, request: &Parts) -> Result<Option<Session>, AuthError> {
        if let Some(session) = request.extensions.get::<Session>() {
            if session.is_valid() {
                return Ok(Some(session.clone()));
            }
        }
        match &self.session_factory {
            Some(factory) => factory.get_or_create_session(request).await,
            None => Ok(None),
        }
    }

    async fn rotate(&self, session: Session) -> Result<Session, AuthError> {
        match &self.session_factory {
            Some(factory) => factory.rotate_session(&session).await,
            None => Ok(session),
        }
    }

    async fn store_credentials(
        &self,
        session: &Session,
        credentials: &OidcCredentials,
    ) -> Result<(), AuthError> {
        session.set_token_holder(&SecurityTokenHolder::new(credentials.clone()))?;
        self.save(session).await
    }

    async fn remember_requested_url(
        &self,
        request: &Parts,
        session: &Session,
    ) -> Result<(), AuthError> {
        if let Some(target) = request.uri.path_and_query() {
            session.set_attribute(REQUESTED_URL_KEY, &target.as_str())?;
        }
        self.save(session).await
    }

    async fn save(&self, session: &Session) -> Result<(), AuthError> {
        match &self.session_factory {
            Some(factory) => factory.save_session(session).await,
            None => Ok(()),
        }
    }

    async fn complete(&self, credentials: OidcCredentials, session: Session) -> HandlerResult {
        let creator = self.configuration.read().await.oidc_profile_creator().cloned();
        let identity = match creator.map(|creator| creator.create(&credentials)) {
            Some(Ok(identity)) => identity,
            Some(Err(e)) => return HandlerResult::failed(e, Some(session)),
            None => None,
        };
        HandlerResult::completed(OidcAuthenticationToken::new(credentials, identity), session)
    }
}

fn acknowledge(response: &mut dyn ResponseSink, session: Option<Session>) -> HandlerResult {
    response.set_status(StatusCode::OK);
    match response.flush() {
        Ok(()) => HandlerResult::no_action(session),
        Err(e) => HandlerResult::failed(e, session),
    }
}

fn stored_credentials(session: &Session) -> Result<Option<OidcCredentials>, AuthError> {
    Ok(session
        .token_holder()?
        .and_then(|holder| holder.security_token().cloned())
        .filter(|credentials| !credentials.is_expired()))
}

/// Take the path and query recorded before the provider redirect.
pub fn take_requested_url(session: &Session) -> Option<String> {
    let url = session.attribute::<String>(REQUESTED_URL_KEY).ok().flatten();
    session.remove_attribute(REQUESTED_URL_KEY);
    url
}

/// A builder for configuring and creating an [`OidcHandler`].
pub struct OidcHandlerBuilder<C> {
    configuration: C,
    session_factory: Option<Arc<dyn SessionFactory>>,
}

impl Default for OidcHandlerBuilder<Missing> {
    fn default() -> Self {
        Self {
            configuration: Missing,
            session_factory: None,
        }
    }
}

impl<C> OidcHandlerBuilder<C> {
    /// Set the handler configuration.
    pub fn configuration(
        self,
        configuration: SharedConfiguration,
    ) -> OidcHandlerBuilder<Configured<SharedConfiguration>> {
        OidcHandlerBuilder {
            configuration: Configured(configuration),
            session_factory: self.session_factory,
        }
    }

    /// Set the factory used when a request carries no session.
    pub fn session_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.session_factory = Some(factory);
        self
    }
}

impl OidcHandlerBuilder<Configured<SharedConfiguration>> {
    /// Build the [`OidcHandler`].
    pub fn build(self) -> OidcHandler {
        OidcHandler {
            configuration: self.configuration.0,
            session_factory: self.session_factory,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        configuration, credentials, id_token, request, session, Behaviour, FakeProvider,
    };
    use crate::BufferedResponse;
    use async_trait::async_trait;
    use authgate_session::{MemoryStore, SessionConfig, SessionStore, StoreSessionFactory};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedFactory {
        session: Option<Session>,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl SessionFactory for FixedFactory {
        async fn get_or_create_session(
            &self,
            _request: &Parts,
        ) -> Result<Option<Session>, AuthError> {
            Ok(self.session.clone())
        }

        async fn save_session(&self, _session: &Session) -> Result<(), AuthError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn handler(provider: Arc<FakeProvider>) -> OidcHandler {
        OidcHandler::new(configuration(provider).into_shared())
    }

    #[tokio::test]
    async fn head_request_is_acknowledged() {
        let provider = Arc::new(FakeProvider::new(Behaviour::Redirect));
        let mut request = request(Method::HEAD, "/protected");
        request.extensions.insert(session());
        let mut response = BufferedResponse::new();

        let result = handler(provider.clone())
            .get_normalized_token(&request, &mut response, true)
            .await;

        assert_eq!(result.status(), Status::NoAction);
        assert_eq!(response.status(), Some(StatusCode::OK));
        assert_eq!(response.flush_count(), 1);
        assert_eq!(provider.evaluations(), 0);
        assert_eq!(provider.fetches(), 0);
    }

    #[tokio::test]
    async fn no_session_and_no_factory_is_acknowledged() {
        let provider = Arc::new(FakeProvider::new(Behaviour::Redirect));
        let mut response = BufferedResponse::new();

        let result = handler(provider.clone())
            .get_normalized_token(&request(Method::GET, "/protected"), &mut response, true)
            .await;

        assert_eq!(result.status(), Status::NoAction);
        assert!(result.token().is_none());
        assert_eq!(response.status(), Some(StatusCode::OK));
        assert_eq!(response.flush_count(), 1);
        assert_eq!(provider.evaluations(), 0);
    }

    #[tokio::test]
    async fn factory_without_session_is_acknowledged() {
        let provider = Arc::new(FakeProvider::new(Behaviour::Redirect));
        let handler = OidcHandler::builder()
            .configuration(configuration(provider.clone()).into_shared())
            .session_factory(Arc::new(FixedFactory {
                session: None,
                saves: AtomicUsize::new(0),
            }))
            .build();
        let mut response = BufferedResponse::new();

        let result = handler
            .get_normalized_token(&request(Method::GET, "/protected"), &mut response, true)
            .await;

        assert_eq!(result.status(), Status::NoAction);
        assert_eq!(response.flush_count(), 1);
    }

    #[tokio::test]
    async fn invalidated_session_is_not_used() {
        let provider = Arc::new(FakeProvider::new(Behaviour::Redirect));
        let session = session();
        session.invalidate();
        let mut request = request(Method::GET, "/protected");
        request.extensions.insert(session);
        let mut response = BufferedResponse::new();

        let result = handler(provider.clone())
            .get_normalized_token(&request, &mut response, true)
            .await;
        assert_eq!(result.status(), Status::NoAction);
        assert_eq!(provider.evaluations(), 0);
    }

    #[tokio::test]
    async fn stored_token_completes_without_provider() {
        let provider = Arc::new(FakeProvider::new(Behaviour::Redirect));
        let session = session();
        session
            .set_token_holder(&SecurityTokenHolder::new(credentials()))
            .unwrap();
        let mut request = request(Method::GET, "/protected");
        request.extensions.insert(session);
        let mut response = BufferedResponse::new();

        let result = handler(provider.clone())
            .get_normalized_token(&request, &mut response, true)
            .await;

        assert_eq!(result.status(), Status::Completed);
        let token = result.token().unwrap();
        assert_eq!(token.credentials(), &credentials());
        assert_eq!(token.authentication_type(), "OIDC");
        assert_eq!(provider.evaluations(), 0);
        assert!(!response.is_committed());
    }

    #[tokio::test]
    async fn redirects_to_provider_when_resolving() {
        let provider = Arc::new(FakeProvider::new(Behaviour::Redirect));
        let session = session();
        let mut request = request(Method::GET, "/protected?page=2");
        request.extensions.insert(session.clone());
        let mut response = BufferedResponse::new();

        let result = handler(provider.clone())
            .get_normalized_token(&request, &mut response, true)
            .await;

        assert_eq!(result.status(), Status::Redirected);
        assert_eq!(response.status(), Some(StatusCode::FOUND));
        assert_eq!(response.location(), Some("https://idp.example.com/auth"));
        assert_eq!(response.flush_count(), 1);
        assert_eq!(
            take_requested_url(&session).as_deref(),
            Some("/protected?page=2")
        );
        assert_eq!(take_requested_url(&session), None);
    }

    #[tokio::test]
    async fn redirect_without_resolving_is_no_action() {
        let provider = Arc::new(FakeProvider::new(Behaviour::Redirect));
        let mut request = request(Method::GET, "/protected");
        request.extensions.insert(session());
        let mut response = BufferedResponse::new();

        let result = handler(provider.clone())
            .get_normalized_token(&request, &mut response, false)
            .await;

        assert_eq!(result.status(), Status::NoAction);
        assert_eq!(response.status(), None);
        assert_eq!(provider.evaluations(), 1);
    }

    #[tokio::test]
    async fn session_is_saved_only_when_redirecting() {
        let provider = Arc::new(FakeProvider::new(Behaviour::Redirect));
        let factory = Arc::new(FixedFactory {
            session: Some(session()),
            saves: AtomicUsize::new(0),
        });
        let handler = OidcHandler::builder()
            .configuration(configuration(provider.clone()).into_shared())
            .session_factory(factory.clone())
            .build();

        let mut response = BufferedResponse::new();
        handler
            .get_normalized_token(&request(Method::GET, "/"), &mut response, false)
            .await;
        assert_eq!(factory.saves.load(Ordering::SeqCst), 0);

        let mut response = BufferedResponse::new();
        let result = handler
            .get_normalized_token(&request(Method::GET, "/protected"), &mut response, true)
            .await;
        assert_eq!(result.status(), Status::Redirected);
        assert_eq!(factory.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn credentials_are_stored_and_saved() {
        let provider = Arc::new(FakeProvider::new(Behaviour::Authenticate(credentials())));
        let session = session();
        let factory = Arc::new(FixedFactory {
            session: Some(session.clone()),
            saves: AtomicUsize::new(0),
        });
        let handler = OidcHandler::builder()
            .configuration(configuration(provider.clone()).into_shared())
            .session_factory(factory.clone())
            .build();
        let mut response = BufferedResponse::new();

        let result = handler
            .get_normalized_token(
                &request(Method::GET, "/auth/oidc/callback?code=abc&state=s"),
                &mut response,
                true,
            )
            .await;

        assert_eq!(result.status(), Status::Completed);
        let current = result.session().unwrap();
        assert_ne!(current.id(), session.id());
        assert!(session.is_invalidated());
        let identity = result.token().unwrap().identity().unwrap();
        assert_eq!(identity.external_id, "alice");
        let holder = current.token_holder().unwrap().unwrap();
        assert_eq!(holder.security_token(), Some(&credentials()));
        assert_eq!(factory.saves.load(Ordering::SeqCst), 1);
        assert!(!response.is_committed());
    }

    #[tokio::test]
    async fn login_moves_session_to_a_new_id() {
        let provider = Arc::new(FakeProvider::new(Behaviour::Authenticate(credentials())));
        let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::default());
        let planted = session();
        planted.set_attribute("cart", &3).unwrap();
        store.save_session(&planted).await.unwrap();
        let handler = OidcHandler::builder()
            .configuration(configuration(provider).into_shared())
            .session_factory(Arc::new(StoreSessionFactory::new(
                store.clone(),
                SessionConfig::default(),
            )))
            .build();

        let mut request = request(Method::GET, "/auth/oidc/callback?code=abc&state=s");
        request.extensions.insert(planted.clone());
        let mut response = BufferedResponse::new();
        let result = handler
            .get_normalized_token(&request, &mut response, true)
            .await;

        assert_eq!(result.status(), Status::Completed);
        let current = result.session().unwrap();
        assert_ne!(current.id(), planted.id());
        assert_eq!(current.attribute::<i32>("cart").unwrap(), Some(3));
        assert!(store.load_session(planted.id()).await.unwrap().is_none());
        let stored = store.load_session(current.id()).await.unwrap().unwrap();
        assert!(stored.token_holder().unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_token_is_evaluated_again() {
        let provider = Arc::new(FakeProvider::new(Behaviour::Redirect));
        let session = session();
        let expired = OidcCredentials {
            id_token: Some(id_token("alice")),
            expires_at: Some(chrono::Utc::now() - chrono::Duration::seconds(1)),
            ..Default::default()
        };
        session
            .set_token_holder(&SecurityTokenHolder::new(expired))
            .unwrap();
        let mut request = request(Method::GET, "/protected");
        request.extensions.insert(session);
        let mut response = BufferedResponse::new();

        let result = handler(provider.clone())
            .get_normalized_token(&request, &mut response, true)
            .await;
        assert_eq!(result.status(), Status::Redirected);
        assert_eq!(provider.evaluations(), 1);
    }

    #[tokio::test]
    async fn provider_failure_is_an_error() {
        let provider = Arc::new(FakeProvider::new(Behaviour::Fail));
        let mut request = request(Method::GET, "/auth/oidc/callback?state=x&code=y");
        request.extensions.insert(session());
        let mut response = BufferedResponse::new();

        let result = handler(provider)
            .get_normalized_token(&request, &mut response, true)
            .await;
        assert_eq!(result.status(), Status::Error);
        assert!(matches!(result.error(), Some(AuthError::CsrfMismatch)));
        assert!(!response.is_committed());
    }

    #[tokio::test]
    async fn discovery_failure_is_an_error() {
        let provider = Arc::new(FakeProvider::without_metadata(Behaviour::Redirect));
        let mut request = request(Method::GET, "/protected");
        request.extensions.insert(session());
        let mut response = BufferedResponse::new();

        let handler = handler(provider.clone());
        let result = handler
            .get_normalized_token(&request, &mut response, true)
            .await;
        assert_eq!(result.status(), Status::Error);
        assert!(matches!(result.error(), Some(AuthError::Configuration(_))));
        assert_eq!(provider.evaluations(), 0);

        handler
            .get_normalized_token(&request, &mut response, true)
            .await;
        assert_eq!(provider.fetches(), 2);
    }

    #[tokio::test]
    async fn configuration_is_initialized_once() {
        let provider = Arc::new(FakeProvider::new(Behaviour::Redirect));
        let handler = handler(provider.clone());
        for _ in 0..3 {
            let mut request = request(Method::GET, "/protected");
            request.extensions.insert(session());
            let mut response = BufferedResponse::new();
            handler
                .get_normalized_token(&request, &mut response, true)
                .await;
        }
        assert_eq!(provider.fetches(), 1);
        assert_eq!(provider.evaluations(), 3);
    }
}
