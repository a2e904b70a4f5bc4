//! # Authgate Axum
//!
//! Axum glue for the authgate OpenID Connect handler: a session-loading
//! middleware, a guard middleware for protected routes, the login callback and
//! the two logout routes.
//!
//! ```ignore
//! let state = AuthgateState::new(configuration, store, SessionConfig::default());
//! let app = Router::new()
//!     .route("/protected", get(protected))
//!     .route_layer(middleware::from_fn_with_state(state.clone(), require_oidc))
//!     .merge(state.axum_router())
//!     .layer(middleware::from_fn_with_state(state.clone(), load_session))
//!     .layer(CookieManagerLayer::new())
//!     .with_state(state);
//! ```

use authgate_flow::{
    OidcAuthenticationToken, OidcCallbackEndpoint, OidcHandler, OidcLogoutActionProvider,
};
use authgate_oidc::{SharedConfiguration, CALLBACK_PATH, LOGOUT_CALLBACK_PATH, LOGOUT_PATH};
pub use authgate_session::{Session, SessionConfig, SessionStore};
use authgate_session::StoreSessionFactory;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use std::sync::Arc;
pub use tower_cookies::Cookie;

pub mod helpers;

pub use helpers::*;

/// Shared state of the authgate routes and middleware.
#[derive(Clone)]
pub struct AuthgateState {
    /// Token normalization.
    pub handler: OidcHandler,
    /// Provider logout.
    pub logout: OidcLogoutActionProvider,
    /// Local logout after the provider redirected back.
    pub callback: OidcCallbackEndpoint,
    /// Session storage backend.
    pub session_store: Arc<dyn SessionStore>,
    /// Session cookie settings.
    pub session_config: SessionConfig,
}

impl AuthgateState {
    /// Wire handler, logout provider and callback endpoint around one store.
    pub fn new(
        configuration: SharedConfiguration,
        session_store: Arc<dyn SessionStore>,
        session_config: SessionConfig,
    ) -> Self {
        let factory = StoreSessionFactory::new(session_store.clone(), session_config.clone());
        Self {
            handler: OidcHandler::builder()
                .configuration(configuration.clone())
                .session_factory(Arc::new(factory))
                .build(),
            logout: OidcLogoutActionProvider::new(configuration),
            callback: OidcCallbackEndpoint::new().with_store(session_store.clone()),
            session_store,
            session_config,
        }
    }
}

impl FromRef<AuthgateState> for OidcHandler {
    fn from_ref(state: &AuthgateState) -> Self {
        state.handler.clone()
    }
}

impl FromRef<AuthgateState> for Arc<dyn SessionStore> {
    fn from_ref(state: &AuthgateState) -> Self {
        state.session_store.clone()
    }
}

impl FromRef<AuthgateState> for SessionConfig {
    fn from_ref(state: &AuthgateState) -> Self {
        state.session_config.clone()
    }
}

/// The extractor for the token of an authenticated request.
///
/// Requires [`require_oidc`] on the route.
pub struct OidcAuth(pub OidcAuthenticationToken);

impl<S> FromRequestParts<S> for OidcAuth
where
    S: Send + Sync,
{
    type Rejection = AuthgateAxumError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OidcAuthenticationToken>()
            .cloned()
            .map(OidcAuth)
            .ok_or_else(|| AuthgateAxumError::Unauthorized("not authenticated".to_string()))
    }
}

/// The extractor for the session loaded by [`load_session`].
pub struct AuthSession(pub Session);

impl<S> FromRequestParts<S> for AuthSession
where
    S: Send + Sync,
{
    type Rejection = AuthgateAxumError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .filter(|s| s.is_valid())
            .cloned()
            .map(AuthSession)
            .ok_or_else(|| AuthgateAxumError::Unauthorized("no session".to_string()))
    }
}

/// Routes for the login callback and logout.
pub trait AuthgateAxumExt {
    /// `CALLBACK_PATH` (GET and form POST), `LOGOUT_PATH` and `LOGOUT_CALLBACK_PATH`.
    fn axum_router<S>(&self) -> axum::Router<S>
    where
        S: Clone + Send + Sync + 'static,
        AuthgateState: FromRef<S>;
}

impl AuthgateAxumExt for AuthgateState {
    fn axum_router<S>(&self) -> axum::Router<S>
    where
        S: Clone + Send + Sync + 'static,
        AuthgateState: FromRef<S>,
    {
        use axum::routing::get;
        axum::Router::new()
            .route(
                CALLBACK_PATH,
                get(helpers::axum_callback_handler).post(helpers::axum_callback_handler),
            )
            .route(LOGOUT_PATH, get(helpers::axum_logout_handler))
            .route(
                LOGOUT_CALLBACK_PATH,
                get(helpers::axum_logout_callback_handler),
            )
    }
}
