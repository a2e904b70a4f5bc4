//! # Axum OpenID Connect Example
//!
//! Protects `/protected` with the OpenID Connect handler. Provider settings come
//! from `OIDC_*` environment variables (a `.env` file works too):
//!
//! ```text
//! OIDC_IDP_TYPE=keycloak
//! OIDC_BASE_URI=http://localhost:8080
//! OIDC_APP_BASE_URI=http://localhost:3000
//! OIDC_REALM=demo
//! OIDC_CLIENT_ID=authgate
//! OIDC_SECRET=...
//! OIDC_FLOW=code            # optional: code, implicit, credential
//! ```
//!
//! Register `http://localhost:3000/auth/oidc/callback` as redirect URI and
//! `http://localhost:3000/auth/oidc/logout/callback` as post-logout redirect URI.

use authgate::axum::{
    load_session, require_oidc, AuthgateAxumExt, AuthgateState, OidcAuth, SessionConfig,
};
use authgate::oidc::{Flow, HandlerConfiguration, OidcSettings, LOGOUT_PATH};
use authgate::session::{MemoryStore, SessionStore};
use axum::{
    middleware,
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_cookies::CookieManagerLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = OidcSettings::from_env();
    let mut configuration = HandlerConfiguration::new(settings)?;
    if !configuration.is_configured() {
        warn!(
            completeness = ?configuration.completeness(),
            "OIDC settings are incomplete, protected routes will fail"
        );
    }
    if let Ok(flow) = std::env::var("OIDC_FLOW") {
        configuration.configure_flow(flow.parse::<Flow>()?);
    }
    configuration.generate();

    let session_store: Arc<dyn SessionStore> = Arc::new(MemoryStore::default());
    let state = AuthgateState::new(
        configuration.into_shared(),
        session_store,
        SessionConfig {
            secure: false, // For local development
            ..Default::default()
        },
    );

    let app = Router::new()
        .route("/protected", get(protected))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_oidc))
        .route("/", get(index))
        .merge(state.axum_router())
        .layer(middleware::from_fn_with_state(state.clone(), load_session))
        .layer(CookieManagerLayer::new())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    info!("OIDC example running on http://localhost:3000");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index() -> impl IntoResponse {
    Html(
        "<h1>Authgate OIDC Example</h1>\
         <p><a href=\"/protected\">Protected area</a></p>",
    )
}

async fn protected(OidcAuth(token): OidcAuth) -> impl IntoResponse {
    let (subject, name) = match token.identity() {
        Some(identity) => (
            identity.external_id.clone(),
            identity
                .username
                .clone()
                .or_else(|| identity.email.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
        ),
        None => ("-".to_string(), "Unknown".to_string()),
    };
    Html(format!(
        "<h1>Protected Area</h1>\
         <p>Hello, {name}!</p>\
         <p>Subject: {subject}</p>\
         <a href=\"{LOGOUT_PATH}\">Logout</a>"
    ))
}
