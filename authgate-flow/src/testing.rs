use async_trait::async_trait;
use authgate_core::{AuthError, OidcCredentials, ProviderMetadata, RedirectAction};
use authgate_oidc::{
    Evaluation, HandlerConfiguration, IdentityProviderClient, OidcSettings, ProtocolConfiguration,
};
use authgate_session::Session;
use base64::Engine;
use http::request::Parts;
use http::Method;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) enum Behaviour {
    Redirect,
    Authenticate(OidcCredentials),
    Fail,
}

pub(crate) struct FakeProvider {
    behaviour: Behaviour,
    metadata: Option<ProviderMetadata>,
    evaluations: AtomicUsize,
    fetches: AtomicUsize,
}

impl FakeProvider {
    pub(crate) fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            metadata: Some(ProviderMetadata::new(
                "https://idp.example.com",
                "https://idp.example.com/auth",
            )),
            evaluations: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn without_metadata(behaviour: Behaviour) -> Self {
        Self {
            metadata: None,
            ..Self::new(behaviour)
        }
    }

    pub(crate) fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProviderClient for FakeProvider {
    async fn fetch_metadata(&self, discovery_uri: &str) -> Result<ProviderMetadata, AuthError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.metadata
            .clone()
            .ok_or_else(|| AuthError::Discovery(format!("{discovery_uri} unreachable")))
    }

    async fn evaluate_credentials(
        &self,
        _configuration: &ProtocolConfiguration,
        _request: &Parts,
        _session: &Session,
    ) -> Result<Evaluation, AuthError> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Redirect => Ok(Evaluation::Redirect(RedirectAction::new(
                "https://idp.example.com/auth",
            ))),
            Behaviour::Authenticate(credentials) => {
                Ok(Evaluation::Authenticated(credentials.clone()))
            }
            Behaviour::Fail => Err(AuthError::CsrfMismatch),
        }
    }

    fn build_logout_action(
        &self,
        _configuration: &ProtocolConfiguration,
        _request: &Parts,
        _credentials: &OidcCredentials,
    ) -> Result<RedirectAction, AuthError> {
        Ok(RedirectAction::new("https://logout/uri"))
    }
}

pub(crate) fn settings() -> OidcSettings {
    OidcSettings {
        idp_type: Some("generic".into()),
        client_id: Some("generic-client".into()),
        secret: Some("changeit".into()),
        discovery_uri: Some("https://discovery/uri".into()),
        app_base_uri: Some("https://app.example.com".into()),
        ..Default::default()
    }
}

pub(crate) fn configuration(provider: Arc<FakeProvider>) -> HandlerConfiguration {
    HandlerConfiguration::with_identity_provider(settings(), provider)
}

pub(crate) fn request(method: Method, uri: &str) -> Parts {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::HOST, "app.example.com")
        .body(())
        .unwrap()
        .into_parts()
        .0
}

pub(crate) fn session() -> Session {
    Session::new(chrono::Duration::minutes(5))
}

pub(crate) fn id_token(subject: &str) -> String {
    let claims = serde_json::json!({ "sub": subject });
    let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("eyJhbGciOiJSUzI1NiJ9.{payload}.sig")
}

pub(crate) fn credentials() -> OidcCredentials {
    OidcCredentials {
        access_token: Some("at-1".into()),
        id_token: Some(id_token("alice")),
        token_type: Some("Bearer".into()),
        ..Default::default()
    }
}
