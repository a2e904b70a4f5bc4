use crate::client::{Evaluation, IdentityProviderClient};
use crate::protocol::{Protocol, ProtocolConfiguration};
use crate::validation::IdTokenValidator;
use async_trait::async_trait;
use authgate_core::pkce::{Pkce, CHALLENGE_METHOD};
use authgate_core::{
    AuthError, CallbackParams, OAuthToken, OidcCredentials, ProviderMetadata, RedirectAction,
};
use authgate_session::Session;
use http::request::Parts;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Session attribute holding the CSRF state of a pending login.
pub const STATE_KEY: &str = "authgate.oidc.state";
/// Session attribute holding the nonce of a pending login.
pub const NONCE_KEY: &str = "authgate.oidc.nonce";
/// Session attribute holding the PKCE verifier of a pending login.
pub const PKCE_VERIFIER_KEY: &str = "authgate.oidc.pkce_verifier";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`IdentityProviderClient`] speaking OpenID Connect over HTTP.
///
/// Every ID token, whether it came from the token endpoint or from the user
/// agent, goes through an [`IdTokenValidator`] before it is accepted.
#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    validator: Arc<IdTokenValidator>,
}

impl HttpIdentityProvider {
    /// A provider client with a 10 second request timeout.
    pub fn new() -> Result<Self, AuthError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            validator: Arc::new(IdTokenValidator::new(client.clone())),
            client,
        }
    }

    fn metadata<'a>(
        &self,
        configuration: &'a ProtocolConfiguration,
    ) -> Result<&'a ProviderMetadata, AuthError> {
        configuration.provider_metadata().ok_or_else(|| {
            AuthError::Configuration("provider metadata has not been resolved".into())
        })
    }

    fn authorization_redirect(
        &self,
        configuration: &ProtocolConfiguration,
        session: &Session,
    ) -> Result<RedirectAction, AuthError> {
        let metadata = self.metadata(configuration)?;
        let redirect_uri = configuration
            .callback_url()
            .ok_or_else(|| AuthError::Configuration("no callback URL set".into()))?;
        let response_type = configuration.response_type().unwrap_or("code");
        if !metadata.supports_response_type(response_type) {
            warn!(response_type, "provider does not advertise response type");
        }

        let mut url = url::Url::parse(&metadata.authorization_endpoint).map_err(|e| {
            AuthError::Configuration(format!(
                "invalid authorization endpoint '{}': {e}",
                metadata.authorization_endpoint
            ))
        })?;

        let state = uuid::Uuid::new_v4().to_string();
        session.set_attribute(STATE_KEY, &state)?;

        let returns_id_token = response_type.split_whitespace().any(|t| t == "id_token");
        let nonce = (configuration.use_nonce()
            || (configuration.protocol() == Protocol::Oidc && returns_id_token))
            .then(|| uuid::Uuid::new_v4().to_string());
        match &nonce {
            Some(nonce) => session.set_attribute(NONCE_KEY, nonce)?,
            None => {
                session.remove_attribute(NONCE_KEY);
            }
        }

        let pkce = response_type
            .split_whitespace()
            .any(|t| t == "code")
            .then(Pkce::new);
        match &pkce {
            Some(pkce) => session.set_attribute(PKCE_VERIFIER_KEY, &pkce.code_verifier)?,
            None => {
                session.remove_attribute(PKCE_VERIFIER_KEY);
            }
        }

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", response_type)
                .append_pair("client_id", configuration.client_id())
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("scope", configuration.scope())
                .append_pair("state", &state);
            if let Some(mode) = configuration.response_mode() {
                query.append_pair("response_mode", mode);
            }
            if let Some(nonce) = &nonce {
                query.append_pair("nonce", nonce);
            }
            if let Some(pkce) = &pkce {
                query
                    .append_pair("code_challenge", &pkce.code_challenge)
                    .append_pair("code_challenge_method", CHALLENGE_METHOD);
            }
        }

        debug!(client_id = configuration.client_id(), "redirecting to authorization endpoint");
        Ok(RedirectAction::new(url))
    }

    async fn exchange_code(
        &self,
        configuration: &ProtocolConfiguration,
        code: &str,
        code_verifier: Option<String>,
    ) -> Result<OidcCredentials, AuthError> {
        let metadata = self.metadata(configuration)?;
        let token_endpoint = metadata.token_endpoint.as_deref().ok_or_else(|| {
            AuthError::Configuration("provider does not advertise a token endpoint".into())
        })?;

        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("client_id", configuration.client_id().to_string()),
            ("client_secret", configuration.secret().to_string()),
        ];
        if let Some(redirect_uri) = configuration.callback_url() {
            form.push(("redirect_uri", redirect_uri.to_string()));
        }
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }

        debug!(%token_endpoint, "exchanging authorization code");
        let response = self
            .client
            .post(token_endpoint)
            .header(http::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Provider(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: OAuthToken = response
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("malformed token response: {e}")))?;
        Ok(OidcCredentials::from_token(token))
    }

    async fn complete_login(
        &self,
        configuration: &ProtocolConfiguration,
        params: CallbackParams,
        session: &Session,
    ) -> Result<OidcCredentials, AuthError> {
        if let Some(error) = params.error {
            Self::clear_pending(session);
            let description = params.error_description.unwrap_or_default();
            return Err(AuthError::Provider(format!("{error}: {description}")));
        }

        let expected_state: Option<String> = session.attribute(STATE_KEY)?;
        match (expected_state.as_deref(), params.state.as_deref()) {
            (Some(expected), Some(received)) if expected == received => {}
            _ => {
                warn!("callback state does not match the pending login");
                return Err(AuthError::CsrfMismatch);
            }
        }
        session.remove_attribute(STATE_KEY);
        let code_verifier: Option<String> = session.attribute(PKCE_VERIFIER_KEY)?;
        let expected_nonce: Option<String> = session.attribute(NONCE_KEY)?;
        Self::clear_pending(session);

        let credentials = match params.code.as_deref() {
            Some(code) => {
                if params.id_token.is_some() {
                    warn!("ignoring ID token sent alongside an authorization code");
                }
                self.exchange_code(configuration, code, code_verifier).await?
            }
            None => {
                if configuration.protocol() == Protocol::Oidc && params.id_token.is_none() {
                    return Err(AuthError::Provider(
                        "front-channel response carried no ID token".into(),
                    ));
                }
                OidcCredentials {
                    code: None,
                    access_token: params.access_token,
                    id_token: params.id_token,
                    refresh_token: None,
                    token_type: params.token_type,
                    expires_at: params
                        .expires_in
                        .and_then(|secs| i64::try_from(secs).ok())
                        .map(|secs| chrono::Utc::now() + chrono::Duration::seconds(secs)),
                }
            }
        };

        if let Some(id_token) = credentials.id_token.as_deref() {
            self.validator
                .validate(configuration, id_token, expected_nonce.as_deref())
                .await?;
        }

        if credentials.is_empty() {
            return Err(AuthError::Provider(
                "provider response carried no token".into(),
            ));
        }
        Ok(credentials)
    }

    fn clear_pending(session: &Session) {
        for key in [STATE_KEY, NONCE_KEY, PKCE_VERIFIER_KEY] {
            session.remove_attribute(key);
        }
    }
}

#[async_trait]
impl IdentityProviderClient for HttpIdentityProvider {
    async fn fetch_metadata(&self, discovery_uri: &str) -> Result<ProviderMetadata, AuthError> {
        ProviderMetadata::fetch(discovery_uri, &self.client).await
    }

    async fn evaluate_credentials(
        &self,
        configuration: &ProtocolConfiguration,
        request: &Parts,
        session: &Session,
    ) -> Result<Evaluation, AuthError> {
        let params = CallbackParams::from_request(request);
        if !params.is_callback() {
            return self
                .authorization_redirect(configuration, session)
                .map(Evaluation::Redirect);
        }
        self.complete_login(configuration, params, session)
            .await
            .map(Evaluation::Authenticated)
    }

    fn build_logout_action(
        &self,
        configuration: &ProtocolConfiguration,
        _request: &Parts,
        credentials: &OidcCredentials,
    ) -> Result<RedirectAction, AuthError> {
        let endpoint = configuration
            .provider_metadata()
            .and_then(|m| m.end_session_endpoint.as_deref())
            .or(configuration.logout_uri())
            .ok_or_else(|| {
                AuthError::Configuration("provider has no end session endpoint".into())
            })?;
        let mut url = url::Url::parse(endpoint).map_err(|e| {
            AuthError::Configuration(format!("invalid logout endpoint '{endpoint}': {e}"))
        })?;

        let post_logout_redirect = configuration.post_logout_redirect_uri();

        {
            let mut query = url.query_pairs_mut();
            if let Some(id_token) = credentials.id_token.as_deref() {
                query.append_pair("id_token_hint", id_token);
            }
            query.append_pair("client_id", configuration.client_id());
            if let Some(redirect) = &post_logout_redirect {
                query.append_pair("post_logout_redirect_uri", redirect);
            }
        }
        Ok(RedirectAction::new(url))
    }
}
