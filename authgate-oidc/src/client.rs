use crate::protocol::{Protocol, ProtocolConfiguration};
use async_trait::async_trait;
use authgate_core::{AuthError, Identity, OidcCredentials, ProviderMetadata, RedirectAction};
use authgate_session::Session;
use http::request::Parts;
use std::sync::Arc;

/// Outcome of evaluating a request against the identity provider.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// The request carried a valid provider response.
    Authenticated(OidcCredentials),
    /// The user agent has to be sent to the provider first.
    Redirect(RedirectAction),
}

/// The protocol implementation the handler delegates to.
///
/// The handler never talks to a provider itself: discovery, code exchange and
/// logout URL construction all go through this trait.
#[async_trait]
pub trait IdentityProviderClient: Send + Sync {
    /// Retrieve the provider metadata from a discovery URI.
    async fn fetch_metadata(&self, discovery_uri: &str) -> Result<ProviderMetadata, AuthError>;

    /// Evaluate the credentials or callback parameters carried by `request`.
    ///
    /// Flow state (CSRF state, nonce, PKCE verifier) is kept in `session`.
    async fn evaluate_credentials(
        &self,
        configuration: &ProtocolConfiguration,
        request: &Parts,
        session: &Session,
    ) -> Result<Evaluation, AuthError>;

    /// Build the redirect that ends the user's session at the provider.
    fn build_logout_action(
        &self,
        configuration: &ProtocolConfiguration,
        request: &Parts,
        credentials: &OidcCredentials,
    ) -> Result<RedirectAction, AuthError>;
}

/// A client bound to one protocol configuration.
#[derive(Clone)]
pub struct ProviderClient {
    configuration: Arc<ProtocolConfiguration>,
    provider: Arc<dyn IdentityProviderClient>,
}

/// Client for the OpenID Connect configuration.
pub type OidcClient = ProviderClient;
/// Client for the OAuth 2.0 configuration.
pub type OAuthClient = ProviderClient;

impl ProviderClient {
    pub(crate) fn new(
        configuration: Arc<ProtocolConfiguration>,
        provider: Arc<dyn IdentityProviderClient>,
    ) -> Self {
        Self {
            configuration,
            provider,
        }
    }

    pub fn configuration(&self) -> &ProtocolConfiguration {
        &self.configuration
    }

    pub fn protocol(&self) -> Protocol {
        self.configuration.protocol()
    }

    /// Evaluate a request: either credentials or a redirect to the provider.
    pub async fn evaluate(&self, request: &Parts, session: &Session) -> Result<Evaluation, AuthError> {
        self.provider
            .evaluate_credentials(&self.configuration, request, session)
            .await
    }
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("protocol", &self.configuration.protocol())
            .field("client_id", &self.configuration.client_id())
            .finish_non_exhaustive()
    }
}

/// Builds provider logout redirects for the OIDC configuration.
#[derive(Clone)]
pub struct LogoutActionBuilder {
    configuration: Arc<ProtocolConfiguration>,
    provider: Arc<dyn IdentityProviderClient>,
}

impl LogoutActionBuilder {
    pub(crate) fn new(
        configuration: Arc<ProtocolConfiguration>,
        provider: Arc<dyn IdentityProviderClient>,
    ) -> Self {
        Self {
            configuration,
            provider,
        }
    }

    /// The redirect ending the session that `credentials` belong to.
    pub fn logout_action(
        &self,
        request: &Parts,
        credentials: &OidcCredentials,
    ) -> Result<RedirectAction, AuthError> {
        self.provider
            .build_logout_action(&self.configuration, request, credentials)
    }
}

/// Derives an [`Identity`] from OpenID Connect credentials.
#[derive(Debug, Clone)]
pub struct OidcProfileCreator {
    configuration: Arc<ProtocolConfiguration>,
}

impl OidcProfileCreator {
    pub(crate) fn new(configuration: Arc<ProtocolConfiguration>) -> Self {
        Self { configuration }
    }

    /// Build the identity from the ID token claims.
    ///
    /// Returns `Ok(None)` when the credentials carry no ID token (plain OAuth).
    /// The token is assumed to have been validated by the provider client.
    pub fn create(&self, credentials: &OidcCredentials) -> Result<Option<Identity>, AuthError> {
        let Some(claims) = credentials.id_token_claims()? else {
            return Ok(None);
        };

        let external_id = claims
            .get("sub")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AuthError::Token("ID token has no 'sub' claim".into()))?
            .to_string();
        let email = claims
            .get("email")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let username = claims
            .get("preferred_username")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let attributes = claims
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "sub" | "email" | "preferred_username"))
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect();

        Ok(Some(Identity {
            provider_id: self.configuration.provider_id().to_string(),
            external_id,
            email,
            username,
            attributes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::OidcSettings;
    use base64::Engine;

    fn id_token(claims: serde_json::Value) -> String {
        let payload =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("eyJhbGciOiJSUzI1NiJ9.{payload}.signature")
    }

    fn creator() -> OidcProfileCreator {
        let settings = OidcSettings {
            idp_type: Some("generic".into()),
            ..Default::default()
        };
        OidcProfileCreator::new(Arc::new(ProtocolConfiguration::from_settings(
            Protocol::Oidc,
            &settings,
            None,
        )))
    }

    #[test]
    fn identity_from_claims() {
        let credentials = OidcCredentials {
            id_token: Some(id_token(serde_json::json!({
                "sub": "248289761001",
                "email": "jane@example.com",
                "preferred_username": "jane",
                "name": "Jane Doe",
                "exp": 1311281970
            }))),
            ..Default::default()
        };

        let identity = creator().create(&credentials).unwrap().unwrap();
        assert_eq!(identity.provider_id, "generic");
        assert_eq!(identity.external_id, "248289761001");
        assert_eq!(identity.email.as_deref(), Some("jane@example.com"));
        assert_eq!(identity.username.as_deref(), Some("jane"));
        assert_eq!(identity.attributes.get("name").map(String::as_str), Some("Jane Doe"));
        assert!(!identity.attributes.contains_key("exp"));
        assert!(!identity.attributes.contains_key("sub"));
    }

    #[test]
    fn access_token_only_yields_no_identity() {
        let credentials = OidcCredentials {
            access_token: Some("opaque".into()),
            ..Default::default()
        };
        assert_eq!(creator().create(&credentials).unwrap(), None);
    }

    #[test]
    fn missing_subject_is_an_error() {
        let credentials = OidcCredentials {
            id_token: Some(id_token(serde_json::json!({ "email": "x@example.com" }))),
            ..Default::default()
        };
        assert!(matches!(
            creator().create(&credentials),
            Err(AuthError::Token(_))
        ));
    }
}
