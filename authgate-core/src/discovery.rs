use crate::error::AuthError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// OpenID Provider metadata, as served from `.well-known/openid-configuration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier.
    pub issuer: String,
    /// Authorization endpoint.
    pub authorization_endpoint: String,
    /// Token endpoint. Absent for implicit-only providers.
    #[serde(default)]
    pub token_endpoint: Option<String>,
    /// JSON Web Key Set document.
    #[serde(default)]
    pub jwks_uri: Option<String>,
    /// UserInfo endpoint.
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    /// RP-initiated logout endpoint.
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    /// Supported `response_type` values.
    #[serde(default)]
    pub response_types_supported: Vec<String>,
    /// Supported `response_mode` values.
    #[serde(default)]
    pub response_modes_supported: Vec<String>,
    /// Supported scopes.
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    /// Supported PKCE challenge methods.
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

impl ProviderMetadata {
    /// Minimal metadata with only the issuer and authorization endpoint set.
    pub fn new(issuer: impl Into<String>, authorization_endpoint: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            authorization_endpoint: authorization_endpoint.into(),
            token_endpoint: None,
            jwks_uri: None,
            userinfo_endpoint: None,
            end_session_endpoint: None,
            response_types_supported: Vec::new(),
            response_modes_supported: Vec::new(),
            scopes_supported: Vec::new(),
            code_challenge_methods_supported: Vec::new(),
        }
    }

    /// Fetches the metadata document from the issuer URL
    /// (appends `/.well-known/openid-configuration`).
    pub async fn discover(issuer_url: &str, client: &reqwest::Client) -> Result<Self, AuthError> {
        let discovery_uri = format!(
            "{}/.well-known/openid-configuration",
            issuer_url.trim_end_matches('/')
        );
        Self::fetch(&discovery_uri, client).await
    }

    /// Fetches the metadata document from a full discovery URI.
    pub async fn fetch(discovery_uri: &str, client: &reqwest::Client) -> Result<Self, AuthError> {
        let url = url::Url::parse(discovery_uri).map_err(|e| {
            AuthError::Discovery(format!("invalid discovery URI '{discovery_uri}': {e}"))
        })?;

        debug!(%url, "fetching provider metadata");
        let response = client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Discovery(format!(
                "discovery endpoint {discovery_uri} returned {status}"
            )));
        }

        response
            .json::<Self>()
            .await
            .map_err(|e| AuthError::Discovery(format!("malformed discovery document: {e}")))
    }

    /// Whether the provider advertises the given response type.
    ///
    /// Providers that do not advertise any are assumed to accept everything.
    pub fn supports_response_type(&self, response_type: &str) -> bool {
        self.response_types_supported.is_empty()
            || self
                .response_types_supported
                .iter()
                .any(|r| r == response_type)
    }
}
