use crate::{error::AuthError, utils::decode_jwt_payload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A unified identity structure derived from a provider login.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Identifier of the provider that authenticated the user (e.g. the issuer).
    pub provider_id: String,
    /// Subject identifier at the provider.
    pub external_id: String,
    /// Email address, when released by the provider.
    pub email: Option<String>,
    /// Preferred username, when released by the provider.
    pub username: Option<String>,
    /// Remaining string claims.
    pub attributes: HashMap<String, String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// A token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    /// The access token issued by the authorization server.
    pub access_token: String,
    /// The type of the token, usually `Bearer`.
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime in seconds of the access token.
    pub expires_in: Option<u64>,
    /// The refresh token, if one was issued.
    pub refresh_token: Option<String>,
    /// The scopes granted.
    pub scope: Option<String>,
    /// The ID token, for OpenID Connect flows.
    pub id_token: Option<String>,
}

/// Credentials obtained from an identity provider.
///
/// This is the value stored in the session token slot after a successful login
/// and read back when building the provider logout redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcCredentials {
    /// Authorization code, kept only until it has been exchanged.
    pub code: Option<String>,
    /// Access token.
    pub access_token: Option<String>,
    /// ID token (compact JWT).
    pub id_token: Option<String>,
    /// Refresh token.
    pub refresh_token: Option<String>,
    /// Token type of the access token.
    pub token_type: Option<String>,
    /// Expiry of the access token.
    pub expires_at: Option<DateTime<Utc>>,
}

impl OidcCredentials {
    /// Build credentials from a token endpoint response.
    pub fn from_token(token: OAuthToken) -> Self {
        let expires_at = token
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
        Self {
            code: None,
            access_token: Some(token.access_token),
            id_token: token.id_token,
            refresh_token: token.refresh_token,
            token_type: Some(token.token_type),
            expires_at,
        }
    }

    /// True when neither an access token nor an ID token is present.
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.id_token.is_none()
    }

    /// True when the access token carries an expiry in the past.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }

    /// Claims of the ID token, read without signature verification.
    pub fn id_token_claims(
        &self,
    ) -> Result<Option<serde_json::Map<String, serde_json::Value>>, AuthError> {
        self.id_token.as_deref().map(decode_jwt_payload).transpose()
    }
}
