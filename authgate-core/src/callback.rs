use http::request::Parts;
use serde::{Deserialize, Serialize};

/// Parameters an identity provider sends back to the callback URL.
///
/// Depending on the response mode they arrive in the query string, in the
/// fragment (relayed by the browser) or in a form-encoded POST body. Web glue
/// that parsed a body stores the result in the request extensions, where
/// [`CallbackParams::from_request`] picks it up before looking at the query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackParams {
    /// Authorization code.
    pub code: Option<String>,
    /// Opaque state echoed by the provider.
    pub state: Option<String>,
    /// ID token returned directly (implicit and hybrid flows).
    pub id_token: Option<String>,
    /// Access token returned directly (implicit and hybrid flows).
    pub access_token: Option<String>,
    /// Token type of a directly returned access token.
    pub token_type: Option<String>,
    /// Lifetime of a directly returned access token.
    pub expires_in: Option<u64>,
    /// OAuth error code.
    pub error: Option<String>,
    /// Human readable error description.
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse `application/x-www-form-urlencoded` pairs, ignoring unknown keys.
    pub fn from_form(input: &[u8]) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(input) {
            let value = value.into_owned();
            match key.as_ref() {
                "code" => params.code = Some(value),
                "state" => params.state = Some(value),
                "id_token" => params.id_token = Some(value),
                "access_token" => params.access_token = Some(value),
                "token_type" => params.token_type = Some(value),
                "expires_in" => params.expires_in = value.parse().ok(),
                "error" => params.error = Some(value),
                "error_description" => params.error_description = Some(value),
                _ => {}
            }
        }
        params
    }

    /// Parse a query string.
    pub fn from_query(query: Option<&str>) -> Self {
        query
            .map(|q| Self::from_form(q.as_bytes()))
            .unwrap_or_default()
    }

    /// Parameters carried by a request: extensions first, then the query string.
    pub fn from_request(parts: &Parts) -> Self {
        parts
            .extensions
            .get::<CallbackParams>()
            .cloned()
            .unwrap_or_else(|| Self::from_query(parts.uri.query()))
    }

    /// Whether these parameters are a provider response rather than an
    /// ordinary request.
    pub fn is_callback(&self) -> bool {
        self.code.is_some()
            || self.id_token.is_some()
            || self.access_token.is_some()
            || self.error.is_some()
    }
}

/// An instruction to send the user agent to another location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectAction {
    location: String,
}

impl RedirectAction {
    /// Create a redirect to `location`.
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }

    /// The target location.
    pub fn location(&self) -> &str {
        &self.location
    }
}
