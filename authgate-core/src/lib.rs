//! # Authgate Core
//!
//! `authgate-core` provides the foundational types shared by the authgate crates:
//! the error type, the credentials and identity produced by an OpenID Connect login,
//! provider discovery metadata and the parameters an identity provider sends back
//! to the callback URL.

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};

/// PKCE (Proof Key for Code Exchange) utilities.
pub mod pkce;

/// Errors that can occur during the authentication process.
pub mod error;
pub use crate::error::AuthError;

/// Identity and credential types produced by a login.
pub mod state;
pub use crate::state::{Identity, OAuthToken, OidcCredentials};

/// Discovery utilities for OpenID Connect providers.
pub mod discovery;
pub use crate::discovery::ProviderMetadata;

/// Callback parameters and redirect instructions.
pub mod callback;
pub use crate::callback::{CallbackParams, RedirectAction};

/// Controls whether a cookie is sent with cross-site requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    /// The cookie is sent with "safe" cross-site requests (e.g., following a link).
    Lax,
    /// The cookie is only sent for same-site requests.
    Strict,
    /// The cookie is sent with all requests, including cross-site. Requires `Secure`.
    None,
}

/// Request inspection helpers.
pub mod utils {
    use crate::AuthError;
    use base64::Engine;
    use http::header::HeaderMap;

    /// Extract a cookie value by name.
    pub fn extract_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
        let cookie_header = headers.get(http::header::COOKIE)?.to_str().ok()?;
        for cookie in cookie_header.split(';') {
            let mut parts = cookie.splitn(2, '=');
            let k = parts.next()?.trim();
            let v = parts.next()?.trim();
            if k == name {
                return Some(v);
            }
        }
        None
    }

    /// Decode the claims segment of a compact JWT without verifying it.
    ///
    /// Signature verification is the identity provider client's concern; this is
    /// only used to read claims out of a token that was already accepted.
    pub fn decode_jwt_payload(
        token: &str,
    ) -> Result<serde_json::Map<String, serde_json::Value>, AuthError> {
        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| AuthError::Token("token is not a compact JWT".into()))?;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| AuthError::Token(format!("invalid token payload encoding: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AuthError::Token(format!("invalid token payload: {e}")))
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use http::request::Parts;
        use http::Request;

        fn parts(builder: http::request::Builder) -> Parts {
            builder.body(()).unwrap().into_parts().0
        }

        #[test]
        fn finds_named_cookie() {
            let p = parts(Request::builder().header("cookie", "a=1; authgate_session=xyz; b=2"));
            assert_eq!(extract_cookie(&p.headers, "authgate_session"), Some("xyz"));
            assert_eq!(extract_cookie(&p.headers, "missing"), None);
        }

        #[test]
        fn decodes_unverified_payload() {
            let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
                .encode(r#"{"sub":"alice","nonce":"n-1"}"#);
            let token = format!("eyJhbGciOiJub25lIn0.{payload}.sig");
            let claims = decode_jwt_payload(&token).unwrap();
            assert_eq!(claims["sub"], "alice");
            assert_eq!(claims["nonce"], "n-1");
        }

        #[test]
        fn rejects_opaque_token() {
            assert!(matches!(
                decode_jwt_payload("opaque"),
                Err(AuthError::Token(_))
            ));
        }
    }
}
