//! Typed handler settings.
//!
//! Settings arrive as a flat string map with well-known keys. They are accepted
//! as-is: only the presence of the four required values is checked here, and
//! malformed values surface later when the provider rejects them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identity provider type (`generic`, `keycloak`).
pub const IDP_TYPE: &str = "idpType";
/// OAuth client id.
pub const CLIENT_ID: &str = "clientId";
/// Keycloak realm.
pub const REALM: &str = "realm";
/// OAuth client secret.
pub const SECRET: &str = "secret";
/// Full URL of the provider discovery document.
pub const DISCOVERY_URI: &str = "discoveryUri";
/// Base URI of the provider, used with `realm` to locate Keycloak discovery.
pub const BASE_URI: &str = "baseUri";
/// External origin of this application, e.g. `https://app.example.com`.
/// The callback and post-logout URLs are built from it.
pub const APP_BASE_URI: &str = "appBaseUri";
/// Space separated scopes.
pub const SCOPE: &str = "scope";
/// Whether to send and check a nonce (`true`/`false`).
pub const USE_NONCE: &str = "useNonce";
/// Response type used by the default flow.
pub const DEFAULT_RESPONSE_TYPE: &str = "defaultResponseType";
/// Response mode (`query`, `fragment`, `form_post`).
pub const RESPONSE_MODE: &str = "responseMode";
/// Provider logout URI, used when discovery does not advertise one.
pub const LOGOUT_URI: &str = "logoutUri";

/// The values that must be present for the handler to count as configured.
pub const REQUIRED_KEYS: [&str; 4] = [IDP_TYPE, CLIENT_ID, SECRET, DISCOVERY_URI];

const DEFAULT_SCOPE: &str = "openid profile email";

/// Whether the required settings are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completeness {
    /// Every required key has a non-empty value.
    Complete,
    /// Some required keys are missing or empty.
    Incomplete {
        /// The missing keys, in [`REQUIRED_KEYS`] order.
        missing: Vec<&'static str>,
    },
}

impl Completeness {
    /// Shorthand for `matches!(self, Completeness::Complete)`.
    pub fn is_complete(&self) -> bool {
        matches!(self, Completeness::Complete)
    }
}

/// Kind of identity provider, as far as it changes configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdpType {
    /// Keycloak: the discovery URI can be derived from the base URI and realm.
    Keycloak,
    /// Any other OpenID Connect provider.
    Generic,
}

/// Handler settings, one optional field per recognised key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OidcSettings {
    /// See [`IDP_TYPE`].
    pub idp_type: Option<String>,
    /// See [`CLIENT_ID`].
    pub client_id: Option<String>,
    /// See [`REALM`].
    pub realm: Option<String>,
    /// See [`SECRET`].
    pub secret: Option<String>,
    /// See [`DISCOVERY_URI`].
    pub discovery_uri: Option<String>,
    /// See [`BASE_URI`].
    pub base_uri: Option<String>,
    /// See [`SCOPE`].
    pub scope: Option<String>,
    /// See [`USE_NONCE`].
    pub use_nonce: Option<String>,
    /// See [`DEFAULT_RESPONSE_TYPE`].
    pub default_response_type: Option<String>,
    /// See [`RESPONSE_MODE`].
    pub response_mode: Option<String>,
    /// See [`LOGOUT_URI`].
    pub logout_uri: Option<String>,
    /// See [`APP_BASE_URI`].
    pub app_base_uri: Option<String>,
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

impl OidcSettings {
    /// Read settings from a property map. Unknown keys are ignored.
    pub fn from_properties(properties: &HashMap<String, String>) -> Self {
        let get = |key: &str| properties.get(key).cloned();
        Self {
            idp_type: get(IDP_TYPE),
            client_id: get(CLIENT_ID),
            realm: get(REALM),
            secret: get(SECRET),
            discovery_uri: get(DISCOVERY_URI),
            base_uri: get(BASE_URI),
            scope: get(SCOPE),
            use_nonce: get(USE_NONCE),
            default_response_type: get(DEFAULT_RESPONSE_TYPE),
            response_mode: get(RESPONSE_MODE),
            logout_uri: get(LOGOUT_URI),
            app_base_uri: get(APP_BASE_URI),
        }
    }

    /// Read settings from `OIDC_*` environment variables
    /// (`OIDC_IDP_TYPE`, `OIDC_CLIENT_ID`, `OIDC_REALM`, ...).
    pub fn from_env() -> Self {
        Self::from_env_with_prefix("OIDC_")
    }

    /// Read settings from environment variables with a custom prefix.
    pub fn from_env_with_prefix(prefix: &str) -> Self {
        let get = |name: &str| std::env::var(format!("{prefix}{name}")).ok();
        Self {
            idp_type: get("IDP_TYPE"),
            client_id: get("CLIENT_ID"),
            realm: get("REALM"),
            secret: get("SECRET"),
            discovery_uri: get("DISCOVERY_URI"),
            base_uri: get("BASE_URI"),
            scope: get("SCOPE"),
            use_nonce: get("USE_NONCE"),
            default_response_type: get("DEFAULT_RESPONSE_TYPE"),
            response_mode: get("RESPONSE_MODE"),
            logout_uri: get("LOGOUT_URI"),
            app_base_uri: get("APP_BASE_URI"),
        }
    }

    /// Check that the required keys are present. Content is not validated.
    pub fn completeness(&self) -> Completeness {
        let present = [
            non_empty(&self.idp_type),
            non_empty(&self.client_id),
            non_empty(&self.secret),
            non_empty(&self.discovery_uri),
        ];
        let missing: Vec<&'static str> = REQUIRED_KEYS
            .iter()
            .zip(present)
            .filter(|(_, present)| !present)
            .map(|(key, _)| *key)
            .collect();

        if missing.is_empty() {
            Completeness::Complete
        } else {
            Completeness::Incomplete { missing }
        }
    }

    /// Provider kind. Unrecognised values are treated as generic.
    pub fn idp(&self) -> IdpType {
        match self.idp_type.as_deref() {
            Some(t) if t.trim().eq_ignore_ascii_case("keycloak") => IdpType::Keycloak,
            _ => IdpType::Generic,
        }
    }

    /// `useNonce` as a boolean; anything but `true` is `false`.
    pub fn nonce_enabled(&self) -> bool {
        self.use_nonce
            .as_deref()
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    /// Scope to request, falling back to `openid profile email`.
    pub fn effective_scope(&self) -> String {
        self.scope
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SCOPE.to_string())
    }

    /// `appBaseUri` without a trailing slash, when set.
    pub fn app_origin(&self) -> Option<&str> {
        self.app_base_uri
            .as_deref()
            .map(|b| b.trim().trim_end_matches('/'))
            .filter(|b| !b.is_empty())
    }

    /// Discovery URI, derived from base URI and realm for Keycloak when absent.
    pub fn effective_discovery_uri(&self) -> String {
        if let Some(uri) = self.discovery_uri.clone().filter(|u| !u.is_empty()) {
            return uri;
        }
        match (self.idp(), self.base_uri.as_deref(), self.realm.as_deref()) {
            (IdpType::Keycloak, Some(base), Some(realm)) => format!(
                "{}/realms/{realm}/.well-known/openid-configuration",
                base.trim_end_matches('/')
            ),
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn reports_missing_keys() {
        let settings = OidcSettings::from_properties(&props(&[(CLIENT_ID, "c"), (SECRET, "")]));
        assert_eq!(
            settings.completeness(),
            Completeness::Incomplete {
                missing: vec![IDP_TYPE, SECRET, DISCOVERY_URI]
            }
        );
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let settings = OidcSettings::from_properties(&props(&[("bogus", "x"), (REALM, "master")]));
        assert_eq!(settings.realm.as_deref(), Some("master"));
        assert_eq!(
            settings,
            OidcSettings {
                realm: Some("master".into()),
                ..Default::default()
            }
        );
    }

    #[test]
    fn deserializes_camel_case_json() {
        let settings: OidcSettings = serde_json::from_str(
            r#"{"idpType":"generic","clientId":"c","secret":"s","discoveryUri":"d","useNonce":"true"}"#,
        )
        .unwrap();
        assert!(settings.completeness().is_complete());
        assert!(settings.nonce_enabled());
    }

    #[test]
    fn lenient_nonce_flag() {
        let mut settings = OidcSettings::default();
        assert!(!settings.nonce_enabled());
        settings.use_nonce = Some("invalid useNonce".into());
        assert!(!settings.nonce_enabled());
        settings.use_nonce = Some(" TRUE ".into());
        assert!(settings.nonce_enabled());
    }

    #[test]
    fn scope_defaults() {
        let mut settings = OidcSettings::default();
        assert_eq!(settings.effective_scope(), "openid profile email");
        settings.scope = Some("openid".into());
        assert_eq!(settings.effective_scope(), "openid");
    }

    #[test]
    fn keycloak_discovery_uri_from_realm() {
        let settings = OidcSettings {
            idp_type: Some("Keycloak".into()),
            base_uri: Some("https://sso.example.com/auth/".into()),
            realm: Some("master".into()),
            ..Default::default()
        };
        assert_eq!(settings.idp(), IdpType::Keycloak);
        assert_eq!(
            settings.effective_discovery_uri(),
            "https://sso.example.com/auth/realms/master/.well-known/openid-configuration"
        );
        assert_eq!(OidcSettings::default().effective_discovery_uri(), "");
    }

    #[test]
    fn provider_base_is_not_the_app_origin() {
        let settings = OidcSettings::from_properties(&props(&[
            (IDP_TYPE, "keycloak"),
            (BASE_URI, "http://localhost:8080"),
            (REALM, "demo"),
            (APP_BASE_URI, "http://localhost:3000/"),
        ]));
        assert_eq!(
            settings.effective_discovery_uri(),
            "http://localhost:8080/realms/demo/.well-known/openid-configuration"
        );
        assert_eq!(settings.app_origin(), Some("http://localhost:3000"));
        assert_eq!(OidcSettings::default().app_origin(), None);
    }
}
