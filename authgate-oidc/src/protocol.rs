use crate::settings::OidcSettings;
use crate::LOGOUT_CALLBACK_PATH;
use authgate_core::ProviderMetadata;

/// Which protocol a configuration targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// OpenID Connect: scopes include `openid`, nonce and ID tokens apply.
    Oidc,
    /// Plain OAuth 2.0.
    OAuth,
}

/// A fully resolved client configuration for one protocol.
///
/// Built by [`crate::ProviderClientFactory`] at generation time; callback URL and
/// provider metadata are bound when the handler configuration is initialized.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolConfiguration {
    protocol: Protocol,
    idp_type: Option<String>,
    client_id: String,
    secret: String,
    realm: Option<String>,
    discovery_uri: String,
    base_uri: Option<String>,
    scope: String,
    use_nonce: bool,
    response_type: Option<String>,
    response_mode: Option<String>,
    logout_uri: Option<String>,
    app_origin: Option<String>,
    callback_url: Option<String>,
    provider_metadata: Option<ProviderMetadata>,
}

impl ProtocolConfiguration {
    /// Resolve `settings` for `protocol` with the given response type.
    pub fn from_settings(
        protocol: Protocol,
        settings: &OidcSettings,
        response_type: Option<String>,
    ) -> Self {
        let use_nonce = match protocol {
            Protocol::Oidc => settings.nonce_enabled(),
            Protocol::OAuth => false,
        };
        Self {
            protocol,
            idp_type: settings.idp_type.clone(),
            client_id: settings.client_id.clone().unwrap_or_default(),
            secret: settings.secret.clone().unwrap_or_default(),
            realm: settings.realm.clone(),
            discovery_uri: settings.effective_discovery_uri(),
            base_uri: settings.base_uri.clone(),
            scope: settings.effective_scope(),
            use_nonce,
            response_type,
            response_mode: settings.response_mode.clone().filter(|m| !m.is_empty()),
            logout_uri: settings.logout_uri.clone().filter(|u| !u.is_empty()),
            app_origin: settings.app_origin().map(str::to_string),
            callback_url: None,
            provider_metadata: None,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn idp_type(&self) -> Option<&str> {
        self.idp_type.as_deref()
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    pub fn discovery_uri(&self) -> &str {
        &self.discovery_uri
    }

    pub fn base_uri(&self) -> Option<&str> {
        self.base_uri.as_deref()
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn use_nonce(&self) -> bool {
        self.use_nonce
    }

    /// The `response_type` sent to the provider, fixed at generation time.
    pub fn response_type(&self) -> Option<&str> {
        self.response_type.as_deref()
    }

    pub fn response_mode(&self) -> Option<&str> {
        self.response_mode.as_deref()
    }

    pub fn logout_uri(&self) -> Option<&str> {
        self.logout_uri.as_deref()
    }

    pub fn callback_url(&self) -> Option<&str> {
        self.callback_url.as_deref()
    }

    /// Where the provider sends the user agent after logout: the application
    /// origin, else the origin of the callback URL, plus the logout callback path.
    pub fn post_logout_redirect_uri(&self) -> Option<String> {
        let origin = match &self.app_origin {
            Some(origin) => origin.clone(),
            None => {
                let callback = url::Url::parse(self.callback_url.as_deref()?).ok()?;
                callback.origin().ascii_serialization()
            }
        };
        Some(format!("{origin}{LOGOUT_CALLBACK_PATH}"))
    }

    pub fn provider_metadata(&self) -> Option<&ProviderMetadata> {
        self.provider_metadata.as_ref()
    }

    /// Identifier used as the provider of derived identities.
    pub fn provider_id(&self) -> &str {
        self.provider_metadata
            .as_ref()
            .map(|m| m.issuer.as_str())
            .or(self.idp_type.as_deref())
            .unwrap_or("oidc")
    }

    pub(crate) fn set_callback_url(&mut self, url: impl Into<String>) {
        self.callback_url = Some(url.into());
    }

    pub(crate) fn set_provider_metadata(&mut self, metadata: ProviderMetadata) {
        self.provider_metadata = Some(metadata);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> OidcSettings {
        OidcSettings {
            idp_type: Some("generic".into()),
            client_id: Some("generic-client".into()),
            secret: Some("changeit".into()),
            discovery_uri: Some("https://discovery/uri".into()),
            use_nonce: Some("true".into()),
            response_mode: Some(String::new()),
            ..Default::default()
        }
    }

    #[test]
    fn oauth_never_uses_nonce() {
        let oidc = ProtocolConfiguration::from_settings(Protocol::Oidc, &settings(), None);
        let oauth = ProtocolConfiguration::from_settings(Protocol::OAuth, &settings(), None);
        assert!(oidc.use_nonce());
        assert!(!oauth.use_nonce());
    }

    #[test]
    fn empty_optional_values_are_absent() {
        let config = ProtocolConfiguration::from_settings(Protocol::Oidc, &settings(), None);
        assert_eq!(config.response_mode(), None);
        assert_eq!(config.callback_url(), None);
        assert_eq!(config.client_id(), "generic-client");
    }

    #[test]
    fn provider_id_prefers_issuer() {
        let mut config = ProtocolConfiguration::from_settings(Protocol::Oidc, &settings(), None);
        assert_eq!(config.provider_id(), "generic");
        config.set_provider_metadata(ProviderMetadata::new("https://issuer", "https://issuer/auth"));
        assert_eq!(config.provider_id(), "https://issuer");
    }

    #[test]
    fn post_logout_redirect_follows_app_origin() {
        let mut config = ProtocolConfiguration::from_settings(Protocol::Oidc, &settings(), None);
        assert_eq!(config.post_logout_redirect_uri(), None);

        config.set_callback_url("https://app.example.com/auth/oidc/callback");
        assert_eq!(
            config.post_logout_redirect_uri().as_deref(),
            Some("https://app.example.com/auth/oidc/logout/callback")
        );

        let settings = OidcSettings {
            base_uri: Some("https://sso.example.com".into()),
            app_base_uri: Some("https://portal.example.com/".into()),
            ..settings()
        };
        let config = ProtocolConfiguration::from_settings(Protocol::Oidc, &settings, None);
        assert_eq!(
            config.post_logout_redirect_uri().as_deref(),
            Some("https://portal.example.com/auth/oidc/logout/callback")
        );
    }
}
