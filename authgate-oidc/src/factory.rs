use crate::client::{
    IdentityProviderClient, LogoutActionBuilder, OAuthClient, OidcClient, OidcProfileCreator,
    ProviderClient,
};
use crate::configuration::Flow;
use crate::protocol::{Protocol, ProtocolConfiguration};
use crate::settings::OidcSettings;
use std::sync::Arc;

/// Everything produced by one generation of a handler configuration.
#[derive(Clone)]
pub struct ProviderClients {
    pub oidc_configuration: Arc<ProtocolConfiguration>,
    pub oauth_configuration: Arc<ProtocolConfiguration>,
    pub oidc_client: OidcClient,
    pub oauth_client: OAuthClient,
    pub logout_action_builder: LogoutActionBuilder,
    pub profile_creator: OidcProfileCreator,
}

/// Builds protocol configurations and the client objects bound to them.
///
/// All clients share one [`IdentityProviderClient`].
#[derive(Clone)]
pub struct ProviderClientFactory {
    provider: Arc<dyn IdentityProviderClient>,
}

impl ProviderClientFactory {
    pub fn new(provider: Arc<dyn IdentityProviderClient>) -> Self {
        Self { provider }
    }

    pub fn identity_provider(&self) -> Arc<dyn IdentityProviderClient> {
        self.provider.clone()
    }

    /// The OpenID Connect configuration for `flow`.
    pub fn oidc_configuration(&self, settings: &OidcSettings, flow: Flow) -> ProtocolConfiguration {
        let response_type = flow.response_type(settings.default_response_type.as_deref());
        ProtocolConfiguration::from_settings(Protocol::Oidc, settings, response_type)
    }

    /// The OAuth 2.0 configuration for `flow`.
    pub fn oauth_configuration(
        &self,
        settings: &OidcSettings,
        flow: Flow,
    ) -> ProtocolConfiguration {
        let response_type = flow.response_type(settings.default_response_type.as_deref());
        ProtocolConfiguration::from_settings(Protocol::OAuth, settings, response_type)
    }

    /// Bind clients, logout builder and profile creator to the two configurations.
    pub fn build(
        &self,
        oidc: ProtocolConfiguration,
        oauth: ProtocolConfiguration,
    ) -> ProviderClients {
        let oidc = Arc::new(oidc);
        let oauth = Arc::new(oauth);
        ProviderClients {
            oidc_client: ProviderClient::new(oidc.clone(), self.provider.clone()),
            oauth_client: ProviderClient::new(oauth.clone(), self.provider.clone()),
            logout_action_builder: LogoutActionBuilder::new(oidc.clone(), self.provider.clone()),
            profile_creator: OidcProfileCreator::new(oidc.clone()),
            oidc_configuration: oidc,
            oauth_configuration: oauth,
        }
    }

    /// Configurations and clients for `settings` and `flow`, without network I/O.
    pub fn generate(&self, settings: &OidcSettings, flow: Flow) -> ProviderClients {
        self.build(
            self.oidc_configuration(settings, flow),
            self.oauth_configuration(settings, flow),
        )
    }
}
