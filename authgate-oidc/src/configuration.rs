//! The handler configuration state machine.
//!
//! A [`HandlerConfiguration`] moves through [`Stage::Unconfigured`] or
//! [`Stage::Configured`] (decided by the settings), then [`Stage::Generated`]
//! once client objects exist, then [`Stage::Initialized`] once provider metadata
//! and the callback URL are bound. Generation never touches the network;
//! initialization may.
//!
//! The callback URL is configuration: it is set explicitly or built from the
//! `appBaseUri` setting, never taken from an incoming request.

use crate::client::{
    IdentityProviderClient, LogoutActionBuilder, OAuthClient, OidcClient, OidcProfileCreator,
};
use crate::factory::{ProviderClientFactory, ProviderClients};
use crate::protocol::ProtocolConfiguration;
use crate::provider::HttpIdentityProvider;
use crate::settings::{Completeness, OidcSettings};
use crate::CALLBACK_PATH;
use authgate_core::{AuthError, ProviderMetadata};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Which authorization flow the generated configurations use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Flow {
    /// Use the `defaultResponseType` setting verbatim.
    #[default]
    Default,
    /// `response_type=code`.
    AuthorizationCode,
    /// `response_type=id_token`.
    Implicit,
    /// `response_type=id_token token`.
    Credential,
}

impl Flow {
    /// Response type for this flow. `Default` returns `default_response_type` as given.
    pub fn response_type(&self, default_response_type: Option<&str>) -> Option<String> {
        match self {
            Flow::Default => default_response_type.map(str::to_string),
            Flow::AuthorizationCode => Some("code".to_string()),
            Flow::Implicit => Some("id_token".to_string()),
            Flow::Credential => Some("id_token token".to_string()),
        }
    }
}

impl FromStr for Flow {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Flow::Default),
            "authorization_code" | "code" => Ok(Flow::AuthorizationCode),
            "implicit" => Ok(Flow::Implicit),
            "credential" => Ok(Flow::Credential),
            other => Err(AuthError::Configuration(format!("unknown flow '{other}'"))),
        }
    }
}

/// Lifecycle stage of a [`HandlerConfiguration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Required settings are missing and nothing was generated.
    Unconfigured,
    /// Required settings are present and nothing was generated.
    Configured,
    /// Configurations and clients exist; metadata is not bound yet.
    Generated,
    /// Callback URL and provider metadata are bound.
    Initialized,
}

/// Handler configuration shared between requests.
pub type SharedConfiguration = Arc<RwLock<HandlerConfiguration>>;

/// Turns [`OidcSettings`] into ready OIDC and OAuth clients.
pub struct HandlerConfiguration {
    settings: OidcSettings,
    completeness: Completeness,
    flow: Flow,
    callback_url: Option<String>,
    metadata_override: Option<ProviderMetadata>,
    factory: ProviderClientFactory,
    generated: Option<ProviderClients>,
    initialized: bool,
}

impl HandlerConfiguration {
    /// Configuration backed by [`HttpIdentityProvider`].
    pub fn new(settings: OidcSettings) -> Result<Self, AuthError> {
        let provider = HttpIdentityProvider::new()?;
        Ok(Self::with_identity_provider(settings, Arc::new(provider)))
    }

    /// Configuration delegating protocol work to `provider`.
    pub fn with_identity_provider(
        settings: OidcSettings,
        provider: Arc<dyn IdentityProviderClient>,
    ) -> Self {
        let completeness = settings.completeness();
        if let Completeness::Incomplete { missing } = &completeness {
            debug!(?missing, "OIDC settings are incomplete");
        }
        let callback_url = settings
            .app_origin()
            .map(|origin| format!("{origin}{CALLBACK_PATH}"));
        Self {
            settings,
            completeness,
            flow: Flow::default(),
            callback_url,
            metadata_override: None,
            factory: ProviderClientFactory::new(provider),
            generated: None,
            initialized: false,
        }
    }

    /// Wrap into a [`SharedConfiguration`].
    pub fn into_shared(self) -> SharedConfiguration {
        Arc::new(RwLock::new(self))
    }

    /// Whether the required settings are present. Values are not validated.
    pub fn is_configured(&self) -> bool {
        self.completeness.is_complete()
    }

    pub fn completeness(&self) -> &Completeness {
        &self.completeness
    }

    pub fn settings(&self) -> &OidcSettings {
        &self.settings
    }

    pub fn flow(&self) -> Flow {
        self.flow
    }

    pub fn stage(&self) -> Stage {
        match (&self.generated, self.initialized) {
            (Some(_), true) => Stage::Initialized,
            (Some(_), false) => Stage::Generated,
            (None, _) if self.is_configured() => Stage::Configured,
            (None, _) => Stage::Unconfigured,
        }
    }

    pub fn is_generated(&self) -> bool {
        self.generated.is_some()
    }

    pub fn is_initialized(&self) -> bool {
        self.generated.is_some() && self.initialized
    }

    /// Select the flow used by the next [`generate`](Self::generate).
    ///
    /// Configurations that were already generated keep their response type.
    pub fn configure_flow(&mut self, flow: Flow) {
        if self.generated.is_some() && flow != self.flow {
            warn!(
                ?flow,
                current = ?self.flow,
                "flow changed after generation; takes effect on the next generate"
            );
        }
        self.flow = flow;
    }

    /// Build both protocol configurations and their clients.
    ///
    /// Works on incomplete settings too. Any earlier generation is replaced and
    /// the configuration drops back to [`Stage::Generated`].
    pub fn generate(&mut self) {
        self.generated = Some(self.factory.generate(&self.settings, self.flow));
        self.initialized = false;
        debug!(flow = ?self.flow, "generated OIDC configurations");
    }

    /// The URL the provider redirects back to. Must be set before [`init`](Self::init)
    /// unless `appBaseUri` is configured.
    pub fn set_callback_url(&mut self, url: impl Into<String>) {
        self.callback_url = Some(url.into());
    }

    pub fn callback_url(&self) -> Option<&str> {
        self.callback_url.as_deref()
    }

    /// Bind provider metadata without discovery.
    pub fn set_provider_metadata(&mut self, metadata: ProviderMetadata) -> Result<(), AuthError> {
        let Some(generated) = &self.generated else {
            return Err(AuthError::IllegalState(
                "provider metadata set before the configuration was generated".into(),
            ));
        };
        let (oidc, oauth) = self.bind(generated, None, Some(&metadata));
        self.generated = Some(self.factory.build(oidc, oauth));
        self.metadata_override = Some(metadata);
        Ok(())
    }

    /// Bind the callback URL and provider metadata into both configurations.
    ///
    /// Metadata injected with [`set_provider_metadata`](Self::set_provider_metadata)
    /// is used as is; otherwise it is fetched from the discovery URI.
    pub async fn init(&mut self) -> Result<(), AuthError> {
        let (callback_url, metadata) = self.prepare_init()?.resolve().await?;
        self.finish_init(&callback_url, metadata)
    }

    fn prepare_init(&self) -> Result<PendingInit, AuthError> {
        let Some(generated) = &self.generated else {
            return Err(AuthError::IllegalState(
                "init called before the configuration was generated".into(),
            ));
        };

        let Some(callback_url) = self.callback_url.clone() else {
            error!("cannot initialize OIDC configuration without a callback URL");
            return Err(AuthError::Configuration(
                "no callback URL set; configure appBaseUri or set one explicitly".into(),
            ));
        };

        let metadata = match &self.metadata_override {
            Some(metadata) => MetadataSource::Known(metadata.clone()),
            None => {
                let discovery_uri = generated.oidc_configuration.discovery_uri().to_string();
                if discovery_uri.is_empty() {
                    error!("cannot initialize OIDC configuration without a discovery URI");
                    return Err(AuthError::Configuration("no discovery URI set".into()));
                }
                MetadataSource::Discover {
                    discovery_uri,
                    provider: self.factory.identity_provider(),
                }
            }
        };
        Ok(PendingInit {
            callback_url,
            metadata,
        })
    }

    fn finish_init(&mut self, callback_url: &str, metadata: ProviderMetadata) -> Result<(), AuthError> {
        let Some(generated) = &self.generated else {
            return Err(AuthError::IllegalState(
                "configuration was reset during initialization".into(),
            ));
        };
        let (oidc, oauth) = self.bind(generated, Some(callback_url), Some(&metadata));
        self.generated = Some(self.factory.build(oidc, oauth));
        self.initialized = true;
        info!(issuer = %metadata.issuer, %callback_url, "OIDC configuration initialized");
        Ok(())
    }

    fn bind(
        &self,
        generated: &ProviderClients,
        callback_url: Option<&str>,
        metadata: Option<&ProviderMetadata>,
    ) -> (ProtocolConfiguration, ProtocolConfiguration) {
        let mut oidc = generated.oidc_configuration.as_ref().clone();
        let mut oauth = generated.oauth_configuration.as_ref().clone();
        for config in [&mut oidc, &mut oauth] {
            if let Some(url) = callback_url {
                config.set_callback_url(url);
            }
            if let Some(metadata) = metadata {
                config.set_provider_metadata(metadata.clone());
            }
        }
        (oidc, oauth)
    }

    pub fn oidc_configuration(&self) -> Option<&ProtocolConfiguration> {
        self.generated.as_ref().map(|g| g.oidc_configuration.as_ref())
    }

    pub fn oauth_configuration(&self) -> Option<&ProtocolConfiguration> {
        self.generated.as_ref().map(|g| g.oauth_configuration.as_ref())
    }

    pub fn oidc_client(&self) -> Option<&OidcClient> {
        self.generated.as_ref().map(|g| &g.oidc_client)
    }

    pub fn oauth_client(&self) -> Option<&OAuthClient> {
        self.generated.as_ref().map(|g| &g.oauth_client)
    }

    pub fn logout_action_builder(&self) -> Option<&LogoutActionBuilder> {
        self.generated.as_ref().map(|g| &g.logout_action_builder)
    }

    pub fn oidc_profile_creator(&self) -> Option<&OidcProfileCreator> {
        self.generated.as_ref().map(|g| &g.profile_creator)
    }

    /// The OIDC client when initialized, without any lazy work.
    pub fn ready_oidc_client(&self) -> Option<OidcClient> {
        if self.is_initialized() {
            self.oidc_client().cloned()
        } else {
            None
        }
    }
}

/// Initialization work that runs without holding the configuration lock.
struct PendingInit {
    callback_url: String,
    metadata: MetadataSource,
}

enum MetadataSource {
    Known(ProviderMetadata),
    Discover {
        discovery_uri: String,
        provider: Arc<dyn IdentityProviderClient>,
    },
}

impl PendingInit {
    async fn resolve(self) -> Result<(String, ProviderMetadata), AuthError> {
        let metadata = match self.metadata {
            MetadataSource::Known(metadata) => metadata,
            MetadataSource::Discover {
                discovery_uri,
                provider,
            } => provider.fetch_metadata(&discovery_uri).await.map_err(|e| {
                error!(%discovery_uri, error = %e, "provider metadata unavailable");
                AuthError::Configuration(format!(
                    "provider metadata unavailable from {discovery_uri}: {e}"
                ))
            })?,
        };
        Ok((self.callback_url, metadata))
    }
}

/// Return the ready OIDC client, generating and initializing on first use.
///
/// Discovery runs with no lock held; the write lock is only taken to generate
/// and to install the fetched metadata.
pub async fn ensure_ready(configuration: &SharedConfiguration) -> Result<OidcClient, AuthError> {
    if let Some(client) = configuration.read().await.ready_oidc_client() {
        return Ok(client);
    }

    let pending = {
        let mut guard = configuration.write().await;
        if let Some(client) = guard.ready_oidc_client() {
            return Ok(client);
        }
        if !guard.is_generated() {
            guard.generate();
        }
        guard.prepare_init()?
    };
    let (callback_url, metadata) = pending.resolve().await?;

    let mut guard = configuration.write().await;
    if let Some(client) = guard.ready_oidc_client() {
        return Ok(client);
    }
    guard.finish_init(&callback_url, metadata)?;
    guard
        .oidc_client()
        .cloned()
        .ok_or_else(|| AuthError::IllegalState("OIDC client missing after init".into()))
}

impl std::fmt::Debug for HandlerConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerConfiguration")
            .field("stage", &self.stage())
            .field("flow", &self.flow)
            .field("callback_url", &self.callback_url)
            .finish_non_exhaustive()
    }
}
