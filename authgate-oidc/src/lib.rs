//! # Authgate OIDC
//!
//! Flow configuration for the authgate OpenID Connect handler.
//!
//! [`HandlerConfiguration`] turns [`OidcSettings`] into an OIDC and an OAuth
//! [`ProtocolConfiguration`] plus the clients bound to them. Protocol work is
//! delegated to an [`IdentityProviderClient`]; [`HttpIdentityProvider`] is the
//! default implementation and checks ID tokens with [`IdTokenValidator`].

pub mod client;
pub mod configuration;
pub mod factory;
pub mod protocol;
pub mod provider;
pub mod settings;
pub mod validation;

pub use client::{
    Evaluation, IdentityProviderClient, LogoutActionBuilder, OAuthClient, OidcClient,
    OidcProfileCreator, ProviderClient,
};
pub use configuration::{ensure_ready, Flow, HandlerConfiguration, SharedConfiguration, Stage};
pub use factory::{ProviderClientFactory, ProviderClients};
pub use protocol::{Protocol, ProtocolConfiguration};
pub use provider::HttpIdentityProvider;
pub use settings::{Completeness, IdpType, OidcSettings};
pub use validation::{IdTokenClaims, IdTokenValidator};

/// Path the provider redirects back to after login.
pub const CALLBACK_PATH: &str = "/auth/oidc/callback";
/// Path that starts a provider logout.
pub const LOGOUT_PATH: &str = "/auth/oidc/logout";
/// Path the provider redirects back to after logout.
pub const LOGOUT_CALLBACK_PATH: &str = "/auth/oidc/logout/callback";
