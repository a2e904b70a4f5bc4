//! # Authgate
//!
//! OpenID Connect authentication for Rust web services.
//!
//! This crate re-exports the authgate workspace behind feature flags:
//!
//! - `session`: session handles and stores ([`session`]).
//! - `oidc`: settings, the handler configuration state machine and the HTTP
//!   identity provider ([`oidc`]).
//! - `flow` (default): token normalization, provider logout and the logout
//!   callback endpoint ([`flow`]).
//! - `axum`: routes, middleware and extractors for axum ([`axum`]).
//!
//! ```ignore
//! use authgate::oidc::{HandlerConfiguration, OidcSettings};
//!
//! let configuration = HandlerConfiguration::new(OidcSettings::from_env())?.into_shared();
//! ```

pub use authgate_core::*;

/// Session handles and stores.
#[cfg(feature = "session")]
pub mod session {
    pub use authgate_session::*;
}

/// Provider settings, handler configuration and protocol clients.
#[cfg(feature = "oidc")]
pub mod oidc {
    pub use authgate_oidc::*;
}

/// Per-request authentication and logout.
#[cfg(feature = "flow")]
pub mod flow {
    pub use authgate_flow::*;
}

/// Axum integration.
#[cfg(feature = "axum")]
pub mod axum {
    pub use authgate_axum::*;
}
