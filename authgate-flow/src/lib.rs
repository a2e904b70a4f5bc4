//! # Authgate Flow
//!
//! `authgate-flow` drives OpenID Connect authentication for individual requests.
//! It sits between a [`HandlerConfiguration`](authgate_oidc::HandlerConfiguration)
//! and the framework-specific adapters.
//!
//! ## Key Components
//!
//! - **[`OidcHandler`]**: Normalizes a request into a [`HandlerResult`]: no action,
//!   a redirect to the provider, a completed login, or an error.
//! - **[`OidcLogoutActionProvider`]**: Builds the provider logout [`Action`] from
//!   the credentials held in the session.
//! - **[`OidcCallbackEndpoint`]**: Ends the local session when the provider sends
//!   the user agent back after logout.
//! - **[`ResponseSink`]**: The response side of the exchange, with
//!   [`BufferedResponse`] as the in-memory implementation.

#![warn(missing_docs)]

/// Logout callback endpoint.
pub mod endpoint;
/// Token normalization.
pub mod handler;
/// Logout action construction.
pub mod logout;
/// Response abstraction.
pub mod response;

#[cfg(test)]
mod testing;

pub use endpoint::OidcCallbackEndpoint;
pub use handler::{
    take_requested_url, HandlerResult, OidcAuthenticationToken, OidcHandler, OidcHandlerBuilder,
    Status, AUTHENTICATION_TYPE, REQUESTED_URL_KEY,
};
pub use logout::{Action, LogoutContext, OidcLogoutActionProvider, LOGOUT_ACTION_ID};
pub use response::{BufferedResponse, ResponseSink};

/// Marker for a missing component in the typestate pattern.
#[derive(Clone, Default)]
pub struct Missing;

/// Marker for a configured component in the typestate pattern.
#[derive(Clone)]
pub struct Configured<T>(pub T);
