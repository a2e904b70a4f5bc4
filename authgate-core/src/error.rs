use thiserror::Error;

/// Errors raised while configuring a provider or evaluating a request.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The provider configuration cannot be used: discovery failed, the metadata
    /// document was malformed or a required value such as the callback URL is missing.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// An operation was invoked outside of the context it requires, e.g. a logout
    /// without an authenticated session.
    #[error("Illegal state: {0}")]
    IllegalState(String),
    /// The identity provider rejected the request or answered with an error.
    #[error("Provider error: {0}")]
    Provider(String),
    /// The `state` returned by the provider does not match the one issued.
    #[error("CSRF state mismatch")]
    CsrfMismatch,
    /// The `nonce` claim of the ID token does not match the one issued.
    #[error("Nonce mismatch")]
    NonceMismatch,
    /// The identity provider could not be reached.
    #[error("Network error: {0}")]
    Network(String),
    /// The discovery document could not be retrieved or parsed.
    #[error("Discovery error: {0}")]
    Discovery(String),
    /// Session storage failed.
    #[error("Session error: {0}")]
    Session(String),
    /// A token could not be read.
    #[error("Token error: {0}")]
    Token(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        AuthError::Network(e.to_string())
    }
}
