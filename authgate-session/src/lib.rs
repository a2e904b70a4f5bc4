//! # Authgate Session
//!
//! Server-side sessions for the authgate handler. A [`Session`] is a cheap,
//! cloneable handle: every clone observes the same attributes, so a session put
//! into the request extensions by the web layer and one loaded from a
//! [`SessionStore`] are the same session.
//!
//! The authenticated credentials live in a single well-known slot,
//! [`SECURITY_TOKEN_KEY`], holding a [`SecurityTokenHolder`].

use authgate_core::{AuthError, OidcCredentials, SameSite};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod factory;
pub mod memory;

pub use factory::{SessionFactory, StoreSessionFactory};
pub use memory::MemoryStore;

/// Session attribute under which the authenticated credentials are kept.
pub const SECURITY_TOKEN_KEY: &str = "authgate.security.token";

/// Holder for the credentials of the authenticated user.
///
/// The slot can be absent (nobody ever logged in on this session) or present
/// with no token (the token was cleared); callers that need a token treat both
/// as distinct failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityTokenHolder {
    token: Option<OidcCredentials>,
}

impl SecurityTokenHolder {
    /// A holder carrying `token`.
    pub fn new(token: OidcCredentials) -> Self {
        Self { token: Some(token) }
    }

    /// The held credentials.
    pub fn security_token(&self) -> Option<&OidcCredentials> {
        self.token.as_ref()
    }

    /// Replace the held credentials.
    pub fn set_security_token(&mut self, token: OidcCredentials) {
        self.token = Some(token);
    }

    /// Drop the held credentials, keeping the holder.
    pub fn remove(&mut self) -> Option<OidcCredentials> {
        self.token.take()
    }
}

/// Configuration for the session cookie.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name of the cookie carrying the session id.
    pub cookie_name: String,
    /// Cookie path.
    pub path: String,
    /// Whether the cookie should only be sent over HTTPS.
    pub secure: bool,
    /// Whether the cookie is hidden from scripts.
    pub http_only: bool,
    /// Cross-site policy.
    pub same_site: SameSite,
    /// Lifetime of a session. `None` falls back to 24 hours.
    pub max_age: Option<chrono::Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "authgate_session".to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
            max_age: Some(chrono::Duration::hours(24)),
        }
    }
}

impl SessionConfig {
    /// Effective session lifetime.
    pub fn lifetime(&self) -> chrono::Duration {
        self.max_age.unwrap_or(chrono::Duration::hours(24))
    }
}

#[derive(Debug)]
struct SessionState {
    attributes: HashMap<String, serde_json::Value>,
    expires_at: DateTime<Utc>,
    invalidated: bool,
}

#[derive(Debug)]
struct SessionInner {
    id: String,
    state: RwLock<SessionState>,
}

/// A server-side session handle.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("expires_at", &state.expires_at)
            .field("invalidated", &state.invalidated)
            .field("attributes", &state.attributes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Session {
    /// A new session with a random id, valid for `lifetime`.
    pub fn new(lifetime: chrono::Duration) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), Utc::now() + lifetime)
    }

    /// A session with a known id, e.g. when restoring one from storage.
    pub fn with_id(id: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: id.into(),
                state: RwLock::new(SessionState {
                    attributes: HashMap::new(),
                    expires_at,
                    invalidated: false,
                }),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_live(&self, state: &SessionState) -> Result<(), AuthError> {
        if state.invalidated {
            return Err(AuthError::IllegalState(format!(
                "session {} has been invalidated",
                self.inner.id
            )));
        }
        Ok(())
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Expiry instant.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.read().expires_at
    }

    /// Whether [`Session::invalidate`] has been called on any clone.
    pub fn is_invalidated(&self) -> bool {
        self.read().invalidated
    }

    /// Neither invalidated nor expired.
    pub fn is_valid(&self) -> bool {
        let state = self.read();
        !state.invalidated && state.expires_at > Utc::now()
    }

    /// Whether `other` is a handle to the same session.
    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read a typed attribute.
    pub fn attribute<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AuthError> {
        let state = self.read();
        self.ensure_live(&state)?;
        state
            .attributes
            .get(key)
            .map(|value| {
                T::deserialize(value).map_err(|e| {
                    AuthError::Session(format!("attribute '{key}' has an unexpected shape: {e}"))
                })
            })
            .transpose()
    }

    /// Store a typed attribute, replacing any previous value.
    pub fn set_attribute<T: Serialize>(&self, key: &str, value: &T) -> Result<(), AuthError> {
        let value = serde_json::to_value(value)
            .map_err(|e| AuthError::Session(format!("attribute '{key}' cannot be stored: {e}")))?;
        let mut state = self.write();
        self.ensure_live(&state)?;
        state.attributes.insert(key.to_string(), value);
        Ok(())
    }

    /// Remove an attribute, returning whether it was present.
    pub fn remove_attribute(&self, key: &str) -> bool {
        self.write().attributes.remove(key).is_some()
    }

    /// The token slot, if present.
    pub fn token_holder(&self) -> Result<Option<SecurityTokenHolder>, AuthError> {
        self.attribute(SECURITY_TOKEN_KEY)
    }

    /// Fill the token slot.
    pub fn set_token_holder(&self, holder: &SecurityTokenHolder) -> Result<(), AuthError> {
        self.set_attribute(SECURITY_TOKEN_KEY, holder)
    }

    /// A copy of this session under a fresh id, with the same attributes and
    /// expiry. This session is invalidated.
    pub fn rotate(&self) -> Result<Session, AuthError> {
        let rotated = {
            let state = self.read();
            self.ensure_live(&state)?;
            let rotated = Session::with_id(uuid::Uuid::new_v4().to_string(), state.expires_at);
            rotated.write().attributes = state.attributes.clone();
            rotated
        };
        self.invalidate();
        Ok(rotated)
    }

    /// Invalidate the session and drop its attributes.
    ///
    /// Returns `true` for the call that performed the invalidation and `false`
    /// when the session was already invalid.
    pub fn invalidate(&self) -> bool {
        let mut state = self.write();
        if state.invalidated {
            return false;
        }
        state.invalidated = true;
        state.attributes.clear();
        true
    }
}

/// Persistence for sessions.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Load a live session by id.
    async fn load_session(&self, id: &str) -> Result<Option<Session>, AuthError>;
    /// Persist a session.
    async fn save_session(&self, session: &Session) -> Result<(), AuthError>;
    /// Remove a session.
    async fn delete_session(&self, id: &str) -> Result<(), AuthError>;
}
