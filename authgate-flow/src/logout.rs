use authgate_core::AuthError;
use authgate_oidc::SharedConfiguration;
use authgate_session::Session;
use http::request::Parts;
use tracing::debug;

/// Identifier of the action produced by [`OidcLogoutActionProvider`].
pub const LOGOUT_ACTION_ID: &str = "oidc-logout";

/// What a logout action is built from.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogoutContext<'a> {
    /// The request of the user logging out. Its extensions carry the session.
    pub request: Option<&'a Parts>,
}

impl<'a> LogoutContext<'a> {
    /// A context for `request`.
    pub fn new(request: &'a Parts) -> Self {
        Self {
            request: Some(request),
        }
    }

    /// Whether there is no request.
    pub fn is_empty(&self) -> bool {
        self.request.is_none()
    }
}

/// A user-facing action: here, the redirect ending the provider session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Stable identifier.
    pub id: String,
    /// Short label.
    pub title: String,
    /// One-line explanation.
    pub description: String,
    /// Where the user agent is sent.
    pub url: url::Url,
}

/// Builds the provider logout action for an authenticated session.
#[derive(Clone, Default)]
pub struct OidcLogoutActionProvider {
    configuration: Option<SharedConfiguration>,
}

impl OidcLogoutActionProvider {
    /// A provider reading the logout builder from `configuration`.
    pub fn new(configuration: SharedConfiguration) -> Self {
        Self {
            configuration: Some(configuration),
        }
    }

    /// The logout action for the session in `context`.
    ///
    /// No context, or one without a request, yields `Ok(None)`. Everything else
    /// that prevents building the action is an [`AuthError::IllegalState`]:
    /// logout is only meaningful inside an authenticated session.
    pub async fn get_action(
        &self,
        context: Option<&LogoutContext<'_>>,
    ) -> Result<Option<Action>, AuthError> {
        let Some(request) = context.and_then(|c| c.request) else {
            return Ok(None);
        };

        let configuration = self
            .configuration
            .as_ref()
            .ok_or_else(|| AuthError::IllegalState("no OIDC configuration".into()))?
            .read()
            .await;
        let builder = configuration.logout_action_builder().ok_or_else(|| {
            AuthError::IllegalState("OIDC configuration has not been generated".into())
        })?;

        let session = request
            .extensions
            .get::<Session>()
            .filter(|s| !s.is_invalidated())
            .ok_or_else(|| AuthError::IllegalState("logout without a session".into()))?;
        let holder = session.token_holder()?.ok_or_else(|| {
            AuthError::IllegalState(format!("session {} holds no token", session.id()))
        })?;
        let credentials = holder.security_token().ok_or_else(|| {
            AuthError::IllegalState(format!("session {} token was cleared", session.id()))
        })?;

        let redirect = builder.logout_action(request, credentials)?;
        let url = url::Url::parse(redirect.location()).map_err(|e| {
            AuthError::Configuration(format!(
                "invalid logout location '{}': {e}",
                redirect.location()
            ))
        })?;
        debug!(session_id = session.id(), %url, "built logout action");

        Ok(Some(Action {
            id: LOGOUT_ACTION_ID.to_string(),
            title: "Log out".to_string(),
            description: "End the session at the identity provider".to_string(),
            url,
        }))
    }
}
