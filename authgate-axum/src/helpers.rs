use crate::AuthgateState;
use authgate_core::{AuthError, CallbackParams, SameSite};
use authgate_flow::{take_requested_url, BufferedResponse, HandlerResult, LogoutContext, Status};
use authgate_session::{Session, SessionConfig};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tower_cookies::{cookie, Cookie, Cookies};
use tracing::{debug, warn};

const MAX_FORM_BYTES: usize = 64 * 1024;

/// Errors surfaced by the authgate routes and extractors.
#[derive(Debug)]
pub enum AuthgateAxumError {
    /// The request is not authenticated.
    Unauthorized(String),
    /// The request cannot be served in its current state.
    BadRequest(String),
    /// Something failed on our side.
    Internal(String),
}

impl std::fmt::Display for AuthgateAxumError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthgateAxumError::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            AuthgateAxumError::BadRequest(msg) => write!(f, "Bad request: {msg}"),
            AuthgateAxumError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl IntoResponse for AuthgateAxumError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthgateAxumError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AuthgateAxumError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AuthgateAxumError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Turn what the handler wrote into an axum response. No status means `200`.
pub fn buffered_into_response(buffered: BufferedResponse) -> Response {
    let (status, headers) = buffered.into_parts();
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status.unwrap_or(StatusCode::OK);
    *response.headers_mut() = headers;
    response
}

/// The session cookie for `session`.
pub fn session_cookie(config: &SessionConfig, session: &Session) -> Cookie<'static> {
    let same_site = match config.same_site {
        SameSite::Lax => cookie::SameSite::Lax,
        SameSite::Strict => cookie::SameSite::Strict,
        SameSite::None => cookie::SameSite::None,
    };
    Cookie::build((config.cookie_name.clone(), session.id().to_string()))
        .path(config.path.clone())
        .secure(config.secure)
        .http_only(config.http_only)
        .same_site(same_site)
        .max_age(cookie::time::Duration::seconds(
            config.lifetime().num_seconds(),
        ))
        .build()
}

/// Issue the session cookie once the session is worth keeping: a redirect to
/// the provider or a completed login.
fn ensure_session_cookie(cookies: &Cookies, config: &SessionConfig, result: &HandlerResult) {
    if !matches!(result.status(), Status::Redirected | Status::Completed) {
        return;
    }
    let Some(session) = result.session() else {
        return;
    };
    let current = cookies
        .get(&config.cookie_name)
        .map(|c| c.value().to_string());
    if current.as_deref() != Some(session.id()) {
        debug!(session_id = session.id(), "issuing session cookie");
        cookies.add(session_cookie(config, session));
    }
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"))
}

/// Middleware putting the session named by the session cookie into the request
/// extensions.
pub async fn load_session(
    State(state): State<AuthgateState>,
    cookies: Cookies,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(cookie) = cookies.get(&state.session_config.cookie_name) {
        match state.session_store.load_session(cookie.value()).await {
            Ok(Some(session)) => {
                request.extensions_mut().insert(session);
            }
            Ok(None) => debug!("session cookie names no live session"),
            Err(e) => warn!(error = %e, "failed to load session"),
        }
    }
    next.run(request).await
}

/// Middleware for protected routes.
///
/// Authenticated requests continue with an
/// [`OidcAuthenticationToken`](authgate_flow::OidcAuthenticationToken) in their
/// extensions; anything else is answered with the provider redirect or `401`.
pub async fn require_oidc(
    State(state): State<AuthgateState>,
    cookies: Cookies,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let mut buffered = BufferedResponse::new();
    let result = state
        .handler
        .get_normalized_token(&parts, &mut buffered, true)
        .await;

    ensure_session_cookie(&cookies, &state.session_config, &result);
    if let Some(session) = result.session() {
        parts.extensions.insert(session.clone());
    }

    match result.status() {
        Status::Completed => {
            if let Some(token) = result.into_token() {
                parts.extensions.insert(token);
            }
            next.run(Request::from_parts(parts, body)).await
        }
        Status::Redirected => buffered_into_response(buffered),
        Status::NoAction if buffered.is_committed() => buffered_into_response(buffered),
        Status::NoAction => {
            AuthgateAxumError::Unauthorized("authentication required".to_string()).into_response()
        }
        Status::Error => {
            let message = result
                .error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "authentication failed".to_string());
            AuthgateAxumError::Unauthorized(message).into_response()
        }
    }
}

/// Handler for the login callback, accepting query and `form_post` responses.
///
/// A completed login redirects to the page requested before the provider
/// redirect, or to `/`.
pub async fn axum_callback_handler(
    State(state): State<AuthgateState>,
    cookies: Cookies,
    request: Request,
) -> Response {
    let (mut parts, body) = request.into_parts();
    if parts.method == Method::POST && is_form(&parts.headers) {
        match axum::body::to_bytes(body, MAX_FORM_BYTES).await {
            Ok(bytes) => {
                parts.extensions.insert(CallbackParams::from_form(&bytes));
            }
            Err(e) => {
                return AuthgateAxumError::BadRequest(format!("unreadable callback body: {e}"))
                    .into_response()
            }
        }
    }

    let mut buffered = BufferedResponse::new();
    let result = state
        .handler
        .get_normalized_token(&parts, &mut buffered, true)
        .await;
    ensure_session_cookie(&cookies, &state.session_config, &result);

    match result.status() {
        Status::Completed => {
            let target = result
                .session()
                .and_then(take_requested_url)
                .unwrap_or_else(|| "/".to_string());
            if let Some(session) = result.session() {
                if let Err(e) = state.session_store.save_session(session).await {
                    warn!(error = %e, "failed to save session after login");
                }
            }
            Redirect::to(&target).into_response()
        }
        Status::Redirected => buffered_into_response(buffered),
        Status::NoAction if buffered.is_committed() => buffered_into_response(buffered),
        Status::NoAction => {
            AuthgateAxumError::BadRequest("no session for callback".to_string()).into_response()
        }
        Status::Error => {
            let message = result
                .error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "login failed".to_string());
            AuthgateAxumError::Unauthorized(message).into_response()
        }
    }
}

/// Handler sending the user agent to the provider logout endpoint.
pub async fn axum_logout_handler(
    State(state): State<AuthgateState>,
    request: Request,
) -> Response {
    let (parts, _body) = request.into_parts();
    match state
        .logout
        .get_action(Some(&LogoutContext::new(&parts)))
        .await
    {
        Ok(Some(action)) => Redirect::to(action.url.as_str()).into_response(),
        Ok(None) => Redirect::to("/").into_response(),
        Err(AuthError::IllegalState(msg)) => AuthgateAxumError::BadRequest(msg).into_response(),
        Err(e) => AuthgateAxumError::Internal(e.to_string()).into_response(),
    }
}

/// Handler ending the local session once the provider redirected back.
pub async fn axum_logout_callback_handler(
    State(state): State<AuthgateState>,
    cookies: Cookies,
    request: Request,
) -> Response {
    let (parts, _body) = request.into_parts();
    let mut buffered = BufferedResponse::new();
    let status = state
        .callback
        .logout(Some(&parts), Some(&mut buffered))
        .await;

    if status != StatusCode::TEMPORARY_REDIRECT {
        return status.into_response();
    }
    cookies.remove(
        Cookie::build((state.session_config.cookie_name.clone(), ""))
            .path(state.session_config.path.clone())
            .build(),
    );
    buffered_into_response(buffered)
}
