//! Authentication routes for login, callback, and logout.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use std::sync::Arc;
use time::Duration as TimeDuration;
use waypoint_auth::{
    AUTH_STATE_COOKIE, AuthStateCookie, CookieManager, SESSION_COOKIE, SessionCookie,
};

use super::{AppState, local_redirect_target};

/// How long the browser has to complete a login at the identity provider.
const AUTH_STATE_MAX_AGE: TimeDuration = TimeDuration::minutes(10);

/// Query parameters accepted by `/login`.
#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    /// Local path to return to after logging in.
    pub redirect_url: Option<String>,
}

/// Query parameters for the OAuth2 callback.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Starts the authorization-code flow by redirecting to the identity provider.
pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
    Query(query): Query<LoginQuery>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AuthError> {
    let request_url = state.request_url(&headers, &uri);
    let secure = is_https(request_url.as_ref());
    let client = state.auth.oauth2_client(request_url.as_ref());
    let redirect_to = local_redirect_target(query.redirect_url.as_deref());

    let (auth_url, auth_state) = state
        .auth
        .identity_provider()
        .authorization_url(&client, redirect_to)
        .map_err(|e| AuthError::Provider(e.to_string()))?;

    let value = state
        .auth
        .cookie_manager()
        .encode(AUTH_STATE_COOKIE, &auth_state)
        .map_err(|e| AuthError::Cookie(e.to_string()))?;

    let cookie = CookieManager::build_cookie(AUTH_STATE_COOKIE, value, secure, AUTH_STATE_MAX_AGE);

    tracing::debug!(redirect_uri = %client.redirect_url(), "redirecting to identity provider");
    Ok((jar.add(cookie), Redirect::to(auth_url.as_str())))
}

/// Completes the flow: verifies the anti-forgery state, exchanges the code
/// and stores the resulting tokens in the session cookie.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AuthError> {
    if let Some(error) = query.error {
        return Err(AuthError::ProviderDenied {
            error,
            description: query.error_description.unwrap_or_default(),
        });
    }

    let cookies = state.auth.cookie_manager();

    let auth_state_cookie = jar
        .get(AUTH_STATE_COOKIE)
        .ok_or(AuthError::MissingAuthState)?;
    let auth_state: AuthStateCookie = cookies
        .decode(AUTH_STATE_COOKIE, auth_state_cookie.value())
        .map_err(|e| {
            tracing::debug!(error = %e, "rejected auth state cookie");
            AuthError::InvalidAuthState
        })?;

    // Checked before the code is ever sent to the provider.
    if query.state.as_deref() != Some(auth_state.csrf_token.as_str()) {
        return Err(AuthError::CsrfMismatch);
    }

    let code = query.code.ok_or(AuthError::MissingCode)?;

    let request_url = state.request_url(&headers, &uri);
    let secure = is_https(request_url.as_ref());
    let client = state.auth.oauth2_client(request_url.as_ref());

    let tokens = state
        .auth
        .identity_provider()
        .exchange_code(&client, &code, &auth_state)
        .await
        .map_err(|e| {
            if e.current_context().is_unavailable() {
                AuthError::ProviderUnavailable(e.to_string())
            } else {
                AuthError::TokenExchange(e.to_string())
            }
        })?;

    let session = SessionCookie::from_tokens(tokens, None);
    let value = cookies
        .encode(SESSION_COOKIE, &session)
        .map_err(|e| AuthError::Cookie(e.to_string()))?;

    let session_cookie =
        CookieManager::build_cookie(SESSION_COOKIE, value, secure, session_max_age(cookies));

    let jar = jar
        .add(session_cookie)
        .add(CookieManager::removal_cookie(AUTH_STATE_COOKIE));

    tracing::info!(redirect_to = %auth_state.redirect_to, "login completed");
    Ok((jar, Redirect::to(&auth_state.redirect_to)))
}

/// Ends the browser session.
pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    (
        jar.add(CookieManager::removal_cookie(SESSION_COOKIE)),
        Redirect::to("/"),
    )
}

/// The session cookie lives as long as the cookie manager accepts it.
pub(crate) fn session_max_age(cookies: &CookieManager) -> TimeDuration {
    TimeDuration::seconds(cookies.max_age().num_seconds())
}

pub(crate) fn is_https(request_url: Option<&url::Url>) -> bool {
    request_url.is_some_and(|url| url.scheme() == "https")
}

/// Authentication errors.
#[derive(Debug)]
pub enum AuthError {
    MissingAuthState,
    InvalidAuthState,
    CsrfMismatch,
    MissingCode,
    ProviderDenied { error: String, description: String },
    TokenExchange(String),
    ProviderUnavailable(String),
    Provider(String),
    Cookie(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::MissingAuthState => (StatusCode::BAD_REQUEST, "Missing auth state"),
            Self::InvalidAuthState => (StatusCode::BAD_REQUEST, "Invalid auth state"),
            Self::CsrfMismatch => (StatusCode::BAD_REQUEST, "CSRF token mismatch"),
            Self::MissingCode => (StatusCode::BAD_REQUEST, "Missing authorization code"),
            Self::ProviderDenied { error, description } => {
                tracing::warn!(
                    error = %error,
                    description = %description,
                    "identity provider returned an error"
                );
                (StatusCode::UNAUTHORIZED, "Login failed")
            }
            Self::TokenExchange(msg) => {
                tracing::warn!("Token exchange failed: {}", msg);
                (StatusCode::UNAUTHORIZED, "Login failed")
            }
            Self::ProviderUnavailable(msg) => {
                tracing::error!("Identity provider unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Identity provider unavailable",
                )
            }
            Self::Provider(msg) => {
                tracing::error!("Identity provider error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Authentication failed")
            }
            Self::Cookie(msg) => {
                tracing::error!("Cookie error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        (status, message).into_response()
    }
}
