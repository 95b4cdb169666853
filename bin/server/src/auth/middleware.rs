//! Silent session refresh in front of the login handler.

use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;
use waypoint_auth::{CookieManager, SESSION_COOKIE, SessionCookie};

use super::routes::{LoginQuery, is_https, session_max_age};
use super::{AppState, local_redirect_target};

/// A session closer than this to expiry is refreshed rather than reused.
const REFRESH_WINDOW_SECONDS: i64 = 60;

/// Skips the login round-trip when the browser already holds a usable session.
///
/// - A session not expiring within a minute redirects straight to the target.
/// - An expiring session with a refresh token is refreshed silently; the
///   cookie is rewritten and the browser redirected to the target.
/// - Anything else (no cookie, unreadable cookie, no refresh token, refresh
///   rejected) falls through to the wrapped handler unchanged.
pub async fn refresh_tokens_if_exists(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        return next.run(request).await;
    };

    let cookies = state.auth.cookie_manager();
    let session: SessionCookie = match cookies.decode(SESSION_COOKIE, cookie.value()) {
        Ok(session) => session,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unreadable session cookie");
            return next.run(request).await;
        }
    };

    let target = Query::<LoginQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(query)| query.redirect_url);
    let target = local_redirect_target(target.as_deref());

    if !session.expires_within(chrono::Duration::seconds(REFRESH_WINDOW_SECONDS)) {
        tracing::debug!(redirect_to = %target, "existing session still valid");
        return Redirect::to(&target).into_response();
    }

    let Some(refresh_token) = session.refresh_token() else {
        return next.run(request).await;
    };

    let request_url = state.request_url(request.headers(), request.uri());
    let client = state.auth.oauth2_client(request_url.as_ref());

    let tokens = match state
        .auth
        .identity_provider()
        .refresh_token(&client, refresh_token)
        .await
    {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::debug!(error = %e, "silent refresh failed, continuing to login");
            return next.run(request).await;
        }
    };

    let refreshed = SessionCookie::from_tokens(tokens, Some(refresh_token.to_string()));
    match cookies.encode(SESSION_COOKIE, &refreshed) {
        Ok(value) => {
            let cookie = CookieManager::build_cookie(
                SESSION_COOKIE,
                value,
                is_https(request_url.as_ref()),
                session_max_age(cookies),
            );
            tracing::debug!(redirect_to = %target, "session refreshed");
            (jar.add(cookie), Redirect::to(&target)).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode refreshed session");
            next.run(request).await
        }
    }
}
