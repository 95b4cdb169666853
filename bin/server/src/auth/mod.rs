//! Browser authentication for the HTTP side of the gateway.
//!
//! This module provides:
//! - The OAuth2 authorization-code flow (`/login`, `/callback`, `/logout`)
//! - Silent token refresh in front of `/login`
//!
//! All state lives in signed, encrypted cookies produced by the
//! [`CookieManager`](waypoint_auth::CookieManager); the server keeps
//! nothing between requests.

pub mod middleware;
pub mod routes;

use axum::Router;
use axum::http::{HeaderMap, Uri, header};
use axum::routing::get;
use std::sync::Arc;
use url::Url;
use waypoint_auth::AuthenticationContext;

pub use middleware::refresh_tokens_if_exists;
pub use routes::{AuthError, callback, login, logout};

/// Shared state of the authentication routes.
pub struct AppState {
    /// The process-wide authentication context.
    pub auth: Arc<AuthenticationContext>,
    /// Whether this server terminates TLS itself.
    pub tls: bool,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(auth: Arc<AuthenticationContext>, tls: bool) -> Self {
        Self { auth, tls }
    }

    /// Reconstructs the URL the browser used for this request.
    ///
    /// When this server terminates TLS the scheme is always `https`.
    /// Otherwise it comes from `X-Forwarded-Proto` when a proxy set it.
    pub fn request_url(&self, headers: &HeaderMap, uri: &Uri) -> Option<Url> {
        let scheme = if self.tls {
            "https"
        } else {
            headers
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or("http")
        };

        let host = uri
            .authority()
            .map(|a| a.as_str())
            .or_else(|| headers.get(header::HOST).and_then(|v| v.to_str().ok()))?;

        let path = uri.path_and_query().map_or("/", |p| p.as_str());

        Url::parse(&format!("{scheme}://{host}{path}")).ok()
    }
}

/// Routes of the browser flow. `/login` is wrapped by the refresh middleware.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/login",
            get(login).layer(axum::middleware::from_fn_with_state(
                Arc::clone(&state),
                refresh_tokens_if_exists,
            )),
        )
        .route("/callback", get(callback))
        .route("/logout", get(logout))
        .with_state(state)
}

/// Returns `target` if it is a local path, `/` otherwise.
pub(crate) fn local_redirect_target(target: Option<&str>) -> String {
    match target {
        Some(t) if t.starts_with('/') && !t.starts_with("//") && !t.contains('\\') => {
            t.to_string()
        }
        _ => "/".to_string(),
    }
}
