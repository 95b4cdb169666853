//! The HTTP router: diagnostics, the browser login flow and the REST gateway.

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{self, AppState};
use crate::gateway;

const LOGIN_PAGE: &str = r#"<html>
<body>
	<a href="/login">Log In</a>
</body>
</html>"#;

/// Builds the HTTP router.
///
/// With `auth_state` the login routes are mounted and `business` sits behind the
/// gateway's session bridge and authorization; without it `business` is
/// served as is.
pub fn router(
    openapi_spec_file: PathBuf,
    auth_state: Option<Arc<AppState>>,
    business: Router,
) -> Router {
    let diagnostics = Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/api/v1/openapi", get(openapi))
        .with_state(Arc::new(openapi_spec_file));

    let router = match auth_state {
        Some(state) => diagnostics
            .route("/login_page", get(login_page))
            .merge(auth::router(Arc::clone(&state)))
            .merge(gateway::router(state, business)),
        None => diagnostics.fallback_service(business),
    };

    router.layer(TraceLayer::new_for_http())
}

async fn healthcheck() -> StatusCode {
    StatusCode::OK
}

/// Diagnostic landing page linking to `/login`.
async fn login_page() -> Html<&'static str> {
    Html(LOGIN_PAGE)
}

async fn openapi(State(path): State<Arc<PathBuf>>) -> Response {
    match tokio::fs::read(path.as_path()).await {
        Ok(document) => {
            ([(header::CONTENT_TYPE, "application/json")], document).into_response()
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read OpenAPI document");
            StatusCode::FAILED_DEPENDENCY.into_response()
        }
    }
}
