//! REST side of the gateway.
//!
//! Browser requests carry their credentials in the session cookie. Before
//! anything else runs, the cookie's access token is copied into the
//! `x-session-authorization` header, so every handler behind the gateway
//! (the auth service routes here and the business router) authenticates
//! through the same interceptor as gRPC callers. Requests for the business
//! router are refused unless the interceptor accepts them.

use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;
use tonic::{Code, Status};
use tower::Layer;
use waypoint_auth::service::{
    OAuth2MetadataRequest, PublicClientAuthConfigRequest, UserInfoRequest,
};
use waypoint_auth::{
    AuthDecision, AuthService, Authorizer, OAUTH2_METADATA_PATH, OIDC_METADATA_PATH,
    SESSION_AUTHORIZATION_HEADER, SESSION_COOKIE, SessionCookie, USER_INFO_METHOD,
};

use crate::auth::AppState;

/// REST path of `AuthService/FlyteClient`.
pub const FLYTE_CLIENT_PATH: &str = "/config/v1/flyte_client";

/// REST path of `AuthService/UserInfo`.
pub const USER_INFO_PATH: &str = "/me";

/// Builds the gateway: auth service routes, then `business` for everything
/// else, all behind the session bridge.
pub fn router(state: Arc<AppState>, business: Router) -> Router {
    let business =
        axum::middleware::from_fn_with_state(Arc::clone(&state), business_authorization)
            .layer(business);

    Router::new()
        .route(OAUTH2_METADATA_PATH, get(oauth2_metadata))
        .route(OIDC_METADATA_PATH, get(oidc_metadata))
        .route(FLYTE_CLIENT_PATH, get(flyte_client))
        .route(USER_INFO_PATH, get(user_info))
        .with_state(Arc::clone(&state))
        .fallback_service(business)
        .layer(axum::middleware::from_fn_with_state(
            state,
            session_authorization,
        ))
}

/// Copies the session cookie's access token into `x-session-authorization`.
///
/// A caller-supplied `x-session-authorization` is always dropped; an
/// explicit `authorization` header wins over the cookie.
pub async fn session_authorization(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    request.headers_mut().remove(SESSION_AUTHORIZATION_HEADER);

    if !request.headers().contains_key(header::AUTHORIZATION) {
        if let Some(cookie) = jar.get(SESSION_COOKIE) {
            match state
                .auth
                .cookie_manager()
                .decode::<SessionCookie>(SESSION_COOKIE, cookie.value())
            {
                Ok(session) => {
                    match HeaderValue::from_str(&format!("Bearer {}", session.access_token())) {
                        Ok(value) => {
                            request
                                .headers_mut()
                                .insert(SESSION_AUTHORIZATION_HEADER, value);
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "access token is not a header value");
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "ignoring unreadable session cookie");
                }
            }
        }
    }

    next.run(request).await
}

/// Admits a request to the business router only if the interceptor accepts
/// its credentials; the resolved identity travels in the request extensions.
pub async fn business_authorization(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let decision = state.auth.interceptor().authorize(&path, request.headers()).await;

    match decision {
        Ok(AuthDecision::Anonymous) => {}
        Ok(AuthDecision::Authenticated(identity)) => {
            request.extensions_mut().insert(identity);
        }
        Err(e) => {
            tracing::info!(path = %path, error = %e, "rejected REST request");
            return status_response(&e.current_context().to_status());
        }
    }

    next.run(request).await
}

async fn oauth2_metadata(State(state): State<Arc<AppState>>) -> Response {
    match state
        .auth
        .auth_service()
        .o_auth2_metadata(tonic::Request::new(OAuth2MetadataRequest {}))
        .await
    {
        Ok(response) => Json(response.into_inner()).into_response(),
        Err(status) => status_response(&status),
    }
}

/// The identity provider publishes the discovery document; browsers are sent there.
async fn oidc_metadata(State(state): State<Arc<AppState>>) -> Redirect {
    Redirect::to(
        state
            .auth
            .identity_provider()
            .endpoints()
            .discovery_url
            .as_str(),
    )
}

async fn flyte_client(State(state): State<Arc<AppState>>) -> Response {
    match state
        .auth
        .auth_service()
        .flyte_client(tonic::Request::new(PublicClientAuthConfigRequest {}))
        .await
    {
        Ok(response) => Json(response.into_inner()).into_response(),
        Err(status) => status_response(&status),
    }
}

async fn user_info(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let service = state.auth.auth_service();

    let identity = match service.authorize(USER_INFO_METHOD, &headers).await {
        Ok(AuthDecision::Authenticated(identity)) => identity,
        Ok(AuthDecision::Anonymous) => {
            return status_response(&Status::unauthenticated("missing credentials"));
        }
        Err(e) => {
            tracing::info!(error = %e, "rejected user info request");
            return status_response(&e.current_context().to_status());
        }
    };

    let mut request = tonic::Request::new(UserInfoRequest {});
    request.extensions_mut().insert(identity);

    match service.user_info(request).await {
        Ok(response) => Json(response.into_inner()).into_response(),
        Err(status) => status_response(&status),
    }
}

/// Translates a gRPC status into the equivalent HTTP error response.
pub fn status_response(status: &Status) -> Response {
    let http_status = match status.code() {
        Code::Ok => StatusCode::OK,
        Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => {
            StatusCode::BAD_REQUEST
        }
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::Cancelled | Code::Unknown | Code::Internal | Code::DataLoss => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (
        http_status,
        Json(serde_json::json!({
            "code": status.code() as i32,
            "message": status.message(),
        })),
    )
        .into_response()
}
