//! The authentication layer placed in front of every gRPC service.

use crate::interceptor::{AuthDecision, Authorizer};
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::body::BoxBody;
use tonic::codegen::BoxFuture;
use tonic::server::NamedService;
use tower::{Layer, Service};

/// Tower layer that authorizes each gRPC call before it reaches the service.
#[derive(Clone)]
pub struct GrpcAuthLayer {
    authorizer: Arc<dyn Authorizer>,
}

impl GrpcAuthLayer {
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        Self { authorizer }
    }
}

impl<S> Layer<S> for GrpcAuthLayer {
    type Service = GrpcAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GrpcAuthService {
            inner,
            authorizer: Arc::clone(&self.authorizer),
        }
    }
}

/// Service produced by [`GrpcAuthLayer`].
///
/// On success the resolved [`IdentityContext`](waypoint_core::IdentityContext)
/// is inserted into the request extensions, where tonic handlers find it via
/// `Request::extensions`.
#[derive(Clone)]
pub struct GrpcAuthService<S> {
    inner: S,
    authorizer: Arc<dyn Authorizer>,
}

impl<S: NamedService> NamedService for GrpcAuthService<S> {
    const NAME: &'static str = S::NAME;
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for GrpcAuthService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<BoxBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        // The clone is ready only after poll_ready; call the readied one.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let authorizer = Arc::clone(&self.authorizer);

        Box::pin(async move {
            let method = req.uri().path().to_string();
            let (mut parts, body) = req.into_parts();

            match authorizer.authorize(&method, &parts.headers).await {
                Ok(AuthDecision::Anonymous) => {}
                Ok(AuthDecision::Authenticated(identity)) => {
                    parts.extensions.insert(identity);
                }
                Err(e) => {
                    tracing::info!(method = %method, error = %e, "rejected gRPC call");
                    return Ok(e.current_context().to_status().into_http());
                }
            }

            inner.call(http::Request::from_parts(parts, body)).await
        })
    }
}
