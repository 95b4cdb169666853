//! Assembly of the gRPC service set.
//!
//! When authentication is enabled the auth service is registered first and
//! every service added afterwards is wrapped in the interceptor layer.

use axum::BoxError;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::convert::Infallible;
use std::task::{Context, Poll};
use tonic::Status;
use tonic::body::BoxBody;
use tonic::server::NamedService;
use tonic::service::{Routes, RoutesBuilder};
use tower::{Layer, Service};
use waypoint_auth::{AuthenticationContext, GrpcAuthLayer};

/// Builder for the gRPC [`Routes`].
pub struct GrpcServices {
    builder: RoutesBuilder,
    auth_layer: Option<GrpcAuthLayer>,
}

impl GrpcServices {
    pub fn new(auth: Option<&AuthenticationContext>) -> Self {
        let mut builder = RoutesBuilder::default();
        let auth_layer = auth.map(|context| {
            builder.add_service(context.auth_service_server());
            context.grpc_auth_layer()
        });

        Self {
            builder,
            auth_layer,
        }
    }

    /// Registers a business service, behind the auth layer when enabled.
    pub fn add_service<S>(&mut self, service: S) -> &mut Self
    where
        S: Service<http::Request<BoxBody>, Response = http::Response<BoxBody>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        match &self.auth_layer {
            Some(layer) => {
                self.builder.add_service(layer.layer(service));
            }
            None => {
                self.builder.add_service(service);
            }
        }
        tracing::debug!(service = S::NAME, "registered gRPC service");
        self
    }

    pub fn into_routes(self) -> Routes {
        self.builder.routes()
    }

    pub fn into_service(self) -> GrpcService {
        GrpcService::new(self.into_routes())
    }
}

/// [`Routes`] adapted to the connection layer.
///
/// Request bodies of any type are boxed into tonic's body, and routing
/// errors become gRPC status responses so the service never fails.
#[derive(Clone)]
pub struct GrpcService {
    routes: Routes,
}

impl GrpcService {
    pub fn new(routes: Routes) -> Self {
        Self { routes }
    }
}

impl<B> Service<http::Request<B>> for GrpcService
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Routes is always ready.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        let response = self.routes.call(request.map(tonic::body::boxed));
        Box::pin(async move {
            Ok(response.await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "gRPC routing failed");
                Status::from_error(e).into_http()
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::{ACCESS_TOKEN, StubProvider, context};
    use std::future::{Ready, ready};
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tower::ServiceExt;

    /// Stand-in for a business service; marks responses it produced.
    #[derive(Clone)]
    struct ProjectsService;

    impl NamedService for ProjectsService {
        const NAME: &'static str = "flyteidl.service.AdminService";
    }

    impl Service<http::Request<BoxBody>> for ProjectsService {
        type Response = http::Response<BoxBody>;
        type Error = Infallible;
        type Future = Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: http::Request<BoxBody>) -> Self::Future {
            let mut response = http::Response::new(tonic::body::empty_body());
            response
                .headers_mut()
                .insert("x-served-by", http::HeaderValue::from_static("projects"));
            ready(Ok(response))
        }
    }

    fn grpc_request(path: &str, token: Option<&str>) -> http::Request<BoxBody> {
        let mut builder = http::Request::builder()
            .method("POST")
            .uri(format!("http://localhost{path}"))
            .version(http::Version::HTTP_2)
            .header("content-type", "application/grpc");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(tonic::body::empty_body()).expect("request")
    }

    fn served_by(response: &http::Response<BoxBody>) -> Option<&str> {
        response
            .headers()
            .get("x-served-by")
            .and_then(|v| v.to_str().ok())
    }

    fn grpc_status(response: &http::Response<BoxBody>) -> Option<&str> {
        response
            .headers()
            .get("grpc-status")
            .and_then(|v| v.to_str().ok())
    }

    const LIST_PROJECTS: &str = "/flyteidl.service.AdminService/ListProjects";

    #[tokio::test]
    async fn services_are_open_without_auth() {
        let mut services = GrpcServices::new(None);
        services.add_service(ProjectsService);

        let response = services
            .into_service()
            .oneshot(grpc_request(LIST_PROJECTS, None))
            .await
            .expect("response");

        assert_eq!(served_by(&response), Some("projects"));
    }

    #[tokio::test]
    async fn services_reject_calls_without_token() {
        let context = context(Arc::new(StubProvider::new()));
        let mut services = GrpcServices::new(Some(context.as_ref()));
        services.add_service(ProjectsService);

        let response = services
            .into_service()
            .oneshot(grpc_request(LIST_PROJECTS, None))
            .await
            .expect("response");

        assert_eq!(served_by(&response), None);
        assert_eq!(grpc_status(&response), Some("16"));
    }

    #[tokio::test]
    async fn services_accept_valid_bearer_token() {
        let context = context(Arc::new(StubProvider::new()));
        let mut services = GrpcServices::new(Some(context.as_ref()));
        services.add_service(ProjectsService);

        let response = services
            .into_service()
            .oneshot(grpc_request(LIST_PROJECTS, Some(ACCESS_TOKEN)))
            .await
            .expect("response");

        assert_eq!(served_by(&response), Some("projects"));
    }

    #[tokio::test]
    async fn auth_service_is_registered_only_with_auth() {
        let path = "/flyteidl.service.AuthService/FlyteClient";

        let without = GrpcServices::new(None)
            .into_service()
            .oneshot(grpc_request(path, None))
            .await
            .expect("response");
        // Unknown services answer UNIMPLEMENTED.
        assert_eq!(grpc_status(&without), Some("12"));

        let context = context(Arc::new(StubProvider::new()));
        let with = GrpcServices::new(Some(context.as_ref()))
            .into_service()
            .oneshot(grpc_request(path, None))
            .await
            .expect("response");
        assert_ne!(grpc_status(&with), Some("12"));
        assert_ne!(grpc_status(&with), Some("16"));
    }
}
