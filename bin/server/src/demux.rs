//! Per-request routing between the gRPC and HTTP stacks sharing a listener.
//!
//! The check is a coarse approximation of gRPC's own framing rules, made
//! for every request rather than once per connection.

use axum::BoxError;
use axum::body::Body;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::{Request, Response, Version, header};
use std::convert::Infallible;
use std::task::{Context, Poll};
use tower::{Service, ServiceExt};

/// Where a request should be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Grpc,
    Http,
}

/// Strategy deciding which stack serves a request.
pub trait RequestClassifier: Clone + Send + Sync + 'static {
    fn classify<B>(&self, request: &Request<B>) -> Protocol;
}

/// gRPC when the request is HTTP/2 **and** its content type mentions
/// `application/grpc`; HTTP otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcContentTypeClassifier;

impl RequestClassifier for GrpcContentTypeClassifier {
    fn classify<B>(&self, request: &Request<B>) -> Protocol {
        let grpc_content = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/grpc"));

        if request.version() == Version::HTTP_2 && grpc_content {
            Protocol::Grpc
        } else {
            Protocol::Http
        }
    }
}

/// Dispatches each request to `grpc` or `http` as the classifier decides.
#[derive(Debug, Clone)]
pub struct ProtocolDemux<C, G, H> {
    classifier: C,
    grpc: G,
    http: H,
}

impl<C, G, H> ProtocolDemux<C, G, H> {
    pub fn new(classifier: C, grpc: G, http: H) -> Self {
        Self {
            classifier,
            grpc,
            http,
        }
    }
}

impl<C, G, H, B, GB, HB> Service<Request<B>> for ProtocolDemux<C, G, H>
where
    C: RequestClassifier,
    G: Service<Request<B>, Response = Response<GB>, Error = Infallible> + Clone + Send + 'static,
    G::Future: Send + 'static,
    H: Service<Request<B>, Response = Response<HB>, Error = Infallible> + Clone + Send + 'static,
    H::Future: Send + 'static,
    B: Send + 'static,
    GB: http_body::Body<Data = Bytes> + Send + 'static,
    GB::Error: Into<BoxError>,
    HB: http_body::Body<Data = Bytes> + Send + 'static,
    HB::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness is awaited per request on the chosen stack.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        match self.classifier.classify(&request) {
            Protocol::Grpc => {
                let grpc = self.grpc.clone();
                Box::pin(async move {
                    let response = grpc.oneshot(request).await?;
                    Ok(response.map(Body::new))
                })
            }
            Protocol::Http => {
                let http = self.http.clone();
                Box::pin(async move {
                    let response = http.oneshot(request).await?;
                    Ok(response.map(Body::new))
                })
            }
        }
    }
}
