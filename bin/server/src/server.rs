//! Listener setup and the connection accept loop.
//!
//! In secure mode one TLS listener carries both protocols and every request
//! is routed by [`ProtocolDemux`]. Otherwise gRPC and HTTP get a plaintext
//! listener each.

use axum::{BoxError, Router};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use rootcause::prelude::Report;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::{Layer, Service};
use tower_http::trace::TraceLayer;
use waypoint_auth::{AuthConfig, AuthPlugins, AuthenticationContext};

use crate::auth::AppState;
use crate::config::ServerConfig;
use crate::demux::{GrpcContentTypeClassifier, ProtocolDemux};
use crate::error::ServerError;
use crate::grpc::{GrpcService, GrpcServices};
use crate::tls::load_tls_config;
use crate::web;

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The listeners a configuration asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listeners {
    /// One TLS listener shared by gRPC and HTTP.
    Tls { address: String },
    /// Separate plaintext listeners.
    Plaintext {
        grpc_address: String,
        http_address: String,
    },
}

impl Listeners {
    pub fn from_config(config: &ServerConfig) -> Self {
        if config.security.secure {
            Self::Tls {
                address: config.http_address.clone(),
            }
        } else {
            Self::Plaintext {
                grpc_address: config.grpc_address.clone(),
                http_address: config.http_address.clone(),
            }
        }
    }
}

/// Builds every component from `config` and serves until interrupted.
pub async fn run(config: ServerConfig) -> Result<(), Report<ServerError>> {
    let context = match config.enabled_auth() {
        Some(auth) => Some(Arc::new(build_auth_context(&config, auth).await?)),
        None => {
            tracing::warn!("authentication is disabled");
            None
        }
    };

    let grpc = GrpcServices::new(context.as_deref()).into_service();
    let app_state = context.map(|context| Arc::new(AppState::new(context, config.security.secure)));
    let http = web::router(config.openapi_spec_file.clone(), app_state, Router::new());

    serve(&config, grpc, http).await
}

/// Builds the authentication context, reading secrets from the configured source.
pub async fn build_auth_context(
    config: &ServerConfig,
    auth: &AuthConfig,
) -> Result<AuthenticationContext, Report<ServerError>> {
    let secrets = config.secrets.provider();

    let context = AuthenticationContext::new(secrets.as_ref(), auth.clone(), AuthPlugins::default())
        .await
        .map_err(|e| {
            let setup = e.current_context();
            ServerError::AuthSetup {
                code: setup.code(),
                reason: setup.to_string(),
            }
        })?;

    tracing::info!(
        redirect_url = %context.oauth2_client(None).redirect_url(),
        "authentication context ready"
    );
    Ok(context)
}

/// Binds the configured listeners and serves `grpc` and `http` until a
/// shutdown signal arrives.
pub async fn serve(
    config: &ServerConfig,
    grpc: GrpcService,
    http: Router,
) -> Result<(), Report<ServerError>> {
    let grpc = TraceLayer::new_for_grpc().layer(grpc);

    match Listeners::from_config(config) {
        Listeners::Tls { address } => {
            let acceptor = TlsAcceptor::from(load_tls_config(&config.security.ssl)?);
            let listener = bind(&address).await?;
            tracing::info!(address = %address, "serving gRPC and HTTP over TLS");

            let service = ProtocolDemux::new(GrpcContentTypeClassifier, grpc, http);
            tokio::select! {
                () = accept_loop(listener, Some(acceptor), service) => {}
                () = shutdown_signal() => {}
            }
        }
        Listeners::Plaintext {
            grpc_address,
            http_address,
        } => {
            let grpc_listener = bind(&grpc_address).await?;
            let http_listener = bind(&http_address).await?;
            tracing::info!(
                grpc_address = %grpc_address,
                http_address = %http_address,
                "serving gRPC and HTTP without TLS"
            );

            tokio::select! {
                _ = futures::future::join(
                    accept_loop(grpc_listener, None, grpc),
                    accept_loop(http_listener, None, http),
                ) => {}
                () = shutdown_signal() => {}
            }
        }
    }

    tracing::info!("server stopped");
    Ok(())
}

async fn bind(address: &str) -> Result<TcpListener, Report<ServerError>> {
    let listener = TcpListener::bind(address)
        .await
        .map_err(|e| ServerError::Bind {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
    Ok(listener)
}

/// Accepts connections forever, serving each on its own task.
///
/// Connections speak HTTP/1.1 or HTTP/2 as the client chooses; with an
/// acceptor they are TLS-wrapped first.
pub(crate) async fn accept_loop<S, B>(listener: TcpListener, tls: Option<TlsAcceptor>, service: S)
where
    S: Service<axum::http::Request<Incoming>, Response = axum::http::Response<B>, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    B: http_body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let tls = tls.clone();
        let service = service.clone();
        tokio::spawn(async move {
            match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => serve_connection(stream, peer, service).await,
                    Err(e) => tracing::debug!(peer = %peer, error = %e, "TLS handshake failed"),
                },
                None => serve_connection(stream, peer, service).await,
            }
        });
    }
}

async fn serve_connection<IO, S, B>(stream: IO, peer: SocketAddr, service: S)
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: Service<axum::http::Request<Incoming>, Response = axum::http::Response<B>, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    B: http_body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let result = auto::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(stream), TowerToHyperService::new(service))
        .await;

    if let Err(e) = result {
        tracing::debug!(peer = %peer, error = %e, "connection ended with error");
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "unable to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
