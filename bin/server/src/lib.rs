//! waypoint admin server.
//!
//! Serves the admin API over gRPC and REST, optionally on a single TLS
//! listener, with OAuth2/OpenID Connect browser login in front of the REST
//! side and bearer token checks on every gRPC call.

pub mod auth;
pub mod config;
pub mod demux;
pub mod error;
pub mod gateway;
pub mod grpc;
pub mod server;
pub mod tls;
pub mod web;
