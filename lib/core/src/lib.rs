//! Core types and utilities for the waypoint admin gateway.
//!
//! This crate provides the error handling foundation and the identity type
//! shared by the gRPC and HTTP protocol layers.

pub mod error;
pub mod identity;

pub use error::Result;
pub use identity::IdentityContext;
