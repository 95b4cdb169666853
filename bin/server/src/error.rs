//! Domain error types for server startup and operation.
//!
//! Request-scoped failures never reach this type: the browser flow maps them
//! to HTTP responses (see [`crate::auth::AuthError`]) and the gRPC stack to
//! statuses. Everything here is fatal and ends the process.

use std::fmt;

/// Errors that abort the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Configuration could not be loaded or is inconsistent.
    Config { reason: String },
    /// The authentication context could not be built.
    AuthSetup { code: &'static str, reason: String },
    /// TLS certificate or key could not be loaded.
    Tls { reason: String },
    /// A listener could not be bound.
    Bind { address: String, reason: String },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { reason } => write!(f, "invalid configuration: {reason}"),
            Self::AuthSetup { code, reason } => {
                write!(f, "authentication setup failed [{code}]: {reason}")
            }
            Self::Tls { reason } => write!(f, "TLS setup failed: {reason}"),
            Self::Bind { address, reason } => {
                write!(f, "failed to listen on '{address}': {reason}")
            }
        }
    }
}

impl std::error::Error for ServerError {}
