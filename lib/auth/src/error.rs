//! Error types for the auth crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `SetupError`: Fatal failures while building the authentication context
//! - `SecretError`: Secret provider lookups
//! - `CookieError`: Session cookie encoding and decoding
//! - `ProviderError`: Calls to the identity provider
//! - `AuthenticationError`: Per-request credential failures

use std::fmt;
use tonic::Status;

/// Errors that abort server startup.
///
/// Each variant carries a stable error code so operators can grep logs for
/// the failure class regardless of the underlying cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupError {
    /// A required secret could not be read.
    ConfigFileRead { secret: String },
    /// Any other failure while assembling the authentication context.
    AuthContextSetup { reason: String },
}

impl SetupError {
    pub const CONFIG_FILE_READ_CODE: &'static str = "CONFIG_OPTION_FILE_READ_FAILED";
    pub const AUTH_CONTEXT_SETUP_CODE: &'static str = "AUTH_CONTEXT_SETUP_FAILED";

    pub(crate) fn setup(reason: impl Into<String>) -> Self {
        Self::AuthContextSetup {
            reason: reason.into(),
        }
    }

    /// Returns the stable error code for this failure class.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigFileRead { .. } => Self::CONFIG_FILE_READ_CODE,
            Self::AuthContextSetup { .. } => Self::AUTH_CONTEXT_SETUP_CODE,
        }
    }
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigFileRead { secret } => {
                write!(f, "[{}] could not read secret '{secret}'", self.code())
            }
            Self::AuthContextSetup { reason } => {
                write!(f, "[{}] {reason}", self.code())
            }
        }
    }
}

impl std::error::Error for SetupError {}

/// Errors from secret lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    /// No secret is stored under the name.
    NotFound { name: String },
    /// The secret exists but could not be read.
    Unreadable { name: String, reason: String },
}

impl fmt::Display for SecretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { name } => write!(f, "secret '{name}' not found"),
            Self::Unreadable { name, reason } => {
                write!(f, "secret '{name}' could not be read: {reason}")
            }
        }
    }
}

impl std::error::Error for SecretError {}

/// Errors from encoding or decoding session cookies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieError {
    /// A hash or block key is not usable.
    InvalidKey { reason: String },
    /// The value could not be serialized or encrypted.
    Encode { reason: String },
    /// The cookie does not have the expected layout.
    Malformed { reason: String },
    /// The HMAC does not match; the cookie was tampered with or signed by other keys.
    SignatureMismatch,
    /// The cookie timestamp is outside the accepted signing window.
    Expired,
    /// The payload could not be decrypted.
    Decryption,
}

impl fmt::Display for CookieError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey { reason } => write!(f, "invalid cookie key: {reason}"),
            Self::Encode { reason } => write!(f, "failed to encode cookie: {reason}"),
            Self::Malformed { reason } => write!(f, "malformed cookie: {reason}"),
            Self::SignatureMismatch => write!(f, "cookie signature mismatch"),
            Self::Expired => write!(f, "cookie signing window has expired"),
            Self::Decryption => write!(f, "cookie could not be decrypted"),
        }
    }
}

impl std::error::Error for CookieError {}

/// Errors from calls to the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider did not answer within the connection timeout.
    Timeout,
    /// The provider could not be reached.
    Unavailable { reason: String },
    /// The provider answered with an error (bad code, revoked refresh token, ...).
    Rejected { reason: String },
    /// Local configuration prevents the call (missing endpoint, bad URL).
    Configuration { reason: String },
}

impl ProviderError {
    /// Returns true when the failure is the provider being unreachable rather
    /// than the provider refusing the request.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable { .. })
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "identity provider timed out"),
            Self::Unavailable { reason } => {
                write!(f, "identity provider unavailable: {reason}")
            }
            Self::Rejected { reason } => write!(f, "identity provider rejected request: {reason}"),
            Self::Configuration { reason } => {
                write!(f, "identity provider configuration error: {reason}")
            }
        }
    }
}

impl std::error::Error for ProviderError {}

/// Errors from authenticating a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// No bearer credential was presented.
    MissingCredentials,
    /// The credential is present but not a well-formed bearer token.
    MalformedCredentials,
    /// Token validation failed.
    InvalidToken { reason: String },
    /// Token has expired.
    TokenExpired,
    /// The identity provider could not be consulted.
    ProviderUnavailable { reason: String },
}

impl AuthenticationError {
    /// Maps the error to a gRPC status with a generic message.
    #[must_use]
    pub fn to_status(&self) -> Status {
        match self {
            Self::MissingCredentials => Status::unauthenticated("missing credentials"),
            Self::MalformedCredentials
            | Self::InvalidToken { .. }
            | Self::TokenExpired => Status::unauthenticated("invalid credentials"),
            Self::ProviderUnavailable { .. } => {
                Status::unavailable("identity provider unavailable")
            }
        }
    }
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCredentials => write!(f, "no bearer credentials presented"),
            Self::MalformedCredentials => write!(f, "authorization value is not a bearer token"),
            Self::InvalidToken { reason } => write!(f, "invalid token: {reason}"),
            Self::TokenExpired => write!(f, "token has expired"),
            Self::ProviderUnavailable { reason } => {
                write!(f, "identity provider unavailable: {reason}")
            }
        }
    }
}

impl std::error::Error for AuthenticationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_error_codes() {
        let err = SetupError::ConfigFileRead {
            secret: "cookie_hash_key".to_string(),
        };
        assert_eq!(err.code(), "CONFIG_OPTION_FILE_READ_FAILED");
        assert!(err.to_string().contains("cookie_hash_key"));

        let err = SetupError::setup("bad issuer");
        assert_eq!(err.code(), "AUTH_CONTEXT_SETUP_FAILED");
        assert!(err.to_string().contains("bad issuer"));
    }

    #[test]
    fn authentication_errors_map_to_generic_statuses() {
        let status = AuthenticationError::InvalidToken {
            reason: "kid k9 not in key set".to_string(),
        }
        .to_status();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
        assert!(!status.message().contains("k9"));

        let status = AuthenticationError::ProviderUnavailable {
            reason: "connect refused".to_string(),
        }
        .to_status();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }

    #[test]
    fn provider_error_unavailability() {
        assert!(ProviderError::Timeout.is_unavailable());
        assert!(
            !ProviderError::Rejected {
                reason: "invalid_grant".to_string()
            }
            .is_unavailable()
        );
    }
}
