//! Per-call authentication policy.
//!
//! Every gRPC call, and every REST call the gateway translates into an auth
//! service call, is evaluated fresh: methods in the anonymous set pass with
//! no credentials; everything else needs a bearer token the
//! [`ResourceServer`] accepts.

use crate::error::AuthenticationError;
use crate::resource_server::ResourceServer;
use async_trait::async_trait;
use http::HeaderMap;
use rootcause::prelude::Report;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use waypoint_core::IdentityContext;

/// Full method name of the OAuth2 metadata discovery RPC.
pub const OAUTH2_METADATA_METHOD: &str = "/flyteidl.service.AuthService/OAuth2Metadata";

/// Full method name of the public client configuration RPC.
pub const FLYTE_CLIENT_METHOD: &str = "/flyteidl.service.AuthService/FlyteClient";

/// Full method name of the user info RPC.
pub const USER_INFO_METHOD: &str = "/flyteidl.service.AuthService/UserInfo";

/// Methods callable without credentials.
pub const ANONYMOUS_METHOD_NAMES: &[&str] = &[OAUTH2_METADATA_METHOD, FLYTE_CLIENT_METHOD];

/// Header carrying machine-client credentials.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Header the REST gateway fills from the browser session cookie.
pub const SESSION_AUTHORIZATION_HEADER: &str = "x-session-authorization";

const BEARER_PREFIX: &str = "bearer ";

/// Exact-match set of full gRPC method names exempt from authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonymousMethods {
    methods: HashSet<String>,
}

impl AnonymousMethods {
    /// Creates a set from full method names (`/package.Service/Method`).
    pub fn new<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            methods: methods.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if `method` is exempt. Matching is exact, never by prefix.
    #[must_use]
    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains(method)
    }
}

impl Default for AnonymousMethods {
    fn default() -> Self {
        Self::new(ANONYMOUS_METHOD_NAMES.iter().copied())
    }
}

/// Outcome of an authorization decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// The method is anonymous; no identity was resolved.
    Anonymous,
    /// The caller presented a valid token.
    Authenticated(IdentityContext),
}

impl AuthDecision {
    /// Returns the resolved identity, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&IdentityContext> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated(identity) => Some(identity),
        }
    }
}

/// Decides whether a call to `method` with the given headers may proceed.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        method: &str,
        headers: &HeaderMap,
    ) -> Result<AuthDecision, Report<AuthenticationError>>;
}

/// The default authentication policy: anonymous set first, then bearer
/// token validation.
#[derive(Clone)]
pub struct AuthInterceptor {
    anonymous: AnonymousMethods,
    resource_server: Arc<dyn ResourceServer>,
    timeout: Duration,
}

impl std::fmt::Debug for AuthInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthInterceptor")
            .field("anonymous", &self.anonymous)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AuthInterceptor {
    /// Creates an interceptor.
    ///
    /// `timeout` bounds each token validation; a validator that needs the
    /// identity provider must not hold a call open longer than that.
    #[must_use]
    pub fn new(
        resource_server: Arc<dyn ResourceServer>,
        anonymous: AnonymousMethods,
        timeout: Duration,
    ) -> Self {
        Self {
            anonymous,
            resource_server,
            timeout,
        }
    }

    #[must_use]
    pub fn anonymous_methods(&self) -> &AnonymousMethods {
        &self.anonymous
    }

    /// Validates the bearer credential in `headers` regardless of method.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
    ) -> Result<IdentityContext, Report<AuthenticationError>> {
        let token = bearer_token(headers)?;

        tokio::time::timeout(self.timeout, self.resource_server.validate_access_token(token))
            .await
            .map_err(|_| AuthenticationError::ProviderUnavailable {
                reason: "token validation timed out".to_string(),
            })?
    }
}

#[async_trait]
impl Authorizer for AuthInterceptor {
    async fn authorize(
        &self,
        method: &str,
        headers: &HeaderMap,
    ) -> Result<AuthDecision, Report<AuthenticationError>> {
        if self.anonymous.contains(method) {
            tracing::trace!(method, "anonymous method");
            return Ok(AuthDecision::Anonymous);
        }

        match self.authenticate(headers).await {
            Ok(identity) => {
                tracing::debug!(method, subject = identity.subject(), "authenticated call");
                Ok(AuthDecision::Authenticated(identity))
            }
            Err(e) => {
                tracing::debug!(method, error = %e, "rejected call");
                Err(e)
            }
        }
    }
}

/// Extracts the bearer token from `authorization`, falling back to the
/// gateway's session header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthenticationError> {
    let value = headers
        .get(AUTHORIZATION_HEADER)
        .or_else(|| headers.get(SESSION_AUTHORIZATION_HEADER))
        .ok_or(AuthenticationError::MissingCredentials)?;

    let value = value
        .to_str()
        .map_err(|_| AuthenticationError::MalformedCredentials)?;

    if value.len() < BEARER_PREFIX.len()
        || !value[..BEARER_PREFIX.len()].eq_ignore_ascii_case(BEARER_PREFIX)
    {
        return Err(AuthenticationError::MalformedCredentials);
    }

    let token = value[BEARER_PREFIX.len()..].trim();
    if token.is_empty() {
        return Err(AuthenticationError::MalformedCredentials);
    }

    Ok(token)
}
