//! The identity of an authenticated caller.
//!
//! An `IdentityContext` is produced when a bearer token is validated and is
//! attached to the request so downstream handlers (gRPC services, REST
//! gateway handlers) can see who is calling without re-validating.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity resolved from a validated access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityContext {
    /// The token subject (user or application identifier at the issuer).
    subject: String,
    /// The issuer that minted the token.
    issuer: String,
    /// Audiences the token was minted for.
    #[serde(default)]
    audience: Vec<String>,
    /// Scopes granted to the token.
    #[serde(default)]
    scopes: Vec<String>,
    /// OAuth2 client the token was issued to, if the issuer reports it.
    #[serde(default)]
    client_id: Option<String>,
    /// Email claim, when present.
    #[serde(default)]
    email: Option<String>,
    /// Display name (`name` or `preferred_username`), when present.
    #[serde(default)]
    name: Option<String>,
    /// Token expiry.
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl IdentityContext {
    /// Creates an identity with only subject and issuer set.
    #[must_use]
    pub fn new(subject: String, issuer: String) -> Self {
        Self {
            subject,
            issuer,
            audience: Vec::new(),
            scopes: Vec::new(),
            client_id: None,
            email: None,
            name: None,
            expires_at: None,
        }
    }

    /// Sets the audiences.
    #[must_use]
    pub fn with_audience(mut self, audience: Vec<String>) -> Self {
        self.audience = audience;
        self
    }

    /// Sets the granted scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Sets the client ID.
    #[must_use]
    pub fn with_client_id(mut self, client_id: Option<String>) -> Self {
        self.client_id = client_id;
        self
    }

    /// Sets the email claim.
    #[must_use]
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    /// Sets the token expiry.
    #[must_use]
    pub fn with_expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &[String] {
        &self.audience
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Returns true if the identity carries the given scope.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}
