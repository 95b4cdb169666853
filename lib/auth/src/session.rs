//! Cookie-carried browser session state.
//!
//! Nothing here is persisted server-side: the session lives entirely in an
//! encrypted cookie produced by the [`CookieManager`](crate::CookieManager),
//! and a session ends when the cookie is overwritten with an expired one.

use crate::oidc::TokenSet;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Name of the cookie holding the encoded [`SessionCookie`].
pub const SESSION_COOKIE: &str = "session";

/// Name of the cookie holding the encoded [`AuthStateCookie`] during login.
pub const AUTH_STATE_COOKIE: &str = "auth_state";

/// Tokens obtained from the identity provider for a browser user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    /// Access token presented to the gRPC API as a bearer token.
    access_token: String,
    /// Refresh token for silent renewal, when the provider issued one.
    #[serde(default)]
    refresh_token: Option<String>,
    /// When the access token expires, if the provider said.
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl SessionCookie {
    /// Creates a session holding only an access token.
    #[must_use]
    pub fn new(access_token: String) -> Self {
        Self {
            access_token,
            refresh_token: None,
            expires_at: None,
        }
    }

    /// Creates a session from a provider token response.
    ///
    /// The ID token is not kept: it is verified during the code exchange and
    /// would push the cookie past the browser size limit.
    ///
    /// Providers commonly omit the refresh token on a refresh grant; the
    /// previous one is kept in that case.
    #[must_use]
    pub fn from_tokens(tokens: TokenSet, previous_refresh_token: Option<String>) -> Self {
        let expires_at = tokens
            .expires_in
            .and_then(|d| Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);

        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token.or(previous_refresh_token),
            expires_at,
        }
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: Option<String>) -> Self {
        self.refresh_token = refresh_token;
        self
    }

    /// Sets the access token expiry.
    #[must_use]
    pub fn with_expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Returns true if the access token expires within `window` from now.
    ///
    /// A session without a known expiry is treated as not expiring; the
    /// resource server still rejects the token if it has lapsed.
    #[must_use]
    pub fn expires_within(&self, window: Duration) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= Utc::now() + window)
    }

    /// Returns true if the access token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_within(Duration::zero())
    }
}

/// Anti-forgery state carried between `/login` and `/callback`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthStateCookie {
    /// The `state` parameter sent to the provider.
    pub csrf_token: String,
    /// PKCE verifier matching the challenge sent to the provider.
    pub pkce_verifier: String,
    /// OIDC nonce expected in the ID token.
    pub nonce: String,
    /// Where to send the browser after a successful login.
    pub redirect_to: String,
}
