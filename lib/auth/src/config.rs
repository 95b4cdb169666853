//! Authentication configuration.
//!
//! These types are deserialized by the server's configuration layer (the
//! `config` crate) and handed to
//! [`AuthenticationContext::new`](crate::AuthenticationContext::new).
//! Secrets never appear here: only the names under which the
//! [`SecretProvider`](crate::SecretProvider) stores them.

use serde::{Deserialize, Serialize};

/// Top-level authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Public base URL of this service (e.g. "https://admin.example.com").
    /// The default OAuth2 redirect URL and metadata URLs are resolved against it.
    pub http_public_uri: String,

    /// Browser (user) authentication settings.
    pub user_auth: UserAuthConfig,

    /// Machine-client (resource server) settings.
    #[serde(default)]
    pub app_auth: AppAuthConfig,
}

/// Settings for the browser OAuth2 authorization-code flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAuthConfig {
    /// Secret name of the base64 cookie HMAC key.
    #[serde(default = "default_cookie_hash_key_secret_name")]
    pub cookie_hash_key_secret_name: String,

    /// Secret name of the base64 cookie AES key.
    #[serde(default = "default_cookie_block_key_secret_name")]
    pub cookie_block_key_secret_name: String,

    /// How long a signed cookie stays acceptable, in hours.
    #[serde(default = "default_cookie_max_age_hours")]
    pub cookie_max_age_hours: i64,

    /// OpenID Connect client options.
    pub open_id: OpenIdOptions,
}

/// Settings for validating bearer tokens presented by machine clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppAuthConfig {
    /// Accepted token audiences as a comma-separated string.
    /// Empty disables the audience check.
    #[serde(default)]
    pub audience: String,
}

impl AppAuthConfig {
    /// Returns the accepted audiences, parsed from the comma-separated string.
    #[must_use]
    pub fn audiences(&self) -> Vec<&str> {
        self.audience
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .collect()
    }
}

/// OpenID Connect client options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenIdOptions {
    /// The issuer base URL used for OIDC discovery.
    base_url: String,
    /// The OAuth2 client ID registered with the provider.
    client_id: String,
    /// Secret name holding the OAuth2 client secret.
    #[serde(default = "default_client_secret_name")]
    client_secret_name: String,
    /// Legacy: read the client secret from this file instead of the secret provider.
    #[serde(default)]
    deprecated_client_secret_file: Option<String>,
    /// Scopes to request, comma-separated.
    #[serde(default = "default_scopes")]
    scopes: String,
}

fn default_cookie_hash_key_secret_name() -> String {
    "cookie_hash_key".to_string()
}

fn default_cookie_block_key_secret_name() -> String {
    "cookie_block_key".to_string()
}

fn default_cookie_max_age_hours() -> i64 {
    24 * 30
}

fn default_client_secret_name() -> String {
    "oidc_client_secret".to_string()
}

fn default_scopes() -> String {
    "openid,profile,offline_access".to_string()
}

impl UserAuthConfig {
    /// Creates user auth settings with default secret names.
    #[must_use]
    pub fn new(open_id: OpenIdOptions) -> Self {
        Self {
            cookie_hash_key_secret_name: default_cookie_hash_key_secret_name(),
            cookie_block_key_secret_name: default_cookie_block_key_secret_name(),
            cookie_max_age_hours: default_cookie_max_age_hours(),
            open_id,
        }
    }
}

impl OpenIdOptions {
    /// Creates OpenID options with defaults for optional fields.
    #[must_use]
    pub fn new(base_url: String, client_id: String) -> Self {
        Self {
            base_url,
            client_id,
            client_secret_name: default_client_secret_name(),
            deprecated_client_secret_file: None,
            scopes: default_scopes(),
        }
    }

    /// Sets the secret name of the client secret.
    #[must_use]
    pub fn with_client_secret_name(mut self, name: String) -> Self {
        self.client_secret_name = name;
        self
    }

    /// Sets the legacy client secret file.
    #[must_use]
    pub fn with_deprecated_client_secret_file(mut self, path: Option<String>) -> Self {
        self.deprecated_client_secret_file = path;
        self
    }

    /// Sets the scopes from a list.
    #[must_use]
    pub fn with_scopes(mut self, scopes: &[&str]) -> Self {
        self.scopes = scopes.join(",");
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret_name(&self) -> &str {
        &self.client_secret_name
    }

    #[must_use]
    pub fn deprecated_client_secret_file(&self) -> Option<&str> {
        self.deprecated_client_secret_file.as_deref()
    }

    /// Returns the scopes to request, parsed from the comma-separated string.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scopes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}
