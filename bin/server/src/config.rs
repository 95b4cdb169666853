//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from an optional file named by
//! `WAYPOINT_CONFIG` and from environment variables, the latter taking
//! precedence. Nested keys use `__` as separator, e.g.
//! `SECURITY__USE_AUTH=true` or `AUTH__USER_AUTH__OPEN_ID__CLIENT_ID=admin`.
//!
//! See [`AuthConfig`] for authentication configuration.

use serde::Deserialize;
use std::path::PathBuf;
use waypoint_auth::{AuthConfig, EnvSecretProvider, FileSecretProvider, SecretProvider};

/// Environment variable naming an optional configuration file.
pub const CONFIG_FILE_ENV: &str = "WAYPOINT_CONFIG";

/// Server configuration composed from library configs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address of the HTTP listener. In secure mode it also carries gRPC.
    #[serde(default = "default_http_address")]
    pub http_address: String,

    /// Address of the plaintext gRPC listener, used only in insecure mode.
    #[serde(default = "default_grpc_address")]
    pub grpc_address: String,

    #[serde(default)]
    pub security: SecurityConfig,

    /// OpenAPI document served at `/api/v1/openapi`.
    #[serde(default = "default_openapi_spec_file")]
    pub openapi_spec_file: PathBuf,

    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Authentication configuration; required when `security.use_auth` is set.
    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

/// Transport and authentication switches.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    /// Serve gRPC and HTTP together over a single TLS listener.
    #[serde(default)]
    pub secure: bool,

    /// Enforce authentication on gRPC calls and expose the login flow.
    #[serde(default)]
    pub use_auth: bool,

    #[serde(default)]
    pub ssl: SslConfig,
}

/// PEM files for the TLS listener.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SslConfig {
    #[serde(default)]
    pub certificate_file: PathBuf,
    #[serde(default)]
    pub key_file: PathBuf,
}

/// Where named secrets are read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretSource {
    /// `{env_prefix}{NAME}` environment variables.
    #[default]
    Env,
    /// One file per secret in `directory`.
    File,
}

/// Secret provider selection.
#[derive(Debug, Clone, Deserialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub source: SecretSource,

    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,

    #[serde(default = "default_secrets_directory")]
    pub directory: PathBuf,
}

fn default_http_address() -> String {
    "0.0.0.0:8088".to_string()
}

fn default_grpc_address() -> String {
    "0.0.0.0:8089".to_string()
}

fn default_openapi_spec_file() -> PathBuf {
    PathBuf::from("openapi/admin.swagger.json")
}

fn default_env_prefix() -> String {
    "WAYPOINT_SECRET_".to_string()
}

fn default_secrets_directory() -> PathBuf {
    PathBuf::from("/etc/waypoint/secrets")
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            source: SecretSource::default(),
            env_prefix: default_env_prefix(),
            directory: default_secrets_directory(),
        }
    }
}

impl SecretsConfig {
    /// Builds the configured secret provider.
    #[must_use]
    pub fn provider(&self) -> Box<dyn SecretProvider> {
        match self.source {
            SecretSource::Env => Box::new(EnvSecretProvider::new(self.env_prefix.clone())),
            SecretSource::File => Box::new(FileSecretProvider::new(self.directory.clone())),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from the optional `WAYPOINT_CONFIG` file and
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn load() -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }
        Self::from_builder(builder.add_source(
            config::Environment::default()
                .separator("__")
                .try_parsing(true),
        ))
    }

    /// Builds and validates configuration from prepared sources.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources do not deserialize or if
    /// authentication is enabled without an `auth` section.
    pub fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, config::ConfigError> {
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.security.use_auth && self.auth.is_none() {
            return Err(config::ConfigError::Message(
                "security.use_auth requires an auth section".to_string(),
            ));
        }
        if self.security.secure
            && (self.security.ssl.certificate_file.as_os_str().is_empty()
                || self.security.ssl.key_file.as_os_str().is_empty())
        {
            return Err(config::ConfigError::Message(
                "security.secure requires security.ssl.certificate_file and key_file".to_string(),
            ));
        }
        Ok(())
    }

    /// The auth section when authentication is enabled.
    #[must_use]
    pub fn enabled_auth(&self) -> Option<&AuthConfig> {
        if self.security.use_auth {
            self.auth.as_ref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn from_json(json: &str) -> Result<ServerConfig, config::ConfigError> {
        ServerConfig::from_builder(
            config::Config::builder().add_source(File::from_str(json, FileFormat::Json)),
        )
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = from_json("{}").expect("config");
        assert_eq!(config.http_address, "0.0.0.0:8088");
        assert_eq!(config.grpc_address, "0.0.0.0:8089");
        assert!(!config.security.secure);
        assert!(!config.security.use_auth);
        assert_eq!(config.secrets.source, SecretSource::Env);
        assert_eq!(config.secrets.env_prefix, "WAYPOINT_SECRET_");
        assert!(config.auth.is_none());
        assert!(config.enabled_auth().is_none());
    }

    #[test]
    fn auth_section_fills_nested_defaults() {
        let config = from_json(
            r#"{
                "security": {"use_auth": true},
                "secrets": {"source": "file", "directory": "/run/secrets"},
                "auth": {
                    "http_public_uri": "https://admin.example.com",
                    "user_auth": {"open_id": {"base_url": "https://idp.example.com", "client_id": "admin"}}
                }
            }"#,
        )
        .expect("config");

        let auth = config.enabled_auth().expect("auth enabled");
        assert_eq!(auth.user_auth.open_id.client_id(), "admin");
        assert_eq!(auth.user_auth.cookie_hash_key_secret_name, "cookie_hash_key");
        assert_eq!(auth.user_auth.open_id.client_secret_name(), "oidc_client_secret");
        assert_eq!(config.secrets.source, SecretSource::File);
        assert_eq!(config.secrets.directory, PathBuf::from("/run/secrets"));
    }

    #[test]
    fn use_auth_without_auth_section_is_rejected() {
        assert!(from_json(r#"{"security": {"use_auth": true}}"#).is_err());
    }

    #[test]
    fn secure_mode_requires_certificate_paths() {
        assert!(from_json(r#"{"security": {"secure": true}}"#).is_err());
        let config = from_json(
            r#"{"security": {"secure": true, "ssl": {"certificate_file": "c.pem", "key_file": "k.pem"}}}"#,
        )
        .expect("config");
        assert!(config.security.secure);
    }

    #[test]
    fn auth_section_is_ignored_when_disabled() {
        let config = from_json(
            r#"{"auth": {
                "http_public_uri": "https://admin.example.com",
                "user_auth": {"open_id": {"base_url": "https://idp.example.com", "client_id": "admin"}}
            }}"#,
        )
        .expect("config");
        assert!(config.auth.is_some());
        assert!(config.enabled_auth().is_none());
    }
}
