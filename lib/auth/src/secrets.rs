//! Secret lookup.
//!
//! The authentication context treats secret storage as a black box behind
//! [`SecretProvider`]. Two backends cover the usual deployments: environment
//! variables and a directory with one file per secret (the layout produced
//! by mounting a Kubernetes secret as a volume).

use crate::error::SecretError;
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::collections::HashMap;
use std::path::PathBuf;

/// Key-value lookup of secrets by logical name.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Returns the secret stored under `name`.
    async fn get(&self, name: &str) -> Result<String, Report<SecretError>>;
}

/// Reads secrets from environment variables named `{prefix}{NAME}`.
///
/// The name is upper-cased and dashes become underscores, so the secret
/// `cookie-hash-key` with prefix `WAYPOINT_SECRET_` is read from
/// `WAYPOINT_SECRET_COOKIE_HASH_KEY`.
#[derive(Debug, Clone)]
pub struct EnvSecretProvider {
    prefix: String,
}

impl EnvSecretProvider {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn variable_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name.to_uppercase().replace('-', "_"))
    }
}

#[async_trait]
impl SecretProvider for EnvSecretProvider {
    async fn get(&self, name: &str) -> Result<String, Report<SecretError>> {
        let variable = self.variable_name(name);
        match std::env::var(&variable) {
            Ok(value) => Ok(value),
            Err(std::env::VarError::NotPresent) => Err(SecretError::NotFound {
                name: name.to_string(),
            }
            .into()),
            Err(e) => Err(SecretError::Unreadable {
                name: name.to_string(),
                reason: e.to_string(),
            }
            .into()),
        }
    }
}

/// Reads secrets from files in a directory, one file per secret name.
#[derive(Debug, Clone)]
pub struct FileSecretProvider {
    directory: PathBuf,
}

impl FileSecretProvider {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl SecretProvider for FileSecretProvider {
    async fn get(&self, name: &str) -> Result<String, Report<SecretError>> {
        // Secret names are single path components.
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            return Err(SecretError::NotFound {
                name: name.to_string(),
            }
            .into());
        }

        let path = self.directory.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SecretError::NotFound {
                name: name.to_string(),
            }
            .into()),
            Err(e) => Err(SecretError::Unreadable {
                name: name.to_string(),
                reason: e.to_string(),
            }
            .into()),
        }
    }
}

/// Serves secrets from an in-memory map.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretProvider {
    secrets: HashMap<String, String>,
}

impl StaticSecretProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a secret.
    #[must_use]
    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretProvider for StaticSecretProvider {
    async fn get(&self, name: &str) -> Result<String, Report<SecretError>> {
        self.secrets.get(name).cloned().ok_or_else(|| {
            SecretError::NotFound {
                name: name.to_string(),
            }
            .into()
        })
    }
}
