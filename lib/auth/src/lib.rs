//! Authentication for the waypoint admin gateway.
//!
//! This crate provides:
//! - Authentication configuration and secret lookup (`AuthConfig`, `SecretProvider`)
//! - Encrypted, signed session cookies (`CookieManager`, `SessionCookie`)
//! - The OAuth2 client descriptor with per-host redirect resolution (`OAuth2Client`)
//! - OpenID Connect provider access (`IdentityProvider`, `OidcProvider`)
//! - Bearer token validation for machine clients (`ResourceServer`)
//! - Per-call authentication policy for gRPC (`AuthInterceptor`, `GrpcAuthLayer`)
//! - The `flyteidl.service.AuthService` contract and its default providers
//! - The process-wide `AuthenticationContext` tying them together
//!
//! # Example
//!
//! ```no_run
//! use waypoint_auth::{AuthConfig, AuthPlugins, AuthenticationContext, EnvSecretProvider};
//!
//! # async fn run(config: AuthConfig) -> Result<(), Box<dyn std::error::Error>> {
//! let secrets = EnvSecretProvider::new("WAYPOINT_SECRET_");
//! let context = AuthenticationContext::new(&secrets, config, AuthPlugins::default())
//!     .await
//!     .map_err(|e| e.to_string())?;
//!
//! println!("redirect URL: {}", context.oauth2_client(None).redirect_url());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod cookie;
pub mod error;
pub mod grpc;
pub mod interceptor;
pub mod oauth2;
pub mod oidc;
mod proto;
pub mod resource_server;
pub mod secrets;
pub mod service;
pub mod session;

// Re-export main types at crate root
pub use config::{AppAuthConfig, AuthConfig, OpenIdOptions, UserAuthConfig};
pub use context::{
    AuthPlugins, AuthenticationContext, ContextParts, IDP_CONNECTION_TIMEOUT, OAUTH2_METADATA_PATH,
    OIDC_METADATA_PATH,
};
pub use cookie::{CookieManager, MAX_COOKIE_SIZE};
pub use error::{AuthenticationError, CookieError, ProviderError, SecretError, SetupError};
pub use grpc::{GrpcAuthLayer, GrpcAuthService};
pub use interceptor::{
    ANONYMOUS_METHOD_NAMES, AnonymousMethods, AuthDecision, AuthInterceptor, Authorizer,
    FLYTE_CLIENT_METHOD, OAUTH2_METADATA_METHOD, SESSION_AUTHORIZATION_HEADER, USER_INFO_METHOD,
};
pub use oauth2::{CALLBACK_PATH, OAuth2Client};
pub use oidc::{IdentityProvider, OidcProvider, ProviderEndpoints, TokenSet};
pub use resource_server::{JwksResourceServer, ResourceServer};
pub use secrets::{EnvSecretProvider, FileSecretProvider, SecretProvider, StaticSecretProvider};
pub use service::{
    AuthService, AuthServiceServer, AuthServiceWrapper, ClaimsUserInfoProvider, IdpMetadataProvider,
    OAuth2MetadataProvider, UserInfoProvider,
};
pub use session::{AUTH_STATE_COOKIE, AuthStateCookie, SESSION_COOKIE, SessionCookie};
