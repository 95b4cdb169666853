//! The process-wide authentication context.

use crate::config::{AuthConfig, OpenIdOptions};
use crate::cookie::CookieManager;
use crate::error::SetupError;
use crate::grpc::{GrpcAuthLayer, GrpcAuthService};
use crate::interceptor::{AnonymousMethods, AuthInterceptor};
use crate::oauth2::{CALLBACK_PATH, OAuth2Client};
use crate::oidc::{IdentityProvider, OidcProvider};
use crate::resource_server::{JwksResourceServer, ResourceServer};
use crate::secrets::SecretProvider;
use crate::service::{
    AuthServiceServer, AuthServiceWrapper, ClaimsUserInfoProvider, IdpMetadataProvider, OAuth2MetadataProvider,
    UserInfoProvider,
};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tower::Layer;
use url::Url;
use waypoint_core::Result;

/// Upper bound on any single call to the identity provider.
pub const IDP_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Path of the OAuth2 authorization server metadata exposed by the gateway.
pub const OAUTH2_METADATA_PATH: &str = "/oauth2/metadata";

/// Path of the OpenID Connect discovery document exposed by the gateway.
pub const OIDC_METADATA_PATH: &str = "/.well-known/openid-configuration";

/// Optional replacements for the default providers.
#[derive(Clone, Default)]
pub struct AuthPlugins {
    pub metadata_provider: Option<Arc<dyn OAuth2MetadataProvider>>,
    pub user_info_provider: Option<Arc<dyn UserInfoProvider>>,
    pub resource_server: Option<Arc<dyn ResourceServer>>,
}

/// Already-built components for [`AuthenticationContext::from_parts`].
pub struct ContextParts {
    pub config: AuthConfig,
    pub oauth2_client: OAuth2Client,
    pub identity_provider: Arc<dyn IdentityProvider>,
    pub cookie_manager: CookieManager,
    pub resource_server: Arc<dyn ResourceServer>,
    pub metadata_provider: Arc<dyn OAuth2MetadataProvider>,
    pub user_info_provider: Arc<dyn UserInfoProvider>,
    pub http_client: reqwest::Client,
}

/// Everything both protocol layers need to authenticate callers.
///
/// Built once at startup and shared as `Arc<AuthenticationContext>`; nothing
/// in it changes afterwards. Construction either succeeds completely or
/// fails with a [`SetupError`].
pub struct AuthenticationContext {
    config: AuthConfig,
    oauth2_client: OAuth2Client,
    identity_provider: Arc<dyn IdentityProvider>,
    cookie_manager: CookieManager,
    resource_server: Arc<dyn ResourceServer>,
    oauth2_metadata_url: Url,
    oidc_metadata_url: Url,
    http_client: reqwest::Client,
    interceptor: AuthInterceptor,
    auth_service: Arc<AuthServiceWrapper>,
}

impl std::fmt::Debug for AuthenticationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationContext")
            .field("oauth2_client", &self.oauth2_client)
            .field("oauth2_metadata_url", &self.oauth2_metadata_url.as_str())
            .field("oidc_metadata_url", &self.oidc_metadata_url.as_str())
            .finish_non_exhaustive()
    }
}

impl AuthenticationContext {
    /// Builds the context: cookie keys, identity provider discovery, client
    /// secret, redirect and metadata URLs, then the interceptor and the
    /// wrapped auth service.
    pub async fn new(
        secrets: &dyn SecretProvider,
        config: AuthConfig,
        plugins: AuthPlugins,
    ) -> Result<Self, SetupError> {
        let user_auth = &config.user_auth;

        let hash_key = read_secret(secrets, &user_auth.cookie_hash_key_secret_name).await?;
        let block_key = read_secret(secrets, &user_auth.cookie_block_key_secret_name).await?;

        let cookie_manager = CookieManager::new(&hash_key, &block_key)
            .map_err(|e| {
                tracing::error!(error = %e, "error creating cookie manager");
                SetupError::setup(format!("error creating cookie manager: {e}"))
            })?
            .with_max_age(cookie_max_age(user_auth.cookie_max_age_hours)?);

        let http_client = reqwest::Client::builder()
            .timeout(IDP_CONNECTION_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| SetupError::setup(format!("failed to create HTTP client: {e}")))?;

        let base_url = user_auth.open_id.base_url();
        let provider = OidcProvider::discover(base_url, http_client.clone(), IDP_CONNECTION_TIMEOUT)
            .await
            .map_err(|e| {
                SetupError::setup(format!(
                    "error creating oidc provider w/ issuer [{base_url}]: {e}"
                ))
            })?;

        tracing::info!(base_url, "base IDP URL");

        let client_secret = resolve_client_secret(secrets, &user_auth.open_id).await?;

        let public_uri = parse_public_uri(&config.http_public_uri)?;
        let redirect_url = public_uri
            .join(CALLBACK_PATH)
            .map_err(|e| SetupError::setup(format!("invalid redirect URL: {e}")))?;

        let endpoints = provider.endpoints().clone();
        let oauth2_client = OAuth2Client::new(
            user_auth.open_id.client_id().to_string(),
            client_secret,
            user_auth
                .open_id
                .scopes()
                .into_iter()
                .map(str::to_string)
                .collect(),
            redirect_url,
            endpoints.authorization_endpoint.clone(),
            endpoints.token_endpoint.clone(),
        );

        let audiences: Vec<String> = config
            .app_auth
            .audiences()
            .into_iter()
            .map(str::to_string)
            .collect();

        let resource_server: Arc<dyn ResourceServer> = match plugins.resource_server {
            Some(resource_server) => resource_server,
            None => Arc::new(JwksResourceServer::new(
                provider.signing_keys(),
                endpoints.issuer.clone(),
                audiences.clone(),
            )),
        };

        let metadata_provider = plugins.metadata_provider.unwrap_or_else(|| {
            Arc::new(IdpMetadataProvider::new(
                endpoints,
                &oauth2_client,
                public_uri.to_string(),
                audiences.first().cloned().unwrap_or_default(),
            ))
        });
        let user_info_provider = plugins
            .user_info_provider
            .unwrap_or_else(|| Arc::new(ClaimsUserInfoProvider));

        Self::from_parts(ContextParts {
            config,
            oauth2_client,
            identity_provider: Arc::new(provider),
            cookie_manager,
            resource_server,
            metadata_provider,
            user_info_provider,
            http_client,
        })
    }

    /// Assembles a context from already-built components.
    pub fn from_parts(parts: ContextParts) -> Result<Self, SetupError> {
        let public_uri = parse_public_uri(&parts.config.http_public_uri)?;

        let oauth2_metadata_url = public_uri.join(OAUTH2_METADATA_PATH).map_err(|e| {
            tracing::error!(error = %e, "error parsing oauth2 metadata URL");
            SetupError::setup(format!("error parsing metadata URL: {e}"))
        })?;
        tracing::info!(url = %oauth2_metadata_url, "oauth2 metadata endpoint");

        let oidc_metadata_url = public_uri.join(OIDC_METADATA_PATH).map_err(|e| {
            tracing::error!(error = %e, "error parsing oidc metadata URL");
            SetupError::setup(format!("error parsing metadata URL: {e}"))
        })?;
        tracing::info!(url = %oidc_metadata_url, "oidc metadata endpoint");

        let interceptor = AuthInterceptor::new(
            Arc::clone(&parts.resource_server),
            AnonymousMethods::default(),
            IDP_CONNECTION_TIMEOUT,
        );

        let auth_service = Arc::new(AuthServiceWrapper::new(
            parts.metadata_provider,
            parts.user_info_provider,
            interceptor.clone(),
            AnonymousMethods::default(),
        ));

        Ok(Self {
            config: parts.config,
            oauth2_client: parts.oauth2_client,
            identity_provider: parts.identity_provider,
            cookie_manager: parts.cookie_manager,
            resource_server: parts.resource_server,
            oauth2_metadata_url,
            oidc_metadata_url,
            http_client: parts.http_client,
            interceptor,
            auth_service,
        })
    }

    /// Returns the OAuth2 client to use for a request arriving at
    /// `request_url`. See [`OAuth2Client::for_request`].
    #[must_use]
    pub fn oauth2_client(&self, request_url: Option<&Url>) -> Cow<'_, OAuth2Client> {
        self.oauth2_client.for_request(request_url)
    }

    #[must_use]
    pub fn identity_provider(&self) -> &dyn IdentityProvider {
        self.identity_provider.as_ref()
    }

    #[must_use]
    pub fn cookie_manager(&self) -> &CookieManager {
        &self.cookie_manager
    }

    #[must_use]
    pub fn resource_server(&self) -> &Arc<dyn ResourceServer> {
        &self.resource_server
    }

    #[must_use]
    pub fn options(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn oauth2_metadata_url(&self) -> &Url {
        &self.oauth2_metadata_url
    }

    #[must_use]
    pub fn oidc_metadata_url(&self) -> &Url {
        &self.oidc_metadata_url
    }

    /// The client used for identity provider calls; bounded by
    /// [`IDP_CONNECTION_TIMEOUT`].
    #[must_use]
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    #[must_use]
    pub fn interceptor(&self) -> &AuthInterceptor {
        &self.interceptor
    }

    #[must_use]
    pub fn auth_service(&self) -> &Arc<AuthServiceWrapper> {
        &self.auth_service
    }

    /// The auth service ready to be added to the gRPC routes, with its own
    /// anonymous-method policy in front.
    #[must_use]
    pub fn auth_service_server(&self) -> GrpcAuthService<AuthServiceServer<AuthServiceWrapper>> {
        let authorizer = Arc::clone(&self.auth_service);
        GrpcAuthLayer::new(authorizer).layer(AuthServiceServer::from_arc(Arc::clone(
            &self.auth_service,
        )))
    }

    /// Layer enforcing the interceptor policy on any other gRPC service.
    #[must_use]
    pub fn grpc_auth_layer(&self) -> GrpcAuthLayer {
        GrpcAuthLayer::new(Arc::new(self.interceptor.clone()))
    }
}

/// Session cookie lifetime; must be a positive number of hours.
fn cookie_max_age(hours: i64) -> Result<chrono::Duration, SetupError> {
    chrono::Duration::try_hours(hours)
        .filter(|max_age| *max_age > chrono::Duration::zero())
        .ok_or_else(|| {
            SetupError::setup(format!(
                "cookie max age must be a positive number of hours, got {hours}"
            ))
            .into()
        })
}

async fn read_secret(
    secrets: &dyn SecretProvider,
    name: &str,
) -> Result<String, SetupError> {
    let value = secrets.get(name).await.map_err(|e| {
        tracing::error!(secret = name, error = %e, "could not read secret");
        SetupError::ConfigFileRead {
            secret: name.to_string(),
        }
    })?;
    Ok(value)
}

async fn resolve_client_secret(
    secrets: &dyn SecretProvider,
    options: &OpenIdOptions,
) -> Result<String, SetupError> {
    let secret = match options.deprecated_client_secret_file() {
        Some(path) => {
            tracing::warn!(
                path,
                "reading the OAuth2 client secret from deprecated_client_secret_file; \
                 store it under client_secret_name in the secret provider instead"
            );
            tokio::fs::read_to_string(path).await.map_err(|e| {
                tracing::error!(path, error = %e, "could not read client secret file");
                SetupError::ConfigFileRead {
                    secret: path.to_string(),
                }
            })?
        }
        None => read_secret(secrets, options.client_secret_name()).await?,
    };

    Ok(trim_trailing_newline(secret))
}

/// Removes a single trailing `\n`, as left by `echo` or most editors.
fn trim_trailing_newline(mut value: String) -> String {
    if value.ends_with('\n') {
        value.pop();
    }
    value
}

fn parse_public_uri(uri: &str) -> Result<Url, SetupError> {
    let url = Url::parse(uri).map_err(|e| {
        SetupError::setup(format!("invalid http_public_uri '{uri}': {e}"))
    })?;
    Ok(url)
}
