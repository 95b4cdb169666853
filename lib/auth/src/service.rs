//! The `flyteidl.service.AuthService` implementation.
//!
//! The RPC contract is generated from `proto/auth.proto`; this module composes
//! it from injected providers so the service can be served over gRPC and
//! called in-process by the REST gateway.

use crate::error::AuthenticationError;
use crate::interceptor::{AnonymousMethods, AuthDecision, AuthInterceptor, Authorizer};
use crate::oauth2::OAuth2Client;
use crate::oidc::ProviderEndpoints;
use async_trait::async_trait;
use http::HeaderMap;
use rootcause::prelude::Report;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use waypoint_core::IdentityContext;

pub use crate::proto::auth_service_server::{AuthService, AuthServiceServer};
pub use crate::proto::{
    OAuth2MetadataRequest, OAuth2MetadataResponse, PublicClientAuthConfigRequest,
    PublicClientAuthConfigResponse, UserInfoRequest, UserInfoResponse,
};

/// Metadata key clients use to send their token to this service.
pub const AUTHORIZATION_METADATA_KEY: &str = "authorization";

/// Serves OAuth2 discovery and public client configuration.
#[async_trait]
pub trait OAuth2MetadataProvider: Send + Sync {
    async fn oauth2_metadata(
        &self,
        request: OAuth2MetadataRequest,
    ) -> Result<OAuth2MetadataResponse, Status>;

    async fn flyte_client(
        &self,
        request: PublicClientAuthConfigRequest,
    ) -> Result<PublicClientAuthConfigResponse, Status>;
}

/// Serves information about the authenticated caller.
#[async_trait]
pub trait UserInfoProvider: Send + Sync {
    async fn user_info(
        &self,
        identity: &IdentityContext,
        request: UserInfoRequest,
    ) -> Result<UserInfoResponse, Status>;
}

/// Composes injected providers into an [`AuthService`].
///
/// Every RPC is delegated unchanged. The only behavior of its own is the
/// authorization decision: the service's discovery methods are always
/// anonymous, and everything else goes through the interceptor.
#[derive(Clone)]
pub struct AuthServiceWrapper {
    metadata: Arc<dyn OAuth2MetadataProvider>,
    user_info: Arc<dyn UserInfoProvider>,
    interceptor: AuthInterceptor,
    anonymous: AnonymousMethods,
}

impl std::fmt::Debug for AuthServiceWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthServiceWrapper")
            .field("interceptor", &self.interceptor)
            .field("anonymous", &self.anonymous)
            .finish_non_exhaustive()
    }
}

impl AuthServiceWrapper {
    #[must_use]
    pub fn new(
        metadata: Arc<dyn OAuth2MetadataProvider>,
        user_info: Arc<dyn UserInfoProvider>,
        interceptor: AuthInterceptor,
        anonymous: AnonymousMethods,
    ) -> Self {
        Self {
            metadata,
            user_info,
            interceptor,
            anonymous,
        }
    }
}

#[async_trait]
impl Authorizer for AuthServiceWrapper {
    async fn authorize(
        &self,
        method: &str,
        headers: &HeaderMap,
    ) -> Result<AuthDecision, Report<AuthenticationError>> {
        if self.anonymous.contains(method) {
            return Ok(AuthDecision::Anonymous);
        }
        self.interceptor.authorize(method, headers).await
    }
}

#[tonic::async_trait]
impl AuthService for AuthServiceWrapper {
    async fn o_auth2_metadata(
        &self,
        request: Request<OAuth2MetadataRequest>,
    ) -> Result<Response<OAuth2MetadataResponse>, Status> {
        self.metadata
            .oauth2_metadata(request.into_inner())
            .await
            .map(Response::new)
    }

    async fn flyte_client(
        &self,
        request: Request<PublicClientAuthConfigRequest>,
    ) -> Result<Response<PublicClientAuthConfigResponse>, Status> {
        self.metadata
            .flyte_client(request.into_inner())
            .await
            .map(Response::new)
    }

    async fn user_info(
        &self,
        request: Request<UserInfoRequest>,
    ) -> Result<Response<UserInfoResponse>, Status> {
        let identity = request
            .extensions()
            .get::<IdentityContext>()
            .cloned()
            .ok_or_else(|| Status::unauthenticated("missing credentials"))?;

        self.user_info
            .user_info(&identity, request.into_inner())
            .await
            .map(Response::new)
    }
}

/// Default metadata provider: republishes the discovered identity provider
/// endpoints and the public client registration.
#[derive(Debug, Clone)]
pub struct IdpMetadataProvider {
    endpoints: ProviderEndpoints,
    client: PublicClientAuthConfigResponse,
}

impl IdpMetadataProvider {
    /// Creates a provider.
    ///
    /// `service_http_endpoint` is this service's public base URL and
    /// `audience` the token audience clients should request.
    #[must_use]
    pub fn new(
        endpoints: ProviderEndpoints,
        client: &OAuth2Client,
        service_http_endpoint: String,
        audience: String,
    ) -> Self {
        Self {
            endpoints,
            client: PublicClientAuthConfigResponse {
                client_id: client.client_id().to_string(),
                redirect_uri: client.redirect_url().to_string(),
                scopes: client.scopes().to_vec(),
                authorization_metadata_key: AUTHORIZATION_METADATA_KEY.to_string(),
                service_http_endpoint,
                audience,
            },
        }
    }
}

#[async_trait]
impl OAuth2MetadataProvider for IdpMetadataProvider {
    async fn oauth2_metadata(
        &self,
        _request: OAuth2MetadataRequest,
    ) -> Result<OAuth2MetadataResponse, Status> {
        let endpoints = &self.endpoints;
        Ok(OAuth2MetadataResponse {
            issuer: endpoints.issuer.clone(),
            authorization_endpoint: endpoints.authorization_endpoint.to_string(),
            token_endpoint: endpoints
                .token_endpoint
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            response_types_supported: endpoints.response_types_supported.clone(),
            scopes_supported: endpoints.scopes_supported.clone(),
            token_endpoint_auth_methods_supported: endpoints
                .token_endpoint_auth_methods_supported
                .clone(),
            jwks_uri: endpoints.jwks_uri.to_string(),
            code_challenge_methods_supported: endpoints.code_challenge_methods_supported.clone(),
            grant_types_supported: endpoints.grant_types_supported.clone(),
            device_authorization_endpoint: String::new(),
        })
    }

    async fn flyte_client(
        &self,
        _request: PublicClientAuthConfigRequest,
    ) -> Result<PublicClientAuthConfigResponse, Status> {
        Ok(self.client.clone())
    }
}

/// Default user info provider: answers from the validated token's claims.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimsUserInfoProvider;

#[async_trait]
impl UserInfoProvider for ClaimsUserInfoProvider {
    async fn user_info(
        &self,
        identity: &IdentityContext,
        _request: UserInfoRequest,
    ) -> Result<UserInfoResponse, Status> {
        Ok(UserInfoResponse {
            subject: identity.subject().to_string(),
            name: identity.name().unwrap_or_default().to_string(),
            email: identity.email().unwrap_or_default().to_string(),
            ..Default::default()
        })
    }
}
