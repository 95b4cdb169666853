//! OpenID Connect identity provider client using the openidconnect crate.

use crate::error::ProviderError;
use crate::oauth2::OAuth2Client;
use crate::session::AuthStateCookie;
use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use openidconnect::core::{CoreAuthenticationFlow, CoreClient, CoreProviderMetadata};
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, CsrfToken, ErrorResponse, IssuerUrl, Nonce,
    OAuth2TokenResponse, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken,
    RequestTokenError, Scope, TokenResponse,
};
use rootcause::prelude::Report;
use std::time::Duration;
use url::Url;

/// Discovery document path relative to the issuer.
pub const OIDC_DISCOVERY_PATH: &str = ".well-known/openid-configuration";

/// Tokens returned by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_in: Option<Duration>,
}

/// Endpoints and capabilities taken from the provider's discovery document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub issuer: String,
    pub discovery_url: Url,
    pub authorization_endpoint: Url,
    pub token_endpoint: Option<Url>,
    pub userinfo_endpoint: Option<Url>,
    pub jwks_uri: Url,
    pub scopes_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
}

/// The identity provider operations the browser flow needs.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Endpoints discovered at startup.
    fn endpoints(&self) -> &ProviderEndpoints;

    /// Builds the authorization URL to send the browser to, together with the
    /// anti-forgery state that must come back on the callback.
    fn authorization_url(
        &self,
        client: &OAuth2Client,
        redirect_to: String,
    ) -> Result<(Url, AuthStateCookie), Report<ProviderError>>;

    /// Exchanges an authorization code for tokens.
    async fn exchange_code(
        &self,
        client: &OAuth2Client,
        code: &str,
        state: &AuthStateCookie,
    ) -> Result<TokenSet, Report<ProviderError>>;

    /// Obtains fresh tokens with a refresh token.
    async fn refresh_token(
        &self,
        client: &OAuth2Client,
        refresh_token: &str,
    ) -> Result<TokenSet, Report<ProviderError>>;
}

/// [`IdentityProvider`] backed by a discovered OIDC provider.
pub struct OidcProvider {
    metadata: CoreProviderMetadata,
    endpoints: ProviderEndpoints,
    http_client: reqwest::Client,
    timeout: Duration,
}

impl std::fmt::Debug for OidcProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcProvider")
            .field("endpoints", &self.endpoints)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl OidcProvider {
    /// Discovers the provider at `issuer`.
    ///
    /// Every call to the provider, discovery included, goes through
    /// `http_client` and is abandoned after `timeout`.
    pub async fn discover(
        issuer: &str,
        http_client: reqwest::Client,
        timeout: Duration,
    ) -> Result<Self, Report<ProviderError>> {
        let issuer_url =
            IssuerUrl::new(issuer.to_string()).map_err(|e| ProviderError::Configuration {
                reason: format!("invalid issuer URL '{issuer}': {e}"),
            })?;

        let metadata = tokio::time::timeout(
            timeout,
            CoreProviderMetadata::discover_async(issuer_url, &http_client),
        )
        .await
        .map_err(|_| ProviderError::Timeout)?
        .map_err(|e| match e {
            openidconnect::DiscoveryError::Request(e) => ProviderError::Unavailable {
                reason: e.to_string(),
            },
            other => ProviderError::Rejected {
                reason: other.to_string(),
            },
        })?;

        let endpoints = endpoints_from_metadata(&metadata)?;

        tracing::info!(
            issuer = %endpoints.issuer,
            authorization_endpoint = %endpoints.authorization_endpoint,
            "discovered identity provider"
        );

        Ok(Self {
            metadata,
            endpoints,
            http_client,
            timeout,
        })
    }

    /// Returns the raw discovery metadata.
    #[must_use]
    pub fn metadata(&self) -> &CoreProviderMetadata {
        &self.metadata
    }

    /// The token signing keys read during discovery.
    ///
    /// Keys the validator cannot use are left out.
    #[must_use]
    pub fn signing_keys(&self) -> JwkSet {
        let keys: Vec<Jwk> = self
            .metadata
            .jwks()
            .keys()
            .iter()
            .filter_map(|key| {
                serde_json::to_value(key)
                    .and_then(serde_json::from_value::<Jwk>)
                    .inspect_err(|e| tracing::warn!(error = %e, "skipping unusable signing key"))
                    .ok()
            })
            .collect();

        tracing::info!(
            jwks_uri = %self.endpoints.jwks_uri,
            keys = keys.len(),
            "loaded token signing keys"
        );
        JwkSet { keys }
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }

    fn authorization_url(
        &self,
        client: &OAuth2Client,
        redirect_to: String,
    ) -> Result<(Url, AuthStateCookie), Report<ProviderError>> {
        let core_client = CoreClient::from_provider_metadata(
            self.metadata.clone(),
            ClientId::new(client.client_id().to_string()),
            Some(ClientSecret::new(client.client_secret().to_string())),
        )
        .set_redirect_uri(RedirectUrl::from_url(client.redirect_url().clone()));

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut auth_request = core_client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                CsrfToken::new_random,
                Nonce::new_random,
            )
            .set_pkce_challenge(pkce_challenge);

        // openid is always requested by the authentication flow itself
        for scope in client.scopes().iter().filter(|s| s.as_str() != "openid") {
            auth_request = auth_request.add_scope(Scope::new(scope.clone()));
        }

        let (auth_url, csrf_token, nonce) = auth_request.url();

        let state = AuthStateCookie {
            csrf_token: csrf_token.secret().clone(),
            pkce_verifier: pkce_verifier.secret().clone(),
            nonce: nonce.secret().clone(),
            redirect_to,
        };

        Ok((auth_url, state))
    }

    async fn exchange_code(
        &self,
        client: &OAuth2Client,
        code: &str,
        state: &AuthStateCookie,
    ) -> Result<TokenSet, Report<ProviderError>> {
        let core_client = CoreClient::from_provider_metadata(
            self.metadata.clone(),
            ClientId::new(client.client_id().to_string()),
            Some(ClientSecret::new(client.client_secret().to_string())),
        )
        .set_redirect_uri(RedirectUrl::from_url(client.redirect_url().clone()));

        let token_request = core_client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .map_err(|e| ProviderError::Configuration {
                reason: format!("token endpoint: {e}"),
            })?
            .set_pkce_verifier(PkceCodeVerifier::new(state.pkce_verifier.clone()));

        let token_response =
            tokio::time::timeout(self.timeout, token_request.request_async(&self.http_client))
                .await
                .map_err(|_| ProviderError::Timeout)?
                .map_err(token_error)?;

        // An ID token, when issued, must be bound to this login attempt.
        if let Some(id_token) = token_response.id_token() {
            let nonce = Nonce::new(state.nonce.clone());
            id_token
                .claims(&core_client.id_token_verifier(), &nonce)
                .map_err(|e| ProviderError::Rejected {
                    reason: format!("ID token validation failed: {e}"),
                })?;
        }

        Ok(TokenSet {
            access_token: token_response.access_token().secret().clone(),
            refresh_token: token_response.refresh_token().map(|t| t.secret().clone()),
            id_token: raw_id_token(&token_response),
            expires_in: token_response.expires_in(),
        })
    }

    async fn refresh_token(
        &self,
        client: &OAuth2Client,
        refresh_token: &str,
    ) -> Result<TokenSet, Report<ProviderError>> {
        let core_client = CoreClient::from_provider_metadata(
            self.metadata.clone(),
            ClientId::new(client.client_id().to_string()),
            Some(ClientSecret::new(client.client_secret().to_string())),
        );

        let refresh_token = RefreshToken::new(refresh_token.to_string());
        let token_request = core_client
            .exchange_refresh_token(&refresh_token)
            .map_err(|e| ProviderError::Configuration {
                reason: format!("token endpoint: {e}"),
            })?;

        let token_response =
            tokio::time::timeout(self.timeout, token_request.request_async(&self.http_client))
                .await
                .map_err(|_| ProviderError::Timeout)?
                .map_err(token_error)?;

        Ok(TokenSet {
            access_token: token_response.access_token().secret().clone(),
            refresh_token: token_response.refresh_token().map(|t| t.secret().clone()),
            id_token: raw_id_token(&token_response),
            expires_in: token_response.expires_in(),
        })
    }
}

fn token_error<RE, T>(err: RequestTokenError<RE, T>) -> ProviderError
where
    RE: std::error::Error + 'static,
    T: ErrorResponse + 'static,
{
    match err {
        RequestTokenError::Request(e) => ProviderError::Unavailable {
            reason: e.to_string(),
        },
        other => ProviderError::Rejected {
            reason: other.to_string(),
        },
    }
}

/// Extracts the raw `id_token` string from a token response.
fn raw_id_token<TR: serde::Serialize>(token_response: &TR) -> Option<String> {
    serde_json::to_value(token_response)
        .ok()?
        .get("id_token")?
        .as_str()
        .map(str::to_string)
}

fn endpoints_from_metadata(
    metadata: &CoreProviderMetadata,
) -> Result<ProviderEndpoints, Report<ProviderError>> {
    let issuer = metadata.issuer().as_str().to_string();

    let issuer_base = if issuer.ends_with('/') {
        issuer.clone()
    } else {
        format!("{issuer}/")
    };
    let discovery_url = Url::parse(&issuer_base)
        .and_then(|base| base.join(OIDC_DISCOVERY_PATH))
        .map_err(|e| ProviderError::Configuration {
            reason: format!("invalid issuer '{issuer}': {e}"),
        })?;

    // Enumerated capability lists are read back from the serialized document
    // so they keep the provider's own spelling.
    let document = serde_json::to_value(metadata).map_err(|e| ProviderError::Configuration {
        reason: format!("failed to serialize provider metadata: {e}"),
    })?;
    let strings = |key: &str| -> Vec<String> {
        document
            .get(key)
            .and_then(|v| v.as_array())
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    };

    Ok(ProviderEndpoints {
        discovery_url,
        authorization_endpoint: metadata.authorization_endpoint().url().clone(),
        token_endpoint: metadata.token_endpoint().map(|t| t.url().clone()),
        userinfo_endpoint: metadata.userinfo_endpoint().map(|u| u.url().clone()),
        jwks_uri: metadata.jwks_uri().url().clone(),
        scopes_supported: strings("scopes_supported"),
        response_types_supported: strings("response_types_supported"),
        grant_types_supported: strings("grant_types_supported"),
        token_endpoint_auth_methods_supported: strings("token_endpoint_auth_methods_supported"),
        code_challenge_methods_supported: strings("code_challenge_methods_supported"),
        issuer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn discovery_document(issuer: &str) -> serde_json::Value {
        serde_json::json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/authorize"),
            "token_endpoint": format!("{issuer}/token"),
            "jwks_uri": format!("{issuer}/keys"),
            "response_types_supported": ["code"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256"],
            "scopes_supported": ["openid", "profile", "offline_access"],
            "grant_types_supported": ["authorization_code", "refresh_token"]
        })
    }

    async fn mock_provider() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(discovery_document(&server.uri())))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "keys": [{
                    "kty": "oct",
                    "kid": "k1",
                    "k": "d2F5cG9pbnQtdGVzdC1zaWduaW5nLWtleQ"
                }]
            })))
            .mount(&server)
            .await;
        server
    }

    fn http_client() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("client")
    }

    fn client_for(server: &MockServer) -> OAuth2Client {
        OAuth2Client::new(
            "admin".to_string(),
            "s3cret".to_string(),
            vec!["openid".to_string(), "offline_access".to_string()],
            Url::parse("https://admin.example.com/callback").expect("url"),
            Url::parse(&format!("{}/authorize", server.uri())).expect("url"),
            Some(Url::parse(&format!("{}/token", server.uri())).expect("url")),
        )
    }

    fn auth_state() -> AuthStateCookie {
        AuthStateCookie {
            csrf_token: "state".to_string(),
            pkce_verifier: "verifier".to_string(),
            nonce: "nonce".to_string(),
            redirect_to: "/".to_string(),
        }
    }

    #[tokio::test]
    async fn signing_keys_come_from_discovery() {
        let server = mock_provider().await;

        let provider = OidcProvider::discover(&server.uri(), http_client(), Duration::from_secs(5))
            .await
            .expect("discovery");

        let keys = provider.signing_keys();
        assert_eq!(keys.keys.len(), 1);
        assert!(keys.find("k1").is_some());
    }

    #[tokio::test]
    async fn discovery_fails_without_a_key_set() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(discovery_document(&server.uri())))
            .mount(&server)
            .await;

        let result =
            OidcProvider::discover(&server.uri(), http_client(), Duration::from_secs(5)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn discovery_reads_endpoints() {
        let server = mock_provider().await;

        let provider = OidcProvider::discover(&server.uri(), http_client(), Duration::from_secs(5))
            .await
            .expect("discovery");

        let endpoints = provider.endpoints();
        assert_eq!(endpoints.issuer, server.uri());
        assert_eq!(
            endpoints.discovery_url.as_str(),
            format!("{}/.well-known/openid-configuration", server.uri())
        );
        assert_eq!(
            endpoints.jwks_uri.as_str(),
            format!("{}/keys", server.uri())
        );
        assert_eq!(endpoints.response_types_supported, vec!["code"]);
        assert!(endpoints.scopes_supported.contains(&"offline_access".to_string()));
    }

    #[tokio::test]
    async fn discovery_of_unreachable_issuer_fails() {
        let err = OidcProvider::discover(
            "http://127.0.0.1:1",
            http_client(),
            Duration::from_secs(5),
        )
        .await
        .expect_err("unreachable issuer");

        assert!(err.current_context().is_unavailable());
    }

    #[tokio::test]
    async fn discovery_rejects_malformed_issuer() {
        let err = OidcProvider::discover("not a url", http_client(), Duration::from_secs(5))
            .await
            .expect_err("malformed issuer");

        assert!(matches!(
            err.current_context(),
            ProviderError::Configuration { .. }
        ));
    }

    #[tokio::test]
    async fn authorization_url_carries_redirect_state_and_pkce() {
        let server = mock_provider().await;
        let provider = OidcProvider::discover(&server.uri(), http_client(), Duration::from_secs(5))
            .await
            .expect("discovery");

        let (url, state) = provider
            .authorization_url(&client_for(&server), "/console".to_string())
            .expect("authorization url");

        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params.get("client_id").map(String::as_str), Some("admin"));
        assert_eq!(
            params.get("redirect_uri").map(String::as_str),
            Some("https://admin.example.com/callback")
        );
        assert_eq!(params.get("state"), Some(&state.csrf_token));
        assert_eq!(params.get("nonce"), Some(&state.nonce));
        assert_eq!(params.get("code_challenge_method").map(String::as_str), Some("S256"));
        assert_eq!(
            params.get("scope").map(String::as_str),
            Some("openid offline_access")
        );
        assert_eq!(state.redirect_to, "/console");
        assert!(!state.pkce_verifier.is_empty());
    }

    #[tokio::test]
    async fn code_exchange_returns_tokens() {
        let server = mock_provider().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("code=the-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at",
                "token_type": "Bearer",
                "refresh_token": "rt",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let provider = OidcProvider::discover(&server.uri(), http_client(), Duration::from_secs(5))
            .await
            .expect("discovery");

        let tokens = provider
            .exchange_code(&client_for(&server), "the-code", &auth_state())
            .await
            .expect("exchange");

        assert_eq!(tokens.access_token, "at");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt"));
        assert_eq!(tokens.id_token, None);
        assert_eq!(tokens.expires_in, Some(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn rejected_refresh_is_not_unavailability() {
        let server = mock_provider().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;

        let provider = OidcProvider::discover(&server.uri(), http_client(), Duration::from_secs(5))
            .await
            .expect("discovery");

        let err = provider
            .refresh_token(&client_for(&server), "revoked")
            .await
            .expect_err("refresh should be rejected");

        assert!(matches!(err.current_context(), ProviderError::Rejected { .. }));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = mock_provider().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(5))
                    .set_body_json(serde_json::json!({
                        "access_token": "at",
                        "token_type": "Bearer"
                    })),
            )
            .mount(&server)
            .await;

        let provider =
            OidcProvider::discover(&server.uri(), http_client(), Duration::from_millis(200))
                .await
                .expect("discovery");

        let err = provider
            .exchange_code(&client_for(&server), "code", &auth_state())
            .await
            .expect_err("should time out");

        assert_eq!(err.current_context(), &ProviderError::Timeout);
    }
}
