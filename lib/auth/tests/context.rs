//! Authentication context construction against a stand-in identity provider.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use url::Url;
use waypoint_auth::{
    AuthConfig, AuthPlugins, AuthenticationContext, OpenIdOptions, ResourceServer, SetupError,
    StaticSecretProvider, UserAuthConfig,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SIGNING_KEY: &[u8] = b"waypoint-test-signing-key-0123456789";

fn key(byte: u8) -> String {
    STANDARD.encode([byte; 32])
}

fn secrets() -> StaticSecretProvider {
    StaticSecretProvider::new()
        .with_secret("cookie_hash_key", key(1))
        .with_secret("cookie_block_key", key(2))
        .with_secret("oidc_client_secret", "s3cret\n")
}

fn config(issuer: &str) -> AuthConfig {
    AuthConfig {
        http_public_uri: "https://admin.example.com".to_string(),
        user_auth: UserAuthConfig::new(OpenIdOptions::new(
            issuer.to_string(),
            "admin".to_string(),
        )),
        app_auth: Default::default(),
    }
}

async fn identity_provider() -> MockServer {
    let server = MockServer::start().await;
    let issuer = server.uri();

    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/authorize"),
            "token_endpoint": format!("{issuer}/token"),
            "jwks_uri": format!("{issuer}/keys"),
            "response_types_supported": ["code"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256"]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "keys": [{
                "kty": "oct",
                "kid": "k1",
                "k": URL_SAFE_NO_PAD.encode(SIGNING_KEY)
            }]
        })))
        // Discovery reads the key set; nothing else may fetch it again.
        .expect(1)
        .mount(&server)
        .await;

    server
}

#[tokio::test]
async fn builds_context_from_discovered_provider() {
    let server = identity_provider().await;

    let context = AuthenticationContext::new(&secrets(), config(&server.uri()), AuthPlugins::default())
        .await
        .expect("context");

    let client = context.oauth2_client(None);
    assert_eq!(client.redirect_url().as_str(), "https://admin.example.com/callback");
    assert_eq!(client.client_id(), "admin");
    assert_eq!(client.client_secret(), "s3cret");
    assert_eq!(
        client.authorization_endpoint().as_str(),
        format!("{}/authorize", server.uri())
    );

    assert_eq!(
        context.oauth2_metadata_url().as_str(),
        "https://admin.example.com/oauth2/metadata"
    );
    assert_eq!(
        context.oidc_metadata_url().as_str(),
        "https://admin.example.com/.well-known/openid-configuration"
    );
    assert_eq!(context.identity_provider().endpoints().issuer, server.uri());

    let other_host = Url::parse("https://b.example/login").expect("url");
    assert_eq!(
        context.oauth2_client(Some(&other_host)).redirect_url().as_str(),
        "https://b.example/callback"
    );
}

#[tokio::test]
async fn bearer_tokens_validate_against_discovered_keys() {
    let server = identity_provider().await;

    let context = AuthenticationContext::new(&secrets(), config(&server.uri()), AuthPlugins::default())
        .await
        .expect("context");

    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("k1".to_string());
    let claims = serde_json::json!({
        "sub": "service-account",
        "iss": server.uri(),
        "exp": (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp(),
    });
    let token = jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(SIGNING_KEY))
        .expect("token");

    let identity = context
        .resource_server()
        .validate_access_token(&token)
        .await
        .expect("valid token");
    assert_eq!(identity.subject(), "service-account");
}

#[tokio::test]
async fn cookie_max_age_out_of_range_aborts_setup() {
    for hours in [0, -24, i64::MAX] {
        let mut config = config("http://127.0.0.1:1");
        config.user_auth.cookie_max_age_hours = hours;

        let err = AuthenticationContext::new(&secrets(), config, AuthPlugins::default())
            .await
            .expect_err("invalid max age");

        assert!(matches!(
            err.current_context(),
            SetupError::AuthContextSetup { reason } if reason.contains("cookie max age")
        ));
    }
}

#[tokio::test]
async fn missing_cookie_key_is_a_config_read_failure() {
    let secrets = StaticSecretProvider::new().with_secret("cookie_block_key", key(2));

    let err = AuthenticationContext::new(
        &secrets,
        config("http://127.0.0.1:1"),
        AuthPlugins::default(),
    )
    .await
    .expect_err("missing hash key");

    assert_eq!(err.current_context().code(), SetupError::CONFIG_FILE_READ_CODE);
    assert_eq!(
        err.current_context(),
        &SetupError::ConfigFileRead {
            secret: "cookie_hash_key".to_string()
        }
    );
}

#[tokio::test]
async fn malformed_cookie_key_is_a_setup_failure() {
    let secrets = StaticSecretProvider::new()
        .with_secret("cookie_hash_key", key(1))
        .with_secret("cookie_block_key", STANDARD.encode([2u8; 16]));

    let err = AuthenticationContext::new(
        &secrets,
        config("http://127.0.0.1:1"),
        AuthPlugins::default(),
    )
    .await
    .expect_err("short block key");

    assert_eq!(err.current_context().code(), SetupError::AUTH_CONTEXT_SETUP_CODE);
}

#[tokio::test]
async fn unreachable_issuer_aborts_setup() {
    let err = AuthenticationContext::new(
        &secrets(),
        config("http://127.0.0.1:1"),
        AuthPlugins::default(),
    )
    .await
    .expect_err("unreachable issuer");

    assert_eq!(err.current_context().code(), SetupError::AUTH_CONTEXT_SETUP_CODE);
}

#[tokio::test]
async fn missing_client_secret_is_a_config_read_failure() {
    let server = identity_provider().await;
    let secrets = StaticSecretProvider::new()
        .with_secret("cookie_hash_key", key(1))
        .with_secret("cookie_block_key", key(2));

    let err = AuthenticationContext::new(&secrets, config(&server.uri()), AuthPlugins::default())
        .await
        .expect_err("missing client secret");

    assert_eq!(
        err.current_context(),
        &SetupError::ConfigFileRead {
            secret: "oidc_client_secret".to_string()
        }
    );
}

/// Discouraged legacy path: the client secret read from a plaintext file.
/// Kept only for existing deployments; new ones use the secret provider.
#[tokio::test]
async fn deprecated_client_secret_file_is_still_honored() {
    let server = identity_provider().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("client_secret");
    std::fs::write(&file, "legacy-secret\n").expect("write");

    let mut config = config(&server.uri());
    config.user_auth.open_id = OpenIdOptions::new(server.uri(), "admin".to_string())
        .with_deprecated_client_secret_file(Some(file.to_string_lossy().into_owned()));

    // The secret provider's value must be ignored when the file is set.
    let context = AuthenticationContext::new(&secrets(), config, AuthPlugins::default())
        .await
        .expect("context");

    assert_eq!(context.oauth2_client(None).client_secret(), "legacy-secret");
}

#[tokio::test]
async fn missing_deprecated_client_secret_file_aborts_setup() {
    let server = identity_provider().await;

    let mut config = config(&server.uri());
    config.user_auth.open_id = OpenIdOptions::new(server.uri(), "admin".to_string())
        .with_deprecated_client_secret_file(Some("/nonexistent/client_secret".to_string()));

    let err = AuthenticationContext::new(&secrets(), config, AuthPlugins::default())
        .await
        .expect_err("missing file");

    assert_eq!(err.current_context().code(), SetupError::CONFIG_FILE_READ_CODE);
}
