//! Bearer token validation for machine clients.

use crate::error::AuthenticationError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use rootcause::prelude::Report;
use serde::Deserialize;
use waypoint_core::IdentityContext;

/// Validates access tokens and resolves the caller's identity.
#[async_trait]
pub trait ResourceServer: Send + Sync {
    /// Validates `token` (signature, expiry, issuer, audience).
    async fn validate_access_token(
        &self,
        token: &str,
    ) -> Result<IdentityContext, Report<AuthenticationError>>;
}

/// Validates JWT access tokens against the provider's JSON Web Key Set.
///
/// The key set is the one read during provider discovery; a provider key
/// rotation requires a restart.
#[derive(Debug, Clone)]
pub struct JwksResourceServer {
    keys: JwkSet,
    issuer: String,
    audiences: Vec<String>,
}

/// Claims read from an access token.
#[derive(Debug, Deserialize)]
struct AccessTokenClaims {
    sub: String,
    iss: String,
    #[serde(default)]
    aud: Option<OneOrMany>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    scp: Option<OneOrMany>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    cid: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }
}

impl JwksResourceServer {
    /// Creates a validator over an already-loaded key set.
    #[must_use]
    pub fn new(keys: JwkSet, issuer: String, audiences: Vec<String>) -> Self {
        Self {
            keys,
            issuer,
            audiences,
        }
    }

    fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, AuthenticationError> {
        let jwk = match kid {
            Some(kid) => self.keys.find(kid),
            // Without a key ID only an unambiguous key set can be used.
            None if self.keys.keys.len() == 1 => self.keys.keys.first(),
            None => None,
        }
        .ok_or_else(|| AuthenticationError::InvalidToken {
            reason: format!("no signing key matches kid {kid:?}"),
        })?;

        DecodingKey::from_jwk(jwk).map_err(|e| AuthenticationError::InvalidToken {
            reason: format!("unusable signing key: {e}"),
        })
    }
}

#[async_trait]
impl ResourceServer for JwksResourceServer {
    async fn validate_access_token(
        &self,
        token: &str,
    ) -> Result<IdentityContext, Report<AuthenticationError>> {
        let header = decode_header(token).map_err(|e| AuthenticationError::InvalidToken {
            reason: format!("malformed token header: {e}"),
        })?;

        let key = self.decoding_key(header.kid.as_deref())?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.issuer]);
        if self.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.audiences);
        }

        let data = decode::<AccessTokenClaims>(token, &key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    AuthenticationError::TokenExpired
                }
                _ => AuthenticationError::InvalidToken {
                    reason: e.to_string(),
                },
            }
        })?;

        Ok(identity_from_claims(data.claims))
    }
}

fn identity_from_claims(claims: AccessTokenClaims) -> IdentityContext {
    let mut scopes = claims.scp.map(OneOrMany::into_vec).unwrap_or_default();
    if let Some(scope) = claims.scope {
        scopes.extend(scope.split_whitespace().map(str::to_string));
    }
    // Some providers put every scope in one space-separated scp entry.
    let scopes = scopes
        .iter()
        .flat_map(|s| s.split_whitespace())
        .map(str::to_string)
        .collect();

    IdentityContext::new(claims.sub, claims.iss)
        .with_audience(claims.aud.map(OneOrMany::into_vec).unwrap_or_default())
        .with_scopes(scopes)
        .with_client_id(claims.client_id.or(claims.cid))
        .with_email(claims.email)
        .with_name(claims.name.or(claims.preferred_username))
        .with_expires_at(
            claims
                .exp
                .and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0)),
        )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};

    pub(crate) const ISSUER: &str = "https://idp.example.com";
    pub(crate) const SIGNING_SECRET: &[u8] = b"waypoint-test-signing-key-0123456789";

    pub(crate) fn key_set() -> JwkSet {
        serde_json::from_value(serde_json::json!({
            "keys": [{
                "kty": "oct",
                "kid": "k1",
                "alg": "HS256",
                "k": URL_SAFE_NO_PAD.encode(SIGNING_SECRET)
            }]
        }))
        .expect("key set")
    }

    pub(crate) fn mint(claims: serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("k1".to_string());
        encode(&header, &claims, &EncodingKey::from_secret(SIGNING_SECRET)).expect("token")
    }

    pub(crate) fn valid_claims() -> serde_json::Value {
        serde_json::json!({
            "sub": "svc-scheduler",
            "iss": ISSUER,
            "aud": "https://admin.example.com",
            "exp": (Utc::now() + chrono::Duration::hours(1)).timestamp(),
            "scp": ["all", "offline"],
            "cid": "scheduler"
        })
    }

    pub(crate) fn server() -> JwksResourceServer {
        JwksResourceServer::new(
            key_set(),
            ISSUER.to_string(),
            vec!["https://admin.example.com".to_string()],
        )
    }

    #[tokio::test]
    async fn valid_token_resolves_identity() {
        let identity = server()
            .validate_access_token(&mint(valid_claims()))
            .await
            .expect("valid token");

        assert_eq!(identity.subject(), "svc-scheduler");
        assert_eq!(identity.issuer(), ISSUER);
        assert_eq!(identity.client_id(), Some("scheduler"));
        assert!(identity.has_scope("offline"));
        assert_eq!(identity.audience(), ["https://admin.example.com".to_string()]);
        assert!(identity.expires_at().is_some());
    }

    #[tokio::test]
    async fn expired_token_is_reported_as_expired() {
        let mut claims = valid_claims();
        claims["exp"] = serde_json::json!((Utc::now() - chrono::Duration::hours(1)).timestamp());

        let err = server()
            .validate_access_token(&mint(claims))
            .await
            .expect_err("expired");
        assert_eq!(err.current_context(), &AuthenticationError::TokenExpired);
    }

    #[tokio::test]
    async fn wrong_issuer_or_audience_is_rejected() {
        let mut claims = valid_claims();
        claims["iss"] = serde_json::json!("https://evil.example.com");
        assert!(server().validate_access_token(&mint(claims)).await.is_err());

        let mut claims = valid_claims();
        claims["aud"] = serde_json::json!("someone-else");
        assert!(server().validate_access_token(&mint(claims)).await.is_err());
    }

    #[tokio::test]
    async fn empty_audience_list_skips_audience_check() {
        let server = JwksResourceServer::new(key_set(), ISSUER.to_string(), Vec::new());
        let mut claims = valid_claims();
        claims["aud"] = serde_json::json!("anything");

        assert!(server.validate_access_token(&mint(claims)).await.is_ok());
    }

    #[tokio::test]
    async fn token_signed_with_other_key_is_rejected() {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("k1".to_string());
        let token = encode(
            &header,
            &valid_claims(),
            &EncodingKey::from_secret(b"another-secret-another-secret-!!"),
        )
        .expect("token");

        let err = server()
            .validate_access_token(&token)
            .await
            .expect_err("bad signature");
        assert!(matches!(
            err.current_context(),
            AuthenticationError::InvalidToken { .. }
        ));
    }

    #[tokio::test]
    async fn unknown_kid_and_garbage_are_rejected() {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("k2".to_string());
        let token = encode(
            &header,
            &valid_claims(),
            &EncodingKey::from_secret(SIGNING_SECRET),
        )
        .expect("token");

        assert!(server().validate_access_token(&token).await.is_err());
        assert!(server().validate_access_token("not-a-jwt").await.is_err());
    }

    #[test]
    fn space_separated_scopes_are_split() {
        let claims: AccessTokenClaims = serde_json::from_value(serde_json::json!({
            "sub": "u",
            "iss": ISSUER,
            "scope": "openid profile",
            "scp": "all offline"
        }))
        .expect("claims");

        let identity = identity_from_claims(claims);
        assert_eq!(identity.scopes(), ["all", "offline", "openid", "profile"]);
    }
}
