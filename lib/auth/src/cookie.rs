//! Tamper-evident, encrypted session cookies.
//!
//! A cookie value is `body.timestamp.mac` where
//! - `body` is `base64url(nonce || AES-256-GCM(json))`, with the cookie name as
//!   associated data so a value cannot be replayed under another name,
//! - `timestamp` is the Unix time the value was produced,
//! - `mac` is `base64url(HMAC-SHA256(hash_key, name|timestamp|body))`.
//!
//! Keys are fixed at construction; rotating them invalidates every
//! outstanding cookie and requires a restart.

use crate::error::CookieError;
use aes_gcm::Aes256Gcm;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rootcause::prelude::Report;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Minimum accepted HMAC key length in bytes.
const MIN_HASH_KEY_LEN: usize = 32;

/// AES-256 key length in bytes.
const BLOCK_KEY_LEN: usize = 32;

/// Timestamps this far in the future are still accepted.
const CLOCK_SKEW_SECONDS: i64 = 60;

/// Default signing window.
const DEFAULT_MAX_AGE_DAYS: i64 = 30;

/// Largest `name=value` pair browsers reliably store.
pub const MAX_COOKIE_SIZE: usize = 4096;

/// Signs and encrypts values into cookie strings and back.
#[derive(Clone)]
pub struct CookieManager {
    mac: HmacSha256,
    cipher: Aes256Gcm,
    max_age: Duration,
}

impl std::fmt::Debug for CookieManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieManager")
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl CookieManager {
    /// Creates a cookie manager from base64-encoded hash and block keys.
    ///
    /// # Errors
    ///
    /// Returns `CookieError::InvalidKey` if either key is not valid base64,
    /// the hash key is shorter than 32 bytes, or the block key is not 32 bytes.
    pub fn new(
        hash_key_base64: &str,
        block_key_base64: &str,
    ) -> Result<Self, Report<CookieError>> {
        let hash_key = decode_key("hash", hash_key_base64)?;
        let block_key = decode_key("block", block_key_base64)?;

        if hash_key.len() < MIN_HASH_KEY_LEN {
            return Err(CookieError::InvalidKey {
                reason: format!(
                    "hash key must be at least {MIN_HASH_KEY_LEN} bytes, got {}",
                    hash_key.len()
                ),
            }
            .into());
        }

        if block_key.len() != BLOCK_KEY_LEN {
            return Err(CookieError::InvalidKey {
                reason: format!(
                    "block key must be {BLOCK_KEY_LEN} bytes, got {}",
                    block_key.len()
                ),
            }
            .into());
        }

        let mac = <HmacSha256 as Mac>::new_from_slice(&hash_key).map_err(|e| {
            CookieError::InvalidKey {
                reason: e.to_string(),
            }
        })?;
        let cipher = <Aes256Gcm as KeyInit>::new_from_slice(&block_key).map_err(|e| {
            CookieError::InvalidKey {
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            mac,
            cipher,
            max_age: Duration::days(DEFAULT_MAX_AGE_DAYS),
        })
    }

    /// Sets how long an encoded value stays acceptable.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Returns the signing window.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Serializes, encrypts and signs `value` for the cookie `name`.
    ///
    /// # Errors
    ///
    /// Returns `CookieError::Encode` if the value cannot be serialized, or if
    /// the resulting cookie would exceed [`MAX_COOKIE_SIZE`].
    pub fn encode<T: Serialize>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<String, Report<CookieError>> {
        let plaintext = serde_json::to_vec(value).map_err(|e| CookieError::Encode {
            reason: e.to_string(),
        })?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: &plaintext,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| CookieError::Encode {
                reason: "encryption failed".to_string(),
            })?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        let body = URL_SAFE_NO_PAD.encode(sealed);
        let timestamp = Utc::now().timestamp();
        let signature = URL_SAFE_NO_PAD.encode(self.sign(name, timestamp, &body));

        let value = format!("{body}.{timestamp}.{signature}");
        let size = name.len() + 1 + value.len();
        if size > MAX_COOKIE_SIZE {
            return Err(CookieError::Encode {
                reason: format!(
                    "cookie '{name}' is {size} bytes, over the {MAX_COOKIE_SIZE} byte limit"
                ),
            }
            .into());
        }
        Ok(value)
    }

    /// Verifies, decrypts and deserializes a cookie value produced by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Fails on a malformed layout, a signature mismatch, a timestamp outside
    /// the signing window, a decryption failure, or an unexpected payload.
    pub fn decode<T: DeserializeOwned>(
        &self,
        name: &str,
        cookie: &str,
    ) -> Result<T, Report<CookieError>> {
        let mut parts = cookie.splitn(3, '.');
        let (Some(body), Some(timestamp), Some(signature)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed("expected three segments"));
        };

        let timestamp: i64 = timestamp
            .parse()
            .map_err(|_| malformed("timestamp is not an integer"))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| malformed("signature is not base64"))?;

        let mut mac = self.mac.clone();
        mac.update(&signing_input(name, timestamp, body));
        mac.verify_slice(&signature)
            .map_err(|_| CookieError::SignatureMismatch)?;

        let now = Utc::now().timestamp();
        if timestamp < now - self.max_age.num_seconds() || timestamp > now + CLOCK_SKEW_SECONDS {
            return Err(CookieError::Expired.into());
        }

        let sealed = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| malformed("body is not base64"))?;
        if sealed.len() < NONCE_LEN {
            return Err(malformed("body too short"));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(
                aes_gcm::aead::Nonce::<Aes256Gcm>::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: name.as_bytes(),
                },
            )
            .map_err(|_| CookieError::Decryption)?;

        serde_json::from_slice(&plaintext).map_err(|e| malformed(&e.to_string()))
    }

    /// Builds a cookie carrying an encoded value.
    ///
    /// Cookies are always `HttpOnly` and `SameSite=Lax`; `Secure` follows the
    /// effective scheme of the request.
    #[must_use]
    pub fn build_cookie(
        name: &'static str,
        value: String,
        secure: bool,
        max_age: time::Duration,
    ) -> Cookie<'static> {
        Cookie::build((name, value))
            .path("/")
            .http_only(true)
            .secure(secure)
            .same_site(SameSite::Lax)
            .max_age(max_age)
            .build()
    }

    /// Builds an expired, empty cookie that makes the browser drop `name`.
    #[must_use]
    pub fn removal_cookie(name: &'static str) -> Cookie<'static> {
        Cookie::build((name, ""))
            .path("/")
            .http_only(true)
            .max_age(time::Duration::ZERO)
            .build()
    }

    fn sign(&self, name: &str, timestamp: i64, body: &str) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(&signing_input(name, timestamp, body));
        mac.finalize().into_bytes().to_vec()
    }
}

fn decode_key(kind: &str, encoded: &str) -> Result<Vec<u8>, Report<CookieError>> {
    STANDARD.decode(encoded.trim()).map_err(|e| {
        CookieError::InvalidKey {
            reason: format!("{kind} key is not valid base64: {e}"),
        }
        .into()
    })
}

fn signing_input(name: &str, timestamp: i64, body: &str) -> Vec<u8> {
    format!("{name}|{timestamp}|{body}").into_bytes()
}

fn malformed(reason: &str) -> Report<CookieError> {
    CookieError::Malformed {
        reason: reason.to_string(),
    }
    .into()
}
