//! Authentication middleware and extractors.
//!
//! This module provides extractors for:
//! - `AuthUser` - End-user authentication via identity-provider JWT
//! - `SweepAuth` - Scheduler authentication via shared secret
//!
//! The JWKS cache is owned by `AppState` and injected, never held in a
//! process-global.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use arkiv_billing_core::AccountId;

use crate::crypto::constant_time_eq;
use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Constants
// ============================================================================

/// How long to cache JWKS keys before refreshing.
const JWKS_CACHE_DURATION: Duration = Duration::from_secs(3600); // 1 hour

/// Timeout for JWKS fetch requests.
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// An authenticated account extracted from an identity-provider JWT.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The account ID.
    pub account_id: AccountId,
    /// The raw subject claim from the JWT.
    pub subject: String,
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 Arc<AppState>,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Self, Self::Rejection>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            // Extract the Authorization header
            let auth_header = parts
                .headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .ok_or(ApiError::Unauthorized)?;

            // Extract the Bearer token
            let token = auth_header
                .strip_prefix("Bearer ")
                .ok_or(ApiError::Unauthorized)?;

            // Allow test tokens in testing only.
            // This bypass is gated behind #[cfg(test)] or the "test-auth"
            // feature so it is never active in production builds.
            #[cfg(any(test, feature = "test-auth"))]
            if let Some(account_id_str) = token.strip_prefix("test-token:") {
                let account_id = account_id_str
                    .parse::<AccountId>()
                    .map_err(|_| ApiError::Unauthorized)?;

                return Ok(AuthUser {
                    account_id,
                    subject: account_id_str.to_string(),
                });
            }

            // Validate JWT against JWKS
            let claims = validate_jwt(token, state).await?;

            let account_id = claims
                .sub
                .parse::<AccountId>()
                .map_err(|_| ApiError::Unauthorized)?;

            Ok(AuthUser {
                account_id,
                subject: claims.sub,
            })
        })
    }
}

/// Scheduler authentication for the cancellation sweep.
///
/// The scheduler presents a shared secret in the `x-sweep-secret` header.
/// Missing configuration, a missing header, or a mismatch all reject with
/// 401 before any side effect.
#[derive(Debug, Clone)]
pub struct SweepAuth;

impl FromRequestParts<Arc<AppState>> for SweepAuth {
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        state: &'life1 Arc<AppState>,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Self, Self::Rejection>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            let presented = parts
                .headers
                .get("x-sweep-secret")
                .and_then(|v| v.to_str().ok())
                .ok_or(ApiError::Unauthorized)?;

            let expected = state
                .config
                .sweep_secret
                .as_ref()
                .ok_or(ApiError::Unauthorized)?;

            if !constant_time_eq(presented, expected) {
                return Err(ApiError::Unauthorized);
            }

            Ok(SweepAuth)
        })
    }
}

/// JWT claims structure for identity-provider tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (account ID).
    pub sub: String,
    /// Audience (can be string or array).
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    /// Issuer.
    pub iss: String,
    /// Expiration time.
    pub exp: i64,
    /// Issued at.
    pub iat: i64,
}

// ============================================================================
// JWKS Cache and JWT Validation
// ============================================================================

/// JWKS (JSON Web Key Set) response structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwks {
    /// List of JWK keys.
    pub keys: Vec<Jwk>,
}

/// Single JSON Web Key.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA").
    pub kty: String,
    /// Key ID.
    pub kid: Option<String>,
    /// Algorithm (e.g., "RS256").
    pub alg: Option<String>,
    /// RSA public key modulus (base64url encoded).
    pub n: Option<String>,
    /// RSA public key exponent (base64url encoded).
    pub e: Option<String>,
    /// Key use (e.g., "sig" for signature).
    #[serde(rename = "use")]
    pub key_use: Option<String>,
}

/// Cached JWKS keys plus the HTTP client used to refresh them.
///
/// One instance lives in `AppState`; the client is reused across fetches
/// for connection pooling.
pub struct JwksCache {
    client: reqwest::Client,
    inner: RwLock<JwksCacheInner>,
}

struct JwksCacheInner {
    /// Cached keys mapped by kid.
    keys: HashMap<String, DecodingKey>,
    /// Default key (for tokens without kid).
    default_key: Option<DecodingKey>,
    /// When the cache was last updated.
    last_updated: Instant,
}

impl JwksCache {
    /// Create an empty cache whose first lookup forces a fetch.
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(JWKS_FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            inner: RwLock::new(JwksCacheInner {
                keys: HashMap::new(),
                default_key: None,
                // Force initial fetch by backdating the last update
                last_updated: Instant::now()
                    .checked_sub(JWKS_CACHE_DURATION)
                    .unwrap_or_else(Instant::now),
            }),
        }
    }

    /// Get a decoding key from the cache, refreshing from `jwks_url` when
    /// expired or missing.
    async fn decoding_key(
        &self,
        kid: Option<&str>,
        jwks_url: &str,
    ) -> Result<DecodingKey, ApiError> {
        // Check cache first
        {
            let cache = self.inner.read().await;
            if cache.last_updated.elapsed() < JWKS_CACHE_DURATION {
                if let Some(kid) = kid {
                    if let Some(key) = cache.keys.get(kid) {
                        return Ok(key.clone());
                    }
                } else if let Some(key) = &cache.default_key {
                    return Ok(key.clone());
                }
            }
        }

        // Cache miss or expired - fetch JWKS
        let jwks = self.fetch(jwks_url).await?;

        let mut cache = self.inner.write().await;
        cache.keys.clear();
        cache.default_key = None;
        cache.last_updated = Instant::now();

        for jwk in &jwks.keys {
            if let Some(decoding_key) = jwk_to_decoding_key(jwk) {
                if let Some(ref key_kid) = jwk.kid {
                    cache.keys.insert(key_kid.clone(), decoding_key.clone());
                }
                // Set first key as default
                if cache.default_key.is_none() {
                    cache.default_key = Some(decoding_key);
                }
            }
        }

        if let Some(kid) = kid {
            cache.keys.get(kid).cloned().ok_or(ApiError::Unauthorized)
        } else {
            cache.default_key.clone().ok_or(ApiError::Unauthorized)
        }
    }

    /// Fetch JWKS from the auth provider.
    async fn fetch(&self, jwks_url: &str) -> Result<Jwks, ApiError> {
        tracing::debug!(url = %jwks_url, "Fetching JWKS");

        let response = self.client.get(jwks_url).send().await.map_err(|e| {
            tracing::error!(error = %e, url = %jwks_url, "Failed to fetch JWKS");
            ApiError::ExternalService("Failed to fetch authentication keys".into())
        })?;

        if !response.status().is_success() {
            tracing::error!(
                status = %response.status(),
                url = %jwks_url,
                "JWKS fetch returned non-success status"
            );
            return Err(ApiError::ExternalService(
                "Failed to fetch authentication keys".into(),
            ));
        }

        let jwks: Jwks = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to parse JWKS response");
            ApiError::ExternalService("Failed to parse authentication keys".into())
        })?;

        tracing::info!(keys_count = %jwks.keys.len(), "JWKS fetched successfully");

        Ok(jwks)
    }
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a JWT token against the JWKS.
async fn validate_jwt(token: &str, state: &AppState) -> Result<JwtClaims, ApiError> {
    // Decode the header to get the key ID
    let header = decode_header(token).map_err(|e| {
        tracing::debug!(error = %e, "Failed to decode JWT header");
        ApiError::Unauthorized
    })?;

    let jwks_url = format!("{}/.well-known/jwks.json", state.config.auth_base_url);
    let decoding_key = state
        .jwks
        .decoding_key(header.kid.as_deref(), &jwks_url)
        .await?;

    // Set up validation
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[&state.config.auth_audience]);
    validation.set_issuer(&[&state.config.auth_base_url]);

    // Decode and validate the token
    let token_data = decode::<JwtClaims>(token, &decoding_key, &validation).map_err(|e| {
        tracing::debug!(error = %e, "JWT validation failed");
        ApiError::Unauthorized
    })?;

    Ok(token_data.claims)
}

/// Convert a JWK to a `DecodingKey`.
fn jwk_to_decoding_key(jwk: &Jwk) -> Option<DecodingKey> {
    // Only RSA keys are supported
    if jwk.kty != "RSA" {
        tracing::debug!(kty = %jwk.kty, "Skipping non-RSA JWK");
        return None;
    }

    let n = jwk.n.as_ref()?;
    let e = jwk.e.as_ref()?;

    DecodingKey::from_rsa_components(n, e).ok()
}
