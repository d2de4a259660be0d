//! Authentication and authorization.
//!
//! This module provides:
//! - `AuthUser` - resolves a bearer JWT to a verified identity plus the
//!   application role stored on the caller's profile
//! - `AdminUser` - `AuthUser` restricted to administrative roles
//! - `JwksCache` - the identity provider's signing keys, cached per process
//!
//! Symmetric tokens (`HS*`) are verified with the configured shared secret,
//! as are tokens whose header names no algorithm (treated as `HS256`).
//! Asymmetric tokens (`RS*`, `PS*`, `ES*`) are verified with the JWKS key
//! named by the token's `kid`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{DateTime, Duration, Utc};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{
    decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use ezri_core::{Clock, Role, UserId};

use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Constants
// ============================================================================

/// Timeout for JWKS fetch requests.
const JWKS_FETCH_TIMEOUT: StdDuration = StdDuration::from_secs(10);

/// Minimum age of the cached key set before an unknown `kid` may refetch it.
const JWKS_MIN_REFETCH_SECS: i64 = 10;

/// An authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user ID (token subject).
    pub user_id: UserId,
    /// Email claim, if the token carries one.
    pub email: Option<String>,
    /// The `role` claim as issued by the identity provider.
    pub token_role: Option<String>,
    /// Role stored on the caller's profile; `None` without a profile.
    pub app_role: Option<Role>,
    /// Permissions stored on the caller's profile.
    pub permissions: Vec<String>,
}

impl AuthUser {
    /// Check the caller's application role against `allowed`.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Forbidden` when the caller has no role or a role
    /// outside `allowed`.
    pub fn authorize(&self, allowed: &[Role]) -> Result<Role, ApiError> {
        let role = self
            .app_role
            .ok_or_else(|| ApiError::Forbidden("Access denied: No role assigned".into()))?;

        if allowed.contains(&role) {
            Ok(role)
        } else {
            let names: Vec<_> = allowed.iter().map(Role::as_str).collect();
            Err(ApiError::Forbidden(format!(
                "Access denied: Requires one of [{}] role",
                names.join(", ")
            )))
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        let claims = validate_jwt(token, state).await?;

        let user_id = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| ApiError::Unauthorized)?;

        let grant = load_role(state, &user_id).await?;

        Ok(AuthUser {
            user_id,
            email: claims.email,
            token_role: claims.role,
            app_role: grant.as_ref().map(|g| g.role),
            permissions: grant.map(|g| g.permissions).unwrap_or_default(),
        })
    }
}

/// An authenticated caller holding `super_admin` or `org_admin`.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        let role = user.authorize(Role::ADMINS)?;
        tracing::info!(user_id = %user.user_id, role = %role, "Admin authenticated");
        Ok(AdminUser(user))
    }
}

/// Role and permissions loaded from a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrant {
    /// Application role.
    pub role: Role,
    /// Permission strings.
    pub permissions: Vec<String>,
}

/// Look up the caller's stored role, through the role cache.
///
/// A caller without a profile has no role. A failed lookup fails the request.
async fn load_role(state: &AppState, user_id: &UserId) -> Result<Option<RoleGrant>, ApiError> {
    if let Some(grant) = state.roles.get(user_id).await {
        return Ok(Some(grant));
    }

    let profile = state.store.get_profile(user_id).await.map_err(|e| {
        tracing::error!(user_id = %user_id, error = %e, "Role lookup failed");
        ApiError::Internal(format!("role lookup failed: {e}"))
    })?;

    Ok(match profile {
        Some(profile) => {
            let grant = RoleGrant {
                role: profile.role,
                permissions: profile.permissions,
            };
            state.roles.insert(*user_id, grant.clone()).await;
            Some(grant)
        }
        None => None,
    })
}

/// JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID).
    pub sub: String,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Identity provider role.
    #[serde(default)]
    pub role: Option<String>,
    /// Expiration time.
    pub exp: i64,
}

/// Validate a JWT and return its claims.
async fn validate_jwt(token: &str, state: &AppState) -> Result<JwtClaims, ApiError> {
    if !header_names_alg(token) {
        return validate_unlabelled_jwt(token, state);
    }

    let header = decode_header(token).map_err(|e| {
        tracing::debug!(error = %e, "Failed to decode JWT header");
        ApiError::Unauthorized
    })?;

    let key = match header.alg {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            DecodingKey::from_secret(jwt_secret(state)?.as_bytes())
        }
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512
        | Algorithm::ES256
        | Algorithm::ES384 => state.jwks.key_for(header.kid.as_deref()).await?,
        Algorithm::EdDSA => {
            tracing::debug!("Unsupported JWT algorithm");
            return Err(ApiError::Unauthorized);
        }
    };

    decode_claims(token, &key, header.alg, state)
}

/// Verify `token` against `key` and check `exp`, plus `iss`/`aud` when
/// configured.
fn decode_claims(
    token: &str,
    key: &DecodingKey,
    alg: Algorithm,
    state: &AppState,
) -> Result<JwtClaims, ApiError> {
    let mut validation = Validation::new(alg);
    match &state.config.auth_audience {
        Some(aud) => validation.set_audience(&[aud]),
        None => validation.validate_aud = false,
    }
    if let Some(iss) = &state.config.auth_issuer {
        validation.set_issuer(&[iss]);
    }

    let token_data = decode::<JwtClaims>(token, key, &validation).map_err(|e| {
        tracing::debug!(error = %e, "JWT validation failed");
        ApiError::Unauthorized
    })?;

    Ok(token_data.claims)
}

fn jwt_secret(state: &AppState) -> Result<&str, ApiError> {
    state.config.jwt_secret.as_deref().ok_or_else(|| {
        tracing::debug!("Symmetric token received but no JWT secret configured");
        ApiError::Unauthorized
    })
}

/// Whether the JOSE header of `token` carries an `alg`. Headers that cannot
/// be read count as carrying one, so `decode_header` reports them.
fn header_names_alg(token: &str) -> bool {
    let Some((encoded, _)) = token.split_once('.') else {
        return true;
    };
    URL_SAFE_NO_PAD
        .decode(encoded)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok())
        .map_or(true, |header| {
            header.get("alg").is_some_and(|alg| !alg.is_null())
        })
}

/// Verify a token whose header names no algorithm as `HS256` with the
/// shared secret.
fn validate_unlabelled_jwt(token: &str, state: &AppState) -> Result<JwtClaims, ApiError> {
    let secret = jwt_secret(state)?;
    let key = DecodingKey::from_secret(secret.as_bytes());

    let (message, signature) = token.rsplit_once('.').ok_or(ApiError::Unauthorized)?;
    let verified =
        jsonwebtoken::crypto::verify(signature, message.as_bytes(), &key, Algorithm::HS256)
            .unwrap_or(false);
    if !verified {
        tracing::debug!("JWT without alg failed HS256 verification");
        return Err(ApiError::Unauthorized);
    }

    let claims: serde_json::Value = message
        .split_once('.')
        .and_then(|(_, payload)| URL_SAFE_NO_PAD.decode(payload).ok())
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .ok_or(ApiError::Unauthorized)?;

    // Re-issue under an explicit HS256 header so the usual claim checks run.
    let labelled = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("token re-encoding failed: {e}")))?;

    decode_claims(&labelled, &key, Algorithm::HS256, state)
}

// ============================================================================
// JWKS Cache
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
    /// Key type ("RSA" or "EC").
    pub kty: String,
    /// Key ID.
    pub kid: Option<String>,
    /// RSA modulus (base64url).
    pub n: Option<String>,
    /// RSA exponent (base64url).
    pub e: Option<String>,
    /// EC x coordinate (base64url).
    pub x: Option<String>,
    /// EC y coordinate (base64url).
    pub y: Option<String>,
}

impl Jwk {
    fn decoding_key(&self) -> Option<DecodingKey> {
        match self.kty.as_str() {
            "RSA" => DecodingKey::from_rsa_components(self.n.as_ref()?, self.e.as_ref()?).ok(),
            "EC" => DecodingKey::from_ec_components(self.x.as_ref()?, self.y.as_ref()?).ok(),
            other => {
                tracing::debug!(kty = %other, "Skipping unsupported JWK");
                None
            }
        }
    }
}

struct KeySet {
    by_kid: HashMap<String, DecodingKey>,
    default_key: Option<DecodingKey>,
    fetched_at: DateTime<Utc>,
}

/// The identity provider's signing keys.
///
/// Keys are trusted for `ttl` after a fetch. A `kid` that is not in the
/// cached set triggers one refetch before the token is rejected, at most
/// once per `JWKS_MIN_REFETCH_SECS`.
pub struct JwksCache {
    client: reqwest::Client,
    url: String,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    keys: RwLock<Option<KeySet>>,
}

impl JwksCache {
    /// Create an empty cache for the key set at `url`.
    #[must_use]
    pub fn new(url: impl Into<String>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(JWKS_FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            url: url.into(),
            ttl,
            clock,
            keys: RwLock::new(None),
        }
    }

    /// The key for `kid`, or the first usable key when the token has no `kid`.
    ///
    /// An unknown `kid` refetches the key set only once the cached set is at
    /// least `JWKS_MIN_REFETCH_SECS` old.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Unauthorized` if the key set cannot be fetched or
    /// holds no matching key.
    pub async fn key_for(&self, kid: Option<&str>) -> Result<DecodingKey, ApiError> {
        {
            let keys = self.keys.read().await;
            if let Some(set) = keys.as_ref() {
                let age = self.clock.now() - set.fetched_at;
                if age < self.ttl {
                    if let Some(key) = lookup(set, kid) {
                        return Ok(key);
                    }
                    if age < Duration::seconds(JWKS_MIN_REFETCH_SECS) {
                        tracing::debug!(kid = ?kid, "Unknown kid; key set fetched too recently");
                        return Err(ApiError::Unauthorized);
                    }
                }
            }
        }

        let jwks = self.fetch().await?;

        let mut set = KeySet {
            by_kid: HashMap::new(),
            default_key: None,
            fetched_at: self.clock.now(),
        };
        for jwk in &jwks.keys {
            if let Some(key) = jwk.decoding_key() {
                if let Some(key_kid) = &jwk.kid {
                    set.by_kid.insert(key_kid.clone(), key.clone());
                }
                if set.default_key.is_none() {
                    set.default_key = Some(key);
                }
            }
        }

        let found = lookup(&set, kid);
        *self.keys.write().await = Some(set);

        found.ok_or_else(|| {
            tracing::debug!(kid = ?kid, "No JWKS key matches token");
            ApiError::Unauthorized
        })
    }

    async fn fetch(&self) -> Result<Jwks, ApiError> {
        tracing::debug!(url = %self.url, "Fetching JWKS");

        let response = self.client.get(&self.url).send().await.map_err(|e| {
            tracing::error!(error = %e, url = %self.url, "Failed to fetch JWKS");
            ApiError::Unauthorized
        })?;

        if !response.status().is_success() {
            tracing::error!(
                status = %response.status(),
                url = %self.url,
                "JWKS fetch returned non-success status"
            );
            return Err(ApiError::Unauthorized);
        }

        let jwks: Jwks = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to parse JWKS response");
            ApiError::Unauthorized
        })?;

        tracing::info!(keys_count = %jwks.keys.len(), "JWKS fetched successfully");
        Ok(jwks)
    }
}

fn lookup(set: &KeySet, kid: Option<&str>) -> Option<DecodingKey> {
    match kid {
        Some(kid) => set.by_kid.get(kid).cloned(),
        None => set.default_key.clone(),
    }
}
