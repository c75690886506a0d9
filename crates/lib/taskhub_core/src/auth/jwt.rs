//! JWT access/refresh token issuance, verification and rotation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::{debug, info, warn};

use super::AuthError;
use crate::models::auth::{TokenClaims, TokenPair, User};
use crate::store::{UserStore, bounded};
use crate::uuid::random_id;

/// Access token lifetime: 15 minutes.
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;

/// Refresh token lifetime: 7 days.
pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Token service settings.
#[derive(Clone, Debug)]
pub struct TokenConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    /// Deadline for the user lookup performed during rotation.
    pub store_timeout: StdDuration,
}

/// A signing/verification key pair for one token family.
struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Issues, verifies and rotates HS256 token pairs.
///
/// Access and refresh tokens are signed with independent secrets: a leaked
/// access secret cannot mint refresh tokens and vice versa.
pub struct TokenService {
    access: KeyPair,
    refresh: KeyPair,
    access_ttl: Duration,
    refresh_ttl: Duration,
    store_timeout: StdDuration,
    users: Arc<dyn UserStore>,
}

impl TokenService {
    pub fn new(config: TokenConfig, users: Arc<dyn UserStore>) -> Result<Self, AuthError> {
        if config.access_secret.is_empty() || config.refresh_secret.is_empty() {
            return Err(AuthError::Internal("token secrets must not be empty".into()));
        }
        if config.access_secret == config.refresh_secret {
            return Err(AuthError::Internal(
                "access and refresh token secrets must differ".into(),
            ));
        }
        if config.access_ttl_secs >= config.refresh_ttl_secs {
            return Err(AuthError::Internal(
                "access token lifetime must be shorter than refresh token lifetime".into(),
            ));
        }
        Ok(Self {
            access: KeyPair::from_secret(&config.access_secret),
            refresh: KeyPair::from_secret(&config.refresh_secret),
            access_ttl: Duration::seconds(config.access_ttl_secs),
            refresh_ttl: Duration::seconds(config.refresh_ttl_secs),
            store_timeout: config.store_timeout,
            users,
        })
    }

    /// Access token lifetime in seconds.
    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    /// Issue a brand-new pair for `user`.
    pub fn issue(&self, user: &User) -> Result<TokenPair, AuthError> {
        let access_token = sign(user, self.access_ttl, &self.access.encoding)?;
        let refresh_token = sign(user, self.refresh_ttl, &self.refresh.encoding)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    /// Verify an access token's signature and expiry.
    pub fn verify_access(&self, token: &str) -> Result<TokenClaims, AuthError> {
        verify(token, &self.access.decoding)
    }

    /// Verify a refresh token's signature and expiry.
    pub fn verify_refresh(&self, token: &str) -> Result<TokenClaims, AuthError> {
        verify(token, &self.refresh.decoding)
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// The subject is re-read from the user store so role and tenant changes
    /// since issuance are picked up. The old pair is not extended. Any
    /// verification failure, or a subject that no longer exists, is a hard
    /// `InvalidRefreshToken`.
    pub async fn rotate(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.verify_refresh(refresh_token).map_err(|e| {
            debug!(error = %e, "refresh token rejected");
            AuthError::InvalidRefreshToken
        })?;

        let user = bounded(self.store_timeout, self.users.find_by_id(&claims.sub))
            .await?
            .ok_or_else(|| {
                debug!(user_id = %claims.sub, "refresh token subject no longer exists");
                AuthError::InvalidRefreshToken
            })?;

        self.issue(&user)
    }
}

fn sign(user: &User, ttl: Duration, key: &EncodingKey) -> Result<String, AuthError> {
    let now = Utc::now();
    let claims = TokenClaims {
        sub: user.id.clone(),
        tenant_id: user.tenant_id.clone(),
        role: user.role,
        email: user.email.clone(),
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
        jti: random_id(),
    };
    encode(&Header::new(Algorithm::HS256), &claims, key)
        .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
}

fn strict_validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.validate_exp = true;
    validation.set_required_spec_claims(&["exp", "sub"]);
    validation
}

fn verify(token: &str, key: &DecodingKey) -> Result<TokenClaims, AuthError> {
    match decode::<TokenClaims>(token, key, &strict_validation()) {
        Ok(data) => Ok(data.claims),
        Err(e) => match e.kind() {
            ErrorKind::ExpiredSignature => Err(AuthError::ExpiredCredential),
            // Expiry wins over a bad signature: an expired token is reported
            // as expired whichever key it was signed with.
            ErrorKind::InvalidSignature if is_expired_unverified(token) => {
                Err(AuthError::ExpiredCredential)
            }
            _ => Err(AuthError::InvalidCredential),
        },
    }
}

/// Check only the `exp` claim of a token whose signature did not verify.
/// The claims are never trusted for anything else.
fn is_expired_unverified(token: &str) -> bool {
    let mut validation = strict_validation();
    validation.insecure_disable_signature_validation();
    matches!(
        decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation),
        Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature)
    )
}

/// Resolve the access-token secret: `JWT_SECRET` → `AUTH_SECRET` → persisted file.
pub fn resolve_access_secret() -> String {
    resolve_secret(&["JWT_SECRET", "AUTH_SECRET"], "jwt-secret")
}

/// Resolve the refresh-token secret: `JWT_REFRESH_SECRET` → persisted file.
pub fn resolve_refresh_secret() -> String {
    resolve_secret(&["JWT_REFRESH_SECRET"], "jwt-refresh-secret")
}

fn resolve_secret(env_vars: &[&str], file_name: &str) -> String {
    for var in env_vars {
        if let Ok(secret) = std::env::var(var)
            && !secret.is_empty()
        {
            return secret;
        }
    }
    load_or_generate(&secret_path(file_name))
}

/// Read the secret stored at `path`, or generate one and try to store it.
///
/// A secret that cannot be stored is still returned; tokens it signs stop
/// verifying after a restart.
fn load_or_generate(path: &Path) -> String {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    match persist(path, &secret) {
        Ok(()) => info!(path = %path.display(), "generated new token secret"),
        Err(e) => warn!(
            path = %path.display(),
            error = %e,
            "generated token secret could not be saved; issued tokens will not survive a restart"
        ),
    }
    secret
}

fn persist(path: &Path, secret: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, secret)
}

fn secret_path(file_name: &str) -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskhub")
        .join(file_name)
}
