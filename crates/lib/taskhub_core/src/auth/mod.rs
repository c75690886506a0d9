//! Authentication: token issuance/rotation and per-request principal
//! resolution.
//!
//! Provides password hashing, the JWT token service and the bearer
//! authenticator shared by every HTTP entry point.

pub mod authenticator;
pub mod jwt;
pub mod password;

use thiserror::Error;

use crate::store::StoreError;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Access denied. No token provided.")]
    MissingCredential,

    #[error("Invalid token.")]
    InvalidCredential,

    #[error("Token expired.")]
    ExpiredCredential,

    #[error("Invalid token.")]
    UnknownPrincipal,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Invalid credentials")]
    InvalidLogin,

    /// An essential dependency (the user store) failed or timed out.
    #[error("Credential store unavailable: {0}")]
    Dependency(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}
