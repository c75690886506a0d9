//! Bearer credential → `Principal` resolution.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::AuthError;
use super::jwt::TokenService;
use crate::models::auth::Principal;
use crate::store::{UserStore, bounded};

/// Extract the token from an `Authorization` header value.
///
/// The scheme is matched case-insensitively; a missing header, another
/// scheme or an empty token are all `MissingCredential`.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingCredential)?.trim();
    let (scheme, token) = header
        .split_once(' ')
        .ok_or(AuthError::MissingCredential)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MissingCredential);
    }
    let token = token.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(AuthError::MissingCredential);
    }
    Ok(token)
}

/// Verifies access tokens and resolves the current principal.
pub struct Authenticator {
    tokens: Arc<TokenService>,
    users: Arc<dyn UserStore>,
    store_timeout: Duration,
}

impl Authenticator {
    pub fn new(tokens: Arc<TokenService>, users: Arc<dyn UserStore>, store_timeout: Duration) -> Self {
        Self {
            tokens,
            users,
            store_timeout,
        }
    }

    /// Authenticate a raw `Authorization` header value.
    pub async fn authenticate_header(&self, header: Option<&str>) -> Result<Principal, AuthError> {
        let token = bearer_token(header)?;
        self.authenticate(token).await
    }

    /// Authenticate a bearer token.
    ///
    /// The token proves identity only. Role and tenant come from the stored
    /// user, since either may have changed after the token was issued.
    pub async fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        let claims = self.tokens.verify_access(token)?;

        let user = bounded(self.store_timeout, self.users.find_by_id(&claims.sub))
            .await?
            .ok_or_else(|| {
                debug!(user_id = %claims.sub, "token subject no longer exists");
                AuthError::UnknownPrincipal
            })?;

        Ok(Principal::from(&user))
    }
}
