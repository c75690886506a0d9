//! Registration, login and token refresh.

use serde_json::json;
use taskhub_core::auth::AuthError;
use taskhub_core::auth::password::{hash_password, verify_password};
use taskhub_core::models::auth::{NewUser, Role, TokenPair};
use tracing::info;

use super::store;
use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{AuthResponse, LoginRequest, RefreshRequest, RegisterRequest, UserView};
use crate::response::timestamp;

/// Create a user in a tenant and issue its first token pair.
///
/// The first user of a tenant may register as `ADMIN`; later registrations
/// requesting it are refused.
pub async fn register(state: &AppState, request: RegisterRequest) -> AppResult<AuthResponse> {
    let request = request.validate()?;

    let existing = store(
        state,
        state.users.find_by_email(&request.tenant_id, &request.email),
    )
    .await?;
    if existing.is_some() {
        return Err(AppError::Conflict("User already exists".into()));
    }

    let role = request.role.unwrap_or(Role::User);
    if role == Role::Admin && store(state, state.users.tenant_has_users(&request.tenant_id)).await? {
        return Err(AppError::Forbidden(
            "Only the first user of a tenant may register as admin".into(),
        ));
    }

    let password_hash = hash_password(&request.password)?;
    let user = store(
        state,
        state.users.create(NewUser {
            tenant_id: request.tenant_id,
            email: request.email,
            name: request.name,
            role,
            password_hash,
        }),
    )
    .await?;

    let tokens = state.tokens.issue(&user)?;
    info!(user_id = %user.id, tenant_id = %user.tenant_id, role = %user.role, "user registered");

    state.events.emit(
        "user.created",
        Some(&user.tenant_id),
        json!({
            "userId": user.id,
            "email": user.email,
            "tenantId": user.tenant_id,
            "timestamp": timestamp(),
        }),
    );

    Ok(AuthResponse {
        user: UserView::from(&user),
        tokens,
    })
}

/// Verify credentials within a tenant. Unknown email and wrong password fail
/// identically.
pub async fn login(state: &AppState, request: LoginRequest) -> AppResult<AuthResponse> {
    let request = request.validate()?;

    let user = store(
        state,
        state.users.find_by_email(&request.tenant_id, &request.email),
    )
    .await?
    .filter(|user| verify_password(&request.password, &user.password_hash))
    .ok_or(AuthError::InvalidLogin)?;

    let tokens = state.tokens.issue(&user)?;
    info!(user_id = %user.id, tenant_id = %user.tenant_id, "user logged in");

    state.events.emit(
        "user.login",
        Some(&user.tenant_id),
        json!({
            "userId": user.id,
            "email": user.email,
            "tenantId": user.tenant_id,
            "timestamp": timestamp(),
        }),
    );

    Ok(AuthResponse {
        user: UserView::from(&user),
        tokens,
    })
}

/// Exchange a refresh token for a brand-new pair.
pub async fn refresh(state: &AppState, request: RefreshRequest) -> AppResult<TokenPair> {
    if request.refresh_token.trim().is_empty() {
        return Err(AppError::Validation("Refresh token is required".into()));
    }
    Ok(state.tokens.rotate(request.refresh_token.trim()).await?)
}
