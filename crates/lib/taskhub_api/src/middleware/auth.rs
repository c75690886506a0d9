//! Authentication middleware: bearer token → `Principal`.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use taskhub_core::models::auth::Principal;

use crate::AppState;
use crate::error::AppError;

/// The authenticated principal, stored in request extensions by
/// [`require_auth`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Principal);

/// Axum middleware: extracts `Authorization: Bearer <token>`, resolves the
/// principal from the stored user record, and injects `CurrentUser` into
/// request extensions. Fails fast with 401 before any handler runs.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let principal = state.authenticator.authenticate_header(header).await?;

    request.extensions_mut().insert(CurrentUser(principal));

    Ok(next.run(request).await)
}

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("Access denied. No token provided.".into()))
    }
}
