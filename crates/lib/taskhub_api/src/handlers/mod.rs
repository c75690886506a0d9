//! Request handlers.

pub mod auth;
pub mod health;
pub mod projects;
pub mod tasks;

use std::future::Future;

use axum::http::Uri;
use serde::Serialize;
use taskhub_core::cache::{Audience, CacheKey};
use taskhub_core::models::auth::Principal;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::response::{ApiResponse, CachedJson};

/// Serve a GET through the response cache, keyed by path, query, tenant and
/// audience. Authorization must already have happened.
pub(crate) async fn cached<T, F, Fut>(
    state: &AppState,
    uri: &Uri,
    principal: &Principal,
    audience: Audience,
    produce: F,
) -> AppResult<CachedJson>
where
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let key = CacheKey::for_request(
        uri.path(),
        uri.query(),
        Some(&principal.tenant_id),
        &audience,
    );
    let body = state
        .cache
        .read_through(&key, None, || async move {
            ApiResponse::new(produce().await?).to_bytes()
        })
        .await?;
    Ok(CachedJson(body))
}

/// Fallback for unmatched routes.
pub async fn not_found() -> AppError {
    AppError::NotFound("Route not found".into())
}
