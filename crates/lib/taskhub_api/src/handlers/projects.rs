//! Project request handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, Uri};
use axum_extra::extract::WithRejection;
use taskhub_core::cache::Audience;
use taskhub_core::models::resource::{Project, ResourceKind};

use super::cached;
use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::CurrentUser;
use crate::models::{CreateProjectRequest, DeletedResponse, UpdateProjectRequest};
use crate::response::{ApiResponse, CachedJson, created};
use crate::services::projects;

/// `GET /api/projects` — the caller's projects, or the whole tenant's for
/// admins.
pub async fn list_handler(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    uri: Uri,
) -> AppResult<CachedJson> {
    let audience = if principal.is_admin() {
        Audience::Tenant
    } else {
        Audience::User(principal.user_id.clone())
    };
    cached(&state, &uri, &principal, audience, || {
        projects::list(&state, &principal)
    })
    .await
}

/// `GET /api/projects/{id}`
pub async fn get_handler(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<String>,
    uri: Uri,
) -> AppResult<CachedJson> {
    state
        .guard
        .authorize(&principal, ResourceKind::Project, &id)
        .await?;
    cached(&state, &uri, &principal, Audience::Tenant, || {
        projects::get(&state, &principal, &id)
    })
    .await
}

/// `POST /api/projects`
pub async fn create_handler(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    WithRejection(Json(body), _): WithRejection<Json<CreateProjectRequest>, AppError>,
) -> AppResult<(StatusCode, ApiResponse<Project>)> {
    let project = projects::create(&state, &principal, body).await?;
    Ok(created(project, "Project created successfully"))
}

/// `PUT /api/projects/{id}`
pub async fn update_handler(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<String>,
    WithRejection(Json(body), _): WithRejection<Json<UpdateProjectRequest>, AppError>,
) -> AppResult<ApiResponse<Project>> {
    state
        .guard
        .authorize(&principal, ResourceKind::Project, &id)
        .await?;
    let project = projects::update(&state, &principal, &id, body.into_changes()?).await?;
    Ok(ApiResponse::new(project).with_message("Project updated successfully"))
}

/// `DELETE /api/projects/{id}`
pub async fn delete_handler(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<DeletedResponse>> {
    state
        .guard
        .authorize(&principal, ResourceKind::Project, &id)
        .await?;
    let deleted = projects::delete(&state, &principal, &id).await?;
    Ok(ApiResponse::new(deleted))
}
