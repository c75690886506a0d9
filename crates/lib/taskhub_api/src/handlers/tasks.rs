//! Task request handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, Uri};
use axum_extra::extract::WithRejection;
use taskhub_core::cache::Audience;
use taskhub_core::models::resource::{ResourceKind, Task};

use super::cached;
use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::CurrentUser;
use crate::models::{CreateTaskRequest, DeletedResponse, UpdateTaskRequest};
use crate::response::{ApiResponse, CachedJson, created};
use crate::services::tasks;

/// `GET /api/tasks/project/{project_id}`
pub async fn list_for_project_handler(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(project_id): Path<String>,
    uri: Uri,
) -> AppResult<CachedJson> {
    state
        .guard
        .authorize(&principal, ResourceKind::Project, &project_id)
        .await?;
    cached(&state, &uri, &principal, Audience::Tenant, || {
        tasks::list_for_project(&state, &principal, &project_id)
    })
    .await
}

/// `GET /api/tasks/{id}`
pub async fn get_handler(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<String>,
    uri: Uri,
) -> AppResult<CachedJson> {
    state
        .guard
        .authorize(&principal, ResourceKind::Task, &id)
        .await?;
    cached(&state, &uri, &principal, Audience::Tenant, || {
        tasks::get(&state, &principal, &id)
    })
    .await
}

/// `POST /api/tasks` — the caller must be allowed on the parent project.
pub async fn create_handler(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    WithRejection(Json(body), _): WithRejection<Json<CreateTaskRequest>, AppError>,
) -> AppResult<(StatusCode, ApiResponse<Task>)> {
    let body = body.validate()?;
    state
        .guard
        .authorize(&principal, ResourceKind::Project, &body.project_id)
        .await?;
    let task = tasks::create(&state, &principal, body).await?;
    Ok(created(task, "Task created successfully"))
}

/// `PUT /api/tasks/{id}`
pub async fn update_handler(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<String>,
    WithRejection(Json(body), _): WithRejection<Json<UpdateTaskRequest>, AppError>,
) -> AppResult<ApiResponse<Task>> {
    state
        .guard
        .authorize(&principal, ResourceKind::Task, &id)
        .await?;
    let task = tasks::update(&state, &principal, &id, body.into_changes()?).await?;
    Ok(ApiResponse::new(task).with_message("Task updated successfully"))
}

/// `DELETE /api/tasks/{id}`
pub async fn delete_handler(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<DeletedResponse>> {
    state
        .guard
        .authorize(&principal, ResourceKind::Task, &id)
        .await?;
    let deleted = tasks::delete(&state, &principal, &id).await?;
    Ok(ApiResponse::new(deleted))
}
