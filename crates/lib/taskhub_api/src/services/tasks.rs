//! Task operations. Callers authorize the task, or for creation the parent
//! project, before calling in.

use serde_json::json;
use taskhub_core::models::auth::Principal;
use taskhub_core::models::resource::{NewTask, ResourceKind, Task, TaskChanges};
use tracing::info;

use super::store;
use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{CreateTaskRequest, DeletedResponse};
use crate::response::timestamp;

fn not_found() -> AppError {
    AppError::NotFound("Task not found".into())
}

/// Tasks of one project, highest priority first.
pub async fn list_for_project(
    state: &AppState,
    principal: &Principal,
    project_id: &str,
) -> AppResult<Vec<Task>> {
    store(state, state.resources.list_tasks(project_id, &principal.tenant_id)).await
}

pub async fn get(state: &AppState, principal: &Principal, id: &str) -> AppResult<Task> {
    store(state, state.resources.get_task(id, &principal.tenant_id))
        .await?
        .ok_or_else(not_found)
}

pub async fn create(
    state: &AppState,
    principal: &Principal,
    request: CreateTaskRequest,
) -> AppResult<Task> {
    let task = store(
        state,
        state.resources.create_task(NewTask {
            tenant_id: principal.tenant_id.clone(),
            project_id: request.project_id,
            owner_id: principal.user_id.clone(),
            title: request.title,
            description: request.description,
            priority: request.priority.unwrap_or_default(),
            due_date: request.due_date,
        }),
    )
    .await?;

    state
        .cache
        .invalidate_resource(ResourceKind::Task, &task.tenant_id)
        .await;
    info!(task_id = %task.id, project_id = %task.project_id, tenant_id = %task.tenant_id, "task created");

    state.events.emit(
        "task.created",
        Some(&task.tenant_id),
        json!({
            "taskId": task.id,
            "title": task.title,
            "userId": task.owner_id,
            "tenantId": task.tenant_id,
            "projectId": task.project_id,
            "timestamp": timestamp(),
        }),
    );
    Ok(task)
}

pub async fn update(
    state: &AppState,
    principal: &Principal,
    id: &str,
    changes: TaskChanges,
) -> AppResult<Task> {
    let task = store(
        state,
        state.resources.update_task(id, &principal.tenant_id, changes),
    )
    .await?
    .ok_or_else(not_found)?;

    state
        .cache
        .invalidate_resource(ResourceKind::Task, &task.tenant_id)
        .await;
    info!(task_id = %task.id, tenant_id = %task.tenant_id, "task updated");

    state.events.emit(
        "task.updated",
        Some(&task.tenant_id),
        json!({
            "taskId": task.id,
            "title": task.title,
            "status": task.status,
            "userId": task.owner_id,
            "priority": task.priority,
            "tenantId": task.tenant_id,
            "projectId": task.project_id,
            "timestamp": timestamp(),
        }),
    );
    Ok(task)
}

pub async fn delete(state: &AppState, principal: &Principal, id: &str) -> AppResult<DeletedResponse> {
    let task = store(state, state.resources.delete_task(id, &principal.tenant_id))
        .await?
        .ok_or_else(not_found)?;

    state
        .cache
        .invalidate_resource(ResourceKind::Task, &task.tenant_id)
        .await;
    info!(task_id = %task.id, tenant_id = %task.tenant_id, "task deleted");

    state.events.emit(
        "task.deleted",
        Some(&task.tenant_id),
        json!({
            "taskId": task.id,
            "title": task.title,
            "userId": task.owner_id,
            "tenantId": task.tenant_id,
            "projectId": task.project_id,
            "timestamp": timestamp(),
        }),
    );
    Ok(DeletedResponse {
        message: "Task deleted successfully",
    })
}
