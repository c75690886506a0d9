//! Project operations. Callers have already passed the ownership guard for
//! single-project operations.

use serde_json::json;
use taskhub_core::models::auth::Principal;
use taskhub_core::models::resource::{NewProject, Project, ProjectChanges, ResourceKind};
use tracing::info;

use super::store;
use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{CreateProjectRequest, DeletedResponse, ProjectView, TaskSummary};
use crate::response::timestamp;

fn not_found() -> AppError {
    AppError::NotFound("Project not found".into())
}

async fn with_tasks(state: &AppState, project: Project) -> AppResult<ProjectView> {
    let tasks = store(state, state.resources.list_tasks(&project.id, &project.tenant_id)).await?;
    Ok(ProjectView {
        tasks: tasks.iter().map(TaskSummary::from).collect(),
        project,
    })
}

/// Admins see every project in their tenant; users see their own.
pub async fn list(state: &AppState, principal: &Principal) -> AppResult<Vec<ProjectView>> {
    let owner = (!principal.is_admin()).then_some(principal.user_id.as_str());
    let projects = store(
        state,
        state.resources.list_projects(&principal.tenant_id, owner),
    )
    .await?;
    let mut views = Vec::with_capacity(projects.len());
    for project in projects {
        views.push(with_tasks(state, project).await?);
    }
    Ok(views)
}

pub async fn get(state: &AppState, principal: &Principal, id: &str) -> AppResult<ProjectView> {
    let project = store(state, state.resources.get_project(id, &principal.tenant_id))
        .await?
        .ok_or_else(not_found)?;
    with_tasks(state, project).await
}

pub async fn create(
    state: &AppState,
    principal: &Principal,
    request: CreateProjectRequest,
) -> AppResult<Project> {
    let request = request.validate()?;
    let project = store(
        state,
        state.resources.create_project(NewProject {
            tenant_id: principal.tenant_id.clone(),
            owner_id: principal.user_id.clone(),
            name: request.name,
            description: request.description,
        }),
    )
    .await?;

    state
        .cache
        .invalidate_resource(ResourceKind::Project, &project.tenant_id)
        .await;
    info!(project_id = %project.id, tenant_id = %project.tenant_id, "project created");

    state.events.emit(
        "project.created",
        Some(&project.tenant_id),
        json!({
            "name": project.name,
            "projectId": project.id,
            "userId": project.owner_id,
            "tenantId": project.tenant_id,
            "timestamp": timestamp(),
        }),
    );
    Ok(project)
}

pub async fn update(
    state: &AppState,
    principal: &Principal,
    id: &str,
    changes: ProjectChanges,
) -> AppResult<Project> {
    let project = store(
        state,
        state.resources.update_project(id, &principal.tenant_id, changes),
    )
    .await?
    .ok_or_else(not_found)?;

    state
        .cache
        .invalidate_resource(ResourceKind::Project, &project.tenant_id)
        .await;
    info!(project_id = %project.id, tenant_id = %project.tenant_id, "project updated");

    state.events.emit(
        "project.updated",
        Some(&project.tenant_id),
        json!({
            "name": project.name,
            "projectId": project.id,
            "status": project.status,
            "userId": project.owner_id,
            "tenantId": project.tenant_id,
            "timestamp": timestamp(),
        }),
    );
    Ok(project)
}

/// Delete a project and, with it, its tasks.
pub async fn delete(state: &AppState, principal: &Principal, id: &str) -> AppResult<DeletedResponse> {
    let project = store(state, state.resources.delete_project(id, &principal.tenant_id))
        .await?
        .ok_or_else(not_found)?;

    // Task views of the removed project go too.
    state
        .cache
        .invalidate_resource(ResourceKind::Task, &project.tenant_id)
        .await;
    info!(project_id = %project.id, tenant_id = %project.tenant_id, "project deleted");

    state.events.emit(
        "project.deleted",
        Some(&project.tenant_id),
        json!({
            "projectId": project.id,
            "name": project.name,
            "userId": project.owner_id,
            "tenantId": project.tenant_id,
            "timestamp": timestamp(),
        }),
    );
    Ok(DeletedResponse {
        message: "Project deleted successfully",
    })
}
