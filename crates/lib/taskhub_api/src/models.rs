//! Request and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskhub_core::models::auth::{Role, TokenPair, User};
use taskhub_core::models::resource::{
    Project, ProjectChanges, ProjectStatus, Task, TaskChanges, TaskPriority, TaskStatus,
};

use crate::error::{AppError, AppResult};

const MIN_PASSWORD_LEN: usize = 6;
const MIN_NAME_LEN: usize = 2;

fn invalid(message: &str) -> AppError {
    AppError::Validation(message.to_string())
}

/// Lowercase and trim; reject anything without a local part and a domain.
fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(invalid("A valid email is required")),
    }
}

fn required(value: &str, what: &str) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{what} is required")));
    }
    Ok(value.to_string())
}

fn optional_trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string())
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub tenant_id: String,
    #[serde(default)]
    pub role: Option<Role>,
}

impl RegisterRequest {
    pub fn validate(self) -> AppResult<Self> {
        if self.password.len() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        let name = self.name.trim().to_string();
        if name.chars().count() < MIN_NAME_LEN {
            return Err(AppError::Validation(format!(
                "Name must be at least {MIN_NAME_LEN} characters"
            )));
        }
        Ok(Self {
            email: normalize_email(&self.email)?,
            tenant_id: required(&self.tenant_id, "Tenant ID")?,
            name,
            ..self
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub tenant_id: String,
}

impl LoginRequest {
    pub fn validate(self) -> AppResult<Self> {
        Ok(Self {
            email: normalize_email(&self.email)?,
            tenant_id: required(&self.tenant_id, "Tenant ID")?,
            ..self
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Public view of a user; never carries the password hash.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub tenant_id: String,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            tenant_id: user.tenant_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserView,
    pub tokens: TokenPair,
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl CreateProjectRequest {
    pub fn validate(self) -> AppResult<Self> {
        Ok(Self {
            name: required(&self.name, "Project name")?,
            description: optional_trimmed(self.description),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProjectRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<ProjectStatus>,
}

impl UpdateProjectRequest {
    pub fn into_changes(self) -> AppResult<ProjectChanges> {
        Ok(ProjectChanges {
            name: self.name.map(|n| required(&n, "Project name")).transpose()?,
            description: optional_trimmed(self.description),
            status: self.status,
        })
    }
}

/// Task fields embedded in project views.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            status: task.status,
            priority: task.priority,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProjectView {
    #[serde(flatten)]
    pub project: Project,
    pub tasks: Vec<TaskSummary>,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub message: &'static str,
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub project_id: String,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

impl CreateTaskRequest {
    pub fn validate(self) -> AppResult<Self> {
        Ok(Self {
            title: required(&self.title, "Task title")?,
            project_id: required(&self.project_id, "Project ID")?,
            description: optional_trimmed(self.description),
            ..self
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

impl UpdateTaskRequest {
    pub fn into_changes(self) -> AppResult<TaskChanges> {
        Ok(TaskChanges {
            title: self.title.map(|t| required(&t, "Task title")).transpose()?,
            description: optional_trimmed(self.description),
            status: self.status,
            priority: self.priority,
            due_date: self.due_date,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(email: &str, password: &str, name: &str, tenant: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: password.into(),
            name: name.into(),
            tenant_id: tenant.into(),
            role: None,
        }
    }

    #[test]
    fn register_normalizes_email() {
        let req = register("  Alice@Example.COM ", "secret1", " Alice ", "t1")
            .validate()
            .unwrap();
        assert_eq!(req.email, "alice@example.com");
        assert_eq!(req.name, "Alice");
    }

    #[test]
    fn register_rejects_bad_input() {
        assert!(register("nope", "secret1", "Al", "t1").validate().is_err());
        assert!(register("a@b.c", "short", "Al", "t1").validate().is_err());
        assert!(register("a@b.c", "secret1", "A", "t1").validate().is_err());
        assert!(register("a@b.c", "secret1", "Al", "  ").validate().is_err());
    }

    #[test]
    fn role_must_be_known() {
        let body = r#"{"email":"a@b.c","password":"secret1","name":"Al","tenantId":"t1","role":"ROOT"}"#;
        assert!(serde_json::from_str::<RegisterRequest>(body).is_err());
    }

    #[test]
    fn blank_project_name_rejected_on_update() {
        let req = UpdateProjectRequest {
            name: Some("  ".into()),
            ..Default::default()
        };
        assert!(req.into_changes().is_err());
    }

    #[test]
    fn task_request_parses_camel_case() {
        let body = r#"{"title":"T","projectId":"p1","priority":"HIGH","dueDate":"2026-03-01T00:00:00Z"}"#;
        let req: CreateTaskRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.priority, Some(TaskPriority::High));
        assert!(req.due_date.is_some());
    }
}
