//! PostgreSQL-backed user and resource store.
//!
//! Ids are UUID columns; callers pass strings. A string that does not parse as
//! a UUID cannot name any row, so lookups answer "not found" instead of
//! surfacing a cast error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{ResourceStore, StoreError, UserStore};
use crate::models::auth::{NewUser, User};
use crate::models::resource::{
    NewProject, NewTask, OwnedResource, OwnershipRecord, Project, ProjectChanges, ResourceKind,
    Task, TaskChanges,
};
use crate::uuid::parse_id;

/// Store backed by a shared `PgPool`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    tenant_id: String,
    email: String,
    name: String,
    role: String,
    password_hash: String,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id.to_string(),
            tenant_id: row.tenant_id,
            email: row.email,
            name: row.name,
            role: row.role.parse().map_err(StoreError::Corrupt)?,
            password_hash: row.password_hash,
        })
    }
}

#[derive(FromRow)]
struct ProjectRow {
    id: Uuid,
    tenant_id: String,
    owner_id: Uuid,
    name: String,
    description: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProjectRow> for Project {
    type Error = StoreError;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        Ok(Project {
            id: row.id.to_string(),
            tenant_id: row.tenant_id,
            owner_id: row.owner_id.to_string(),
            name: row.name,
            description: row.description,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct TaskRow {
    id: Uuid,
    tenant_id: String,
    project_id: Uuid,
    owner_id: Uuid,
    title: String,
    description: Option<String>,
    status: String,
    priority: String,
    due_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: row.id.to_string(),
            tenant_id: row.tenant_id,
            project_id: row.project_id.to_string(),
            owner_id: row.owner_id.to_string(),
            title: row.title,
            description: row.description,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            priority: row.priority.parse().map_err(StoreError::Corrupt)?,
            due_date: row.due_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const USER_COLUMNS: &str = "id, tenant_id, email, name, role, password_hash";
const PROJECT_COLUMNS: &str =
    "id, tenant_id, owner_id, name, description, status, created_at, updated_at";
const TASK_COLUMNS: &str = "id, tenant_id, project_id, owner_id, title, description, status, \
     priority, due_date, created_at, updated_at";

/// Postgres unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn owner_uuid(id: &str) -> Result<Uuid, StoreError> {
    parse_id(id).ok_or_else(|| StoreError::Corrupt(format!("owner id is not a uuid: {id}")))
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_email(
        &self,
        tenant_id: &str,
        email: &str,
    ) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE tenant_id = $1 AND email = $2"
        ))
        .bind(tenant_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (id, tenant_id, email, name, role, password_hash) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(&user.tenant_id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.role.as_str())
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                StoreError::Conflict("User already exists".into())
            }
            other => StoreError::Db(other),
        })?;
        User::try_from(row)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(false);
        };
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn tenant_has_users(&self, tenant_id: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE tenant_id = $1)")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

#[async_trait]
impl ResourceStore for PgStore {
    async fn find_ownership(
        &self,
        kind: ResourceKind,
        id: &str,
        tenant_id: &str,
    ) -> Result<Option<OwnershipRecord>, StoreError> {
        let Some(resource_id) = parse_id(id) else {
            return Ok(None);
        };
        match kind {
            ResourceKind::Project => {
                let row = sqlx::query_as::<_, (Uuid, String, Uuid)>(
                    "SELECT id, tenant_id, owner_id FROM projects \
                     WHERE id = $1 AND tenant_id = $2",
                )
                .bind(resource_id)
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;
                Ok(row.map(|(id, tenant_id, owner_id)| OwnershipRecord {
                    tenant_id,
                    resource: OwnedResource::Project {
                        id: id.to_string(),
                        owner_id: owner_id.to_string(),
                    },
                }))
            }
            ResourceKind::Task => {
                let row = sqlx::query_as::<_, (Uuid, String, Uuid, Option<Uuid>)>(
                    "SELECT t.id, t.tenant_id, t.owner_id, p.owner_id \
                     FROM tasks t \
                     LEFT JOIN projects p ON p.id = t.project_id AND p.tenant_id = t.tenant_id \
                     WHERE t.id = $1 AND t.tenant_id = $2",
                )
                .bind(resource_id)
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;
                Ok(
                    row.map(|(id, tenant_id, owner_id, project_owner_id)| OwnershipRecord {
                        tenant_id,
                        resource: OwnedResource::Task {
                            id: id.to_string(),
                            owner_id: owner_id.to_string(),
                            project_owner_id: project_owner_id.map(|o| o.to_string()),
                        },
                    }),
                )
            }
        }
    }

    async fn list_projects(
        &self,
        tenant_id: &str,
        owner_id: Option<&str>,
    ) -> Result<Vec<Project>, StoreError> {
        let owner = match owner_id {
            Some(o) => match parse_id(o) {
                Some(uuid) => Some(uuid),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        let rows = sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects \
             WHERE tenant_id = $1 AND ($2::uuid IS NULL OR owner_id = $2) \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(tenant_id)
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn get_project(&self, id: &str, tenant_id: &str) -> Result<Option<Project>, StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Project::try_from).transpose()
    }

    async fn create_project(&self, project: NewProject) -> Result<Project, StoreError> {
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            "INSERT INTO projects (id, tenant_id, owner_id, name, description) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(&project.tenant_id)
        .bind(owner_uuid(&project.owner_id)?)
        .bind(&project.name)
        .bind(&project.description)
        .fetch_one(&self.pool)
        .await?;
        Project::try_from(row)
    }

    async fn update_project(
        &self,
        id: &str,
        tenant_id: &str,
        changes: ProjectChanges,
    ) -> Result<Option<Project>, StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            "UPDATE projects SET \
               name = COALESCE($3, name), \
               description = COALESCE($4, description), \
               status = COALESCE($5, status), \
               updated_at = now() \
             WHERE id = $1 AND tenant_id = $2 \
             RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(id)
        .bind(tenant_id)
        .bind(changes.name)
        .bind(changes.description)
        .bind(changes.status.map(|s| s.as_str()))
        .fetch_optional(&self.pool)
        .await?;
        row.map(Project::try_from).transpose()
    }

    async fn delete_project(
        &self,
        id: &str,
        tenant_id: &str,
    ) -> Result<Option<Project>, StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };
        // Tasks go with the project through the ON DELETE CASCADE foreign key.
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            "DELETE FROM projects WHERE id = $1 AND tenant_id = $2 RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Project::try_from).transpose()
    }

    async fn list_tasks(&self, project_id: &str, tenant_id: &str) -> Result<Vec<Task>, StoreError> {
        let Some(project_id) = parse_id(project_id) else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE project_id = $1 AND tenant_id = $2 \
             ORDER BY CASE priority \
                 WHEN 'URGENT' THEN 4 WHEN 'HIGH' THEN 3 WHEN 'MEDIUM' THEN 2 ELSE 1 END DESC, \
               created_at DESC, id DESC"
        ))
        .bind(project_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn get_task(&self, id: &str, tenant_id: &str) -> Result<Option<Task>, StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Task::try_from).transpose()
    }

    async fn create_task(&self, task: NewTask) -> Result<Task, StoreError> {
        let project_id = parse_id(&task.project_id)
            .ok_or_else(|| StoreError::Corrupt(format!("project id is not a uuid: {}", task.project_id)))?;
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "INSERT INTO tasks (id, tenant_id, project_id, owner_id, title, description, priority, due_date) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {TASK_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(&task.tenant_id)
        .bind(project_id)
        .bind(owner_uuid(&task.owner_id)?)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.priority.as_str())
        .bind(task.due_date)
        .fetch_one(&self.pool)
        .await?;
        Task::try_from(row)
    }

    async fn update_task(
        &self,
        id: &str,
        tenant_id: &str,
        changes: TaskChanges,
    ) -> Result<Option<Task>, StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE tasks SET \
               title = COALESCE($3, title), \
               description = COALESCE($4, description), \
               status = COALESCE($5, status), \
               priority = COALESCE($6, priority), \
               due_date = COALESCE($7, due_date), \
               updated_at = now() \
             WHERE id = $1 AND tenant_id = $2 \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(id)
        .bind(tenant_id)
        .bind(changes.title)
        .bind(changes.description)
        .bind(changes.status.map(|s| s.as_str()))
        .bind(changes.priority.map(|p| p.as_str()))
        .bind(changes.due_date)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Task::try_from).transpose()
    }

    async fn delete_task(&self, id: &str, tenant_id: &str) -> Result<Option<Task>, StoreError> {
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "DELETE FROM tasks WHERE id = $1 AND tenant_id = $2 RETURNING {TASK_COLUMNS}"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Task::try_from).transpose()
    }
}
