//! Narrow interfaces to the user and resource stores.
//!
//! The request pipeline never talks to a database directly; it consumes these
//! traits. `postgres::PgStore` backs production, `memory::MemoryStore` backs
//! tests and local experiments.

pub mod memory;
pub mod postgres;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::auth::{NewUser, User};
use crate::models::resource::{
    NewProject, NewTask, OwnershipRecord, Project, ProjectChanges, ResourceKind, Task, TaskChanges,
};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Run a store call under a deadline. Store calls sit on the request path, so
/// an elapsed deadline is reported as a plain (non-retryable) failure.
pub async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| StoreError::Timeout(timeout))?
}

/// User lookups used by authentication and token rotation.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, tenant_id: &str, email: &str)
    -> Result<Option<User>, StoreError>;

    /// Create a user. Fails with `Conflict` if the email is taken in the tenant.
    async fn create(&self, user: NewUser) -> Result<User, StoreError>;

    /// Remove a user. Returns whether a row was deleted.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Whether any user is registered in `tenant_id`.
    async fn tenant_has_users(&self, tenant_id: &str) -> Result<bool, StoreError>;
}

/// Resource persistence, scoped by tenant on every call.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Resolve ownership of `id` within `tenant_id`. Both are independent
    /// predicates: a resource in another tenant is simply not found.
    async fn find_ownership(
        &self,
        kind: ResourceKind,
        id: &str,
        tenant_id: &str,
    ) -> Result<Option<OwnershipRecord>, StoreError>;

    /// Projects in a tenant, newest first, optionally restricted to one owner.
    async fn list_projects(
        &self,
        tenant_id: &str,
        owner_id: Option<&str>,
    ) -> Result<Vec<Project>, StoreError>;

    async fn get_project(&self, id: &str, tenant_id: &str) -> Result<Option<Project>, StoreError>;

    async fn create_project(&self, project: NewProject) -> Result<Project, StoreError>;

    async fn update_project(
        &self,
        id: &str,
        tenant_id: &str,
        changes: ProjectChanges,
    ) -> Result<Option<Project>, StoreError>;

    /// Delete a project and its tasks, returning the removed project.
    async fn delete_project(&self, id: &str, tenant_id: &str)
    -> Result<Option<Project>, StoreError>;

    /// Tasks of a project, highest priority first, then newest first.
    async fn list_tasks(&self, project_id: &str, tenant_id: &str) -> Result<Vec<Task>, StoreError>;

    async fn get_task(&self, id: &str, tenant_id: &str) -> Result<Option<Task>, StoreError>;

    async fn create_task(&self, task: NewTask) -> Result<Task, StoreError>;

    async fn update_task(
        &self,
        id: &str,
        tenant_id: &str,
        changes: TaskChanges,
    ) -> Result<Option<Task>, StoreError>;

    async fn delete_task(&self, id: &str, tenant_id: &str) -> Result<Option<Task>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bounded_reports_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, StoreError>(1)
        };
        let err = bounded(Duration::from_millis(50), slow).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout(_)));
    }

    #[tokio::test]
    async fn bounded_passes_through_results() {
        let value = bounded(Duration::from_secs(1), async { Ok::<_, StoreError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
