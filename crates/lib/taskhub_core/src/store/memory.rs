//! In-memory user and resource store.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{ResourceStore, StoreError, UserStore};
use crate::models::auth::{NewUser, User};
use crate::models::resource::{
    NewProject, NewTask, OwnedResource, OwnershipRecord, Project, ProjectChanges, ResourceKind,
    Task, TaskChanges,
};
use crate::uuid::new_id;

/// Process-local store implementing both store traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<String, User>,
    projects: DashMap<String, Project>,
    tasks: DashMap<String, Task>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user with a caller-chosen id.
    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    /// Seed a project with a caller-chosen id.
    pub fn insert_project(&self, project: Project) {
        self.projects.insert(project.id.clone(), project);
    }

    /// Seed a task with a caller-chosen id.
    pub fn insert_task(&self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
    }

    /// Change a user's role in place, as an administrator would.
    pub fn set_role(&self, user_id: &str, role: crate::models::auth::Role) {
        if let Some(mut user) = self.users.get_mut(user_id) {
            user.role = role;
        }
    }

    fn project_in_tenant(&self, id: &str, tenant_id: &str) -> Option<Project> {
        self.projects
            .get(id)
            .filter(|p| p.tenant_id == tenant_id)
            .map(|p| p.clone())
    }

    fn task_in_tenant(&self, id: &str, tenant_id: &str) -> Option<Task> {
        self.tasks
            .get(id)
            .filter(|t| t.tenant_id == tenant_id)
            .map(|t| t.clone())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(id).map(|u| u.clone()))
    }

    async fn find_by_email(
        &self,
        tenant_id: &str,
        email: &str,
    ) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .iter()
            .find(|u| u.tenant_id == tenant_id && u.email == email)
            .map(|u| u.clone()))
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        if self.find_by_email(&user.tenant_id, &user.email).await?.is_some() {
            return Err(StoreError::Conflict("User already exists".into()));
        }
        let created = User {
            id: new_id(),
            tenant_id: user.tenant_id,
            email: user.email,
            name: user.name,
            role: user.role,
            password_hash: user.password_hash,
        };
        self.users.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.users.remove(id).is_some())
    }

    async fn tenant_has_users(&self, tenant_id: &str) -> Result<bool, StoreError> {
        Ok(self.users.iter().any(|u| u.tenant_id == tenant_id))
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn find_ownership(
        &self,
        kind: ResourceKind,
        id: &str,
        tenant_id: &str,
    ) -> Result<Option<OwnershipRecord>, StoreError> {
        let record = match kind {
            ResourceKind::Project => self.project_in_tenant(id, tenant_id).map(|p| OwnershipRecord {
                tenant_id: p.tenant_id,
                resource: OwnedResource::Project {
                    id: p.id,
                    owner_id: p.owner_id,
                },
            }),
            ResourceKind::Task => self.task_in_tenant(id, tenant_id).map(|t| {
                let project_owner_id = self
                    .project_in_tenant(&t.project_id, tenant_id)
                    .map(|p| p.owner_id);
                OwnershipRecord {
                    tenant_id: t.tenant_id,
                    resource: OwnedResource::Task {
                        id: t.id,
                        owner_id: t.owner_id,
                        project_owner_id,
                    },
                }
            }),
        };
        Ok(record)
    }

    async fn list_projects(
        &self,
        tenant_id: &str,
        owner_id: Option<&str>,
    ) -> Result<Vec<Project>, StoreError> {
        let mut projects: Vec<Project> = self
            .projects
            .iter()
            .filter(|p| p.tenant_id == tenant_id)
            .filter(|p| owner_id.is_none_or(|o| p.owner_id == o))
            .map(|p| p.clone())
            .collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(projects)
    }

    async fn get_project(&self, id: &str, tenant_id: &str) -> Result<Option<Project>, StoreError> {
        Ok(self.project_in_tenant(id, tenant_id))
    }

    async fn create_project(&self, project: NewProject) -> Result<Project, StoreError> {
        let now = Utc::now();
        let created = Project {
            id: new_id(),
            tenant_id: project.tenant_id,
            owner_id: project.owner_id,
            name: project.name,
            description: project.description,
            status: Default::default(),
            created_at: now,
            updated_at: now,
        };
        self.projects.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn update_project(
        &self,
        id: &str,
        tenant_id: &str,
        changes: ProjectChanges,
    ) -> Result<Option<Project>, StoreError> {
        let Some(mut project) = self.projects.get_mut(id) else {
            return Ok(None);
        };
        if project.tenant_id != tenant_id {
            return Ok(None);
        }
        if let Some(name) = changes.name {
            project.name = name;
        }
        if let Some(description) = changes.description {
            project.description = Some(description);
        }
        if let Some(status) = changes.status {
            project.status = status;
        }
        project.updated_at = Utc::now();
        Ok(Some(project.clone()))
    }

    async fn delete_project(
        &self,
        id: &str,
        tenant_id: &str,
    ) -> Result<Option<Project>, StoreError> {
        if self.project_in_tenant(id, tenant_id).is_none() {
            return Ok(None);
        }
        self.tasks.retain(|_, t| t.project_id != id);
        Ok(self.projects.remove(id).map(|(_, p)| p))
    }

    async fn list_tasks(&self, project_id: &str, tenant_id: &str) -> Result<Vec<Task>, StoreError> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.tenant_id == tenant_id && t.project_id == project_id)
            .map(|t| t.clone())
            .collect();
        tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.created_at.cmp(&a.created_at))
                .then(b.id.cmp(&a.id))
        });
        Ok(tasks)
    }

    async fn get_task(&self, id: &str, tenant_id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self.task_in_tenant(id, tenant_id))
    }

    async fn create_task(&self, task: NewTask) -> Result<Task, StoreError> {
        let now = Utc::now();
        let created = Task {
            id: new_id(),
            tenant_id: task.tenant_id,
            project_id: task.project_id,
            owner_id: task.owner_id,
            title: task.title,
            description: task.description,
            status: Default::default(),
            priority: task.priority,
            due_date: task.due_date,
            created_at: now,
            updated_at: now,
        };
        self.tasks.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn update_task(
        &self,
        id: &str,
        tenant_id: &str,
        changes: TaskChanges,
    ) -> Result<Option<Task>, StoreError> {
        let Some(mut task) = self.tasks.get_mut(id) else {
            return Ok(None);
        };
        if task.tenant_id != tenant_id {
            return Ok(None);
        }
        if let Some(title) = changes.title {
            task.title = title;
        }
        if let Some(description) = changes.description {
            task.description = Some(description);
        }
        if let Some(status) = changes.status {
            task.status = status;
        }
        if let Some(priority) = changes.priority {
            task.priority = priority;
        }
        if let Some(due_date) = changes.due_date {
            task.due_date = Some(due_date);
        }
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn delete_task(&self, id: &str, tenant_id: &str) -> Result<Option<Task>, StoreError> {
        if self.task_in_tenant(id, tenant_id).is_none() {
            return Ok(None);
        }
        Ok(self.tasks.remove(id).map(|(_, t)| t))
    }
}
