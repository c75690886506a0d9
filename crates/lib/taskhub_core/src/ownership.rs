//! Tenant- and ownership-scoped authorization for single resources.
//!
//! This is the only place identity-to-resource trust decisions are made.
//! Decisions are evaluated per request and never cached: ownership can change
//! between requests.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::models::auth::Principal;
use crate::models::resource::{OwnedResource, OwnershipRecord, ResourceKind};
use crate::store::{ResourceStore, StoreError, bounded};

/// Proof that a principal may act on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allow {
    pub record: OwnershipRecord,
}

/// Why access was refused.
#[derive(Debug, Error)]
pub enum AccessDenied {
    /// Absent from the principal's tenant. Also used for resources that exist
    /// in another tenant so existence never leaks across tenants.
    #[error("{0} not found")]
    ResourceNotFound(ResourceKind),

    #[error("Access denied. You can only access your own resources.")]
    Forbidden,

    /// The resource store failed or timed out.
    #[error("Resource lookup failed: {0}")]
    Lookup(#[from] StoreError),
}

/// Decides whether a principal may act on a specific resource instance.
pub struct OwnershipGuard {
    resources: Arc<dyn ResourceStore>,
    lookup_timeout: Duration,
}

impl OwnershipGuard {
    pub fn new(resources: Arc<dyn ResourceStore>, lookup_timeout: Duration) -> Self {
        Self {
            resources,
            lookup_timeout,
        }
    }

    /// Evaluate, in order:
    /// 1. resolve the resource within the principal's tenant (else not found);
    /// 2. admins of that tenant are allowed;
    /// 3. owners are allowed, and for tasks so is the parent project's owner.
    pub async fn authorize(
        &self,
        principal: &Principal,
        kind: ResourceKind,
        resource_id: &str,
    ) -> Result<Allow, AccessDenied> {
        let record = bounded(
            self.lookup_timeout,
            self.resources
                .find_ownership(kind, resource_id, &principal.tenant_id),
        )
        .await?
        .filter(|r| r.tenant_id == principal.tenant_id && r.resource.kind() == kind)
        .ok_or(AccessDenied::ResourceNotFound(kind))?;

        if principal.is_admin() || is_owner(principal, &record.resource) {
            return Ok(Allow { record });
        }

        debug!(
            user_id = %principal.user_id,
            tenant_id = %principal.tenant_id,
            resource = %kind,
            resource_id,
            "ownership check denied"
        );
        Err(AccessDenied::Forbidden)
    }
}

/// Ownership reaches exactly one level up: a task's project owner counts, the
/// project's own parents (if any) do not.
fn is_owner(principal: &Principal, resource: &OwnedResource) -> bool {
    let user = principal.user_id.as_str();
    match resource {
        OwnedResource::Project { owner_id, .. } => owner_id == user,
        OwnedResource::Task {
            owner_id,
            project_owner_id,
            ..
        } => owner_id == user || project_owner_id.as_deref() == Some(user),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::models::auth::Role;
    use crate::models::resource::{Project, Task};
    use crate::store::memory::MemoryStore;

    fn principal(user: &str, tenant: &str, role: Role) -> Principal {
        Principal {
            user_id: user.into(),
            tenant_id: tenant.into(),
            role,
            email: format!("{user}@demo.com"),
        }
    }

    fn project(id: &str, tenant: &str, owner: &str) -> Project {
        let now = Utc::now();
        Project {
            id: id.into(),
            tenant_id: tenant.into(),
            owner_id: owner.into(),
            name: id.into(),
            description: None,
            status: Default::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn task(id: &str, tenant: &str, project: &str, owner: &str) -> Task {
        let now = Utc::now();
        Task {
            id: id.into(),
            tenant_id: tenant.into(),
            project_id: project.into(),
            owner_id: owner.into(),
            title: id.into(),
            description: None,
            status: Default::default(),
            priority: Default::default(),
            due_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn guard() -> OwnershipGuard {
        let store = MemoryStore::new();
        store.insert_project(project("p1", "t1", "alice"));
        store.insert_project(project("p2", "t2", "bob"));
        store.insert_task(task("k1", "t1", "p1", "carol"));
        OwnershipGuard::new(Arc::new(store), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn owner_is_allowed() {
        let g = guard();
        let allow = g
            .authorize(&principal("alice", "t1", Role::User), ResourceKind::Project, "p1")
            .await
            .unwrap();
        assert_eq!(allow.record.tenant_id, "t1");
    }

    #[tokio::test]
    async fn non_owner_user_is_forbidden() {
        let g = guard();
        let err = g
            .authorize(&principal("dave", "t1", Role::User), ResourceKind::Project, "p1")
            .await
            .unwrap_err();
        assert!(matches!(err, AccessDenied::Forbidden));
    }

    #[tokio::test]
    async fn admin_in_same_tenant_is_allowed() {
        let g = guard();
        assert!(
            g.authorize(&principal("root", "t1", Role::Admin), ResourceKind::Project, "p1")
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn cross_tenant_is_not_found_even_for_admin() {
        let g = guard();
        for role in [Role::User, Role::Admin] {
            let err = g
                .authorize(&principal("alice", "t1", role), ResourceKind::Project, "p2")
                .await
                .unwrap_err();
            assert!(matches!(err, AccessDenied::ResourceNotFound(ResourceKind::Project)));
        }
    }

    #[tokio::test]
    async fn task_owner_and_project_owner_are_allowed() {
        let g = guard();
        for user in ["carol", "alice"] {
            assert!(
                g.authorize(&principal(user, "t1", Role::User), ResourceKind::Task, "k1")
                    .await
                    .is_ok(),
                "{user} should reach the task"
            );
        }
        let err = g
            .authorize(&principal("dave", "t1", Role::User), ResourceKind::Task, "k1")
            .await
            .unwrap_err();
        assert!(matches!(err, AccessDenied::Forbidden));
    }

    #[tokio::test]
    async fn kind_mismatch_is_not_found() {
        let g = guard();
        let err = g
            .authorize(&principal("alice", "t1", Role::User), ResourceKind::Task, "p1")
            .await
            .unwrap_err();
        assert!(matches!(err, AccessDenied::ResourceNotFound(ResourceKind::Task)));
    }
}
