//! Tenant-owned resources: projects, tasks and their ownership records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of resource types that carry ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceKind {
    Project,
    Task,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Project => "project",
            ResourceKind::Task => "task",
        }
    }

    /// Route segments whose cached views embed this resource and must be
    /// dropped when it changes. Project listings include task summaries, so a
    /// task mutation also invalidates project views.
    pub fn cache_segments(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Project => &["projects"],
            ResourceKind::Task => &["tasks", "projects"],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ownership facts for one resource, shaped per kind so the guard can match
/// on exactly the fields its policy needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnedResource {
    Project {
        id: String,
        owner_id: String,
    },
    Task {
        id: String,
        owner_id: String,
        /// Owner of the parent project, if the parent still exists.
        project_owner_id: Option<String>,
    },
}

impl OwnedResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            OwnedResource::Project { .. } => ResourceKind::Project,
            OwnedResource::Task { .. } => ResourceKind::Task,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            OwnedResource::Project { id, .. } | OwnedResource::Task { id, .. } => id,
        }
    }
}

/// Result of a tenant-scoped ownership lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipRecord {
    pub tenant_id: String,
    pub resource: OwnedResource,
}

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {}: {other}", stringify!($name))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    #[default]
    Active,
    Archived,
    Completed,
}

string_enum!(ProjectStatus {
    Active => "ACTIVE",
    Archived => "ARCHIVED",
    Completed => "COMPLETED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Cancelled,
}

string_enum!(TaskStatus {
    Todo => "TODO",
    InProgress => "IN_PROGRESS",
    Done => "DONE",
    Cancelled => "CANCELLED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

string_enum!(TaskPriority {
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
    Urgent => "URGENT",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub tenant_id: String,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub tenant_id: String,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<ProjectStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub tenant_id: String,
    pub project_id: String,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub tenant_id: String,
    pub project_id: String,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_text_matches_serde() {
        assert_eq!(TaskStatus::InProgress.as_str(), "IN_PROGRESS");
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
        assert_eq!("URGENT".parse::<TaskPriority>().unwrap(), TaskPriority::Urgent);
        assert!("urgent".parse::<TaskPriority>().is_err());
    }

    #[test]
    fn task_mutations_touch_project_views() {
        assert!(ResourceKind::Task.cache_segments().contains(&"projects"));
        assert_eq!(ResourceKind::Project.cache_segments(), &["projects"]);
    }

    #[test]
    fn owned_resource_reports_kind_and_id() {
        let r = OwnedResource::Task {
            id: "t9".into(),
            owner_id: "u1".into(),
            project_owner_id: None,
        };
        assert_eq!(r.kind(), ResourceKind::Task);
        assert_eq!(r.id(), "t9");
    }
}
