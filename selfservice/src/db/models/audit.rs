use crate::types::AuditId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Start,
    Stop,
    Terminate,
    Reconfigure,
    CreateImage,
    InstallLibs,
    SetUpScheduler,
    Update,
    Delete,
    Backup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditResourceType {
    Notebook,
    Computational,
    Project,
    Edge,
    Endpoint,
    Library,
    Backup,
}

macro_rules! db_string_enum {
    ($ty:ty { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s,)+
                }
            }

            pub fn from_db_string(s: &str) -> Option<Self> {
                match s {
                    $($s => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

db_string_enum!(AuditAction {
    Create => "create",
    Start => "start",
    Stop => "stop",
    Terminate => "terminate",
    Reconfigure => "reconfigure",
    CreateImage => "create_image",
    InstallLibs => "install_libs",
    SetUpScheduler => "set_up_scheduler",
    Update => "update",
    Delete => "delete",
    Backup => "backup",
});

db_string_enum!(AuditResourceType {
    Notebook => "notebook",
    Computational => "computational",
    Project => "project",
    Edge => "edge",
    Endpoint => "endpoint",
    Library => "library",
    Backup => "backup",
});

/// Database request for recording an action
#[derive(Debug, Clone)]
pub struct AuditCreateDBRequest {
    pub user: String,
    pub action: AuditAction,
    pub project: Option<String>,
    pub resource_name: String,
    pub resource_type: AuditResourceType,
    pub info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditEntry {
    #[schema(value_type = String, format = "uuid")]
    pub id: AuditId,
    pub user: String,
    pub action: AuditAction,
    pub project: Option<String>,
    pub resource_name: String,
    pub resource_type: AuditResourceType,
    pub info: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Filter for the audit log. Empty lists match everything; results are newest first.
#[derive(Debug, Clone)]
pub struct AuditFilter {
    pub users: Vec<String>,
    pub projects: Vec<String>,
    pub resource_names: Vec<String>,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub skip: i64,
    pub limit: i64,
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            users: Vec::new(),
            projects: Vec::new(),
            resource_names: Vec::new(),
            date_start: None,
            date_end: None,
            skip: 0,
            limit: 50,
        }
    }
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        let day = entry.timestamp.date_naive();
        (self.users.is_empty() || self.users.contains(&entry.user))
            && (self.projects.is_empty() || entry.project.as_ref().is_some_and(|p| self.projects.contains(p)))
            && (self.resource_names.is_empty() || self.resource_names.contains(&entry.resource_name))
            && self.date_start.is_none_or(|start| day >= start)
            && self.date_end.is_none_or(|end| day <= end)
    }
}
