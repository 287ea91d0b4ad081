use crate::status::UserInstanceStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use utoipa::ToSchema;

/// Edge node details reported after a project endpoint is created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EdgeInfo {
    pub instance_id: Option<String>,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub shared_bucket_name: Option<String>,
}

/// A project's presence on one endpoint, backed by an edge node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProjectEndpoint {
    pub name: String,
    pub status: UserInstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_info: Option<EdgeInfo>,
}

/// Spending cap for a project. `None` or zero means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Budget {
    pub value: Option<i64>,
    /// Count only the current calendar month's cost against the budget
    #[serde(default)]
    pub monthly_budget: bool,
}

impl Budget {
    pub fn limit(&self) -> Option<i64> {
        self.value.filter(|v| *v > 0)
    }
}

/// Database request for creating a project
#[derive(Debug, Clone)]
pub struct ProjectCreateDBRequest {
    pub name: String,
    pub groups: BTreeSet<String>,
    pub endpoints: Vec<ProjectEndpoint>,
    pub budget: Budget,
    pub shared_image_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub groups: BTreeSet<String>,
    pub endpoints: Vec<ProjectEndpoint>,
    pub budget: Budget,
    pub shared_image_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn endpoint(&self, name: &str) -> Option<&ProjectEndpoint> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    pub fn endpoint_mut(&mut self, name: &str) -> Option<&mut ProjectEndpoint> {
        self.endpoints.iter_mut().find(|e| e.name == name)
    }

    /// Whether any of `groups` grants access to the project.
    pub fn shares_group<'a>(&self, groups: impl IntoIterator<Item = &'a String>) -> bool {
        groups.into_iter().any(|g| self.groups.contains(g))
    }
}
