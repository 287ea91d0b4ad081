//! API request/response models for projects.

use super::{check_name, into_result};
use crate::db::models::projects::{Budget, Project, ProjectEndpoint};
use crate::errors::Result;
use crate::services::project::{ProjectCreate, ProjectUpdate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use utoipa::ToSchema;

/// Request body for creating a project.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProjectCreateRequest {
    #[schema(example = "data-science")]
    pub name: String,
    /// Groups whose members may use the project
    pub groups: BTreeSet<String>,
    /// Endpoints to create the project's edge on
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub budget: Budget,
    #[serde(default)]
    pub shared_image_enabled: bool,
}

impl ProjectCreateRequest {
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        check_name(&mut errors, "name", &self.name);
        if self.groups.is_empty() {
            errors.push("groups must not be empty".to_string());
        }
        into_result(errors)
    }
}

impl From<ProjectCreateRequest> for ProjectCreate {
    fn from(request: ProjectCreateRequest) -> Self {
        Self {
            name: request.name,
            groups: request.groups,
            endpoints: request.endpoints,
            budget: request.budget,
            shared_image_enabled: request.shared_image_enabled,
        }
    }
}

/// Request body for updating a project. Endpoints already in the project are kept.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProjectUpdateRequest {
    pub name: String,
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub shared_image_enabled: bool,
}

impl From<ProjectUpdateRequest> for ProjectUpdate {
    fn from(request: ProjectUpdateRequest) -> Self {
        Self {
            name: request.name,
            groups: request.groups,
            endpoints: request.endpoints,
            shared_image_enabled: request.shared_image_enabled,
        }
    }
}

/// Request body for changing a project's budget.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BudgetUpdateRequest {
    pub project: String,
    pub budget: Budget,
}

/// Addresses a project's edge on one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProjectEndpointAction {
    pub project: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProjectResponse {
    pub name: String,
    pub groups: BTreeSet<String>,
    pub endpoints: Vec<ProjectEndpoint>,
    pub budget: Budget,
    pub shared_image_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Project> for ProjectResponse {
    fn from(db: Project) -> Self {
        Self {
            name: db.name,
            groups: db.groups,
            endpoints: db.endpoints,
            budget: db.budget,
            shared_image_enabled: db.shared_image_enabled,
            created_at: db.created_at,
        }
    }
}
