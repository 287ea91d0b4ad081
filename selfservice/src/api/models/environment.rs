//! API response models for environment views.

use super::exploratories::ExploratoryResponse;
use super::projects::ProjectResponse;
use crate::services::environment::{AllResources, UserResources};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// The caller's projects and notebooks with budget usage.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InfrastructureInfo {
    pub projects: Vec<ProjectResponse>,
    pub exploratories: Vec<ExploratoryResponse>,
    /// Percent of each project's budget spent, for projects with a budget
    pub project_quotas: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_quota_used: Option<f64>,
}

impl From<UserResources> for InfrastructureInfo {
    fn from(resources: UserResources) -> Self {
        Self {
            projects: resources.projects.into_iter().map(Into::into).collect(),
            exploratories: resources.exploratories.into_iter().map(Into::into).collect(),
            project_quotas: resources.project_quotas,
            total_quota_used: resources.total_quota_used,
        }
    }
}

/// Every live project and notebook in the installation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnvironmentResponse {
    pub projects: Vec<ProjectResponse>,
    pub exploratories: Vec<ExploratoryResponse>,
}

impl From<AllResources> for EnvironmentResponse {
    fn from(resources: AllResources) -> Self {
        Self {
            projects: resources.projects.into_iter().map(Into::into).collect(),
            exploratories: resources.exploratories.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoppedResponse {
    /// Notebooks a stop was dispatched for
    pub stopped: usize,
}
