use crate::db::models::computational::ComputationalResource;
use crate::db::models::libraries::Library;
use crate::db::models::scheduler::SchedulerJobData;
use crate::status::UserInstanceStatus;
use crate::types::{CloudProvider, ExploratoryId, ExploratoryKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// A link exposed by a running notebook (Jupyter UI, Spark UI, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResourceUrl {
    pub description: String,
    pub url: String,
}

/// One Spark configuration classification, e.g. `spark-defaults` with its properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ClusterConfig {
    #[serde(rename = "Classification")]
    pub classification: String,
    #[serde(rename = "Properties", default)]
    pub properties: BTreeMap<String, String>,
    #[serde(rename = "Configurations", default, skip_serializing_if = "Vec::is_empty")]
    #[schema(no_recursion)]
    pub configurations: Vec<ClusterConfig>,
}

/// Database request for creating a notebook
#[derive(Debug, Clone)]
pub struct ExploratoryCreateDBRequest {
    pub user: String,
    pub project: String,
    pub endpoint: String,
    pub exploratory_name: String,
    pub template_name: String,
    pub image: String,
    pub shape: String,
    pub cloud_provider: CloudProvider,
    pub tags: BTreeMap<String, String>,
    pub cluster_config: Vec<ClusterConfig>,
}

/// Partial update of the fields reported back by the provisioning service.
///
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct ExploratoryFieldsUpdate {
    pub instance_id: Option<String>,
    pub private_ip: Option<String>,
    pub exploratory_url: Option<Vec<ResourceUrl>>,
    pub error_message: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Filter for listing notebooks. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ExploratoryFilter {
    pub user: Option<String>,
    pub project: Option<String>,
    pub endpoint: Option<String>,
    pub statuses: Vec<UserInstanceStatus>,
    /// Only notebooks with a scheduler rule
    pub with_scheduler: bool,
}

impl ExploratoryFilter {
    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            ..Default::default()
        }
    }

    pub fn for_project(project: impl Into<String>) -> Self {
        Self {
            project: Some(project.into()),
            ..Default::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[UserInstanceStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn matches(&self, record: &Exploratory) -> bool {
        self.user.as_ref().is_none_or(|u| *u == record.user)
            && self.project.as_ref().is_none_or(|p| *p == record.project)
            && self.endpoint.as_ref().is_none_or(|e| *e == record.endpoint)
            && (self.statuses.is_empty() || self.statuses.contains(&record.status))
            && (!self.with_scheduler || record.scheduler_data.is_some())
    }
}

/// A user's notebook together with its clusters
#[derive(Debug, Clone)]
pub struct Exploratory {
    pub id: ExploratoryId,
    pub user: String,
    pub project: String,
    pub endpoint: String,
    pub exploratory_name: String,
    pub template_name: String,
    pub image: String,
    pub shape: String,
    pub cloud_provider: CloudProvider,
    pub status: UserInstanceStatus,
    pub instance_id: Option<String>,
    pub private_ip: Option<String>,
    pub exploratory_url: Vec<ResourceUrl>,
    pub tags: BTreeMap<String, String>,
    pub cluster_config: Vec<ClusterConfig>,
    pub libs: Vec<Library>,
    pub scheduler_data: Option<SchedulerJobData>,
    pub error_message: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub computational_resources: Vec<ComputationalResource>,
}

impl Exploratory {
    pub fn key(&self) -> ExploratoryKey {
        ExploratoryKey::new(&self.user, &self.project, &self.exploratory_name)
    }

    pub fn computational(&self, name: &str) -> Option<&ComputationalResource> {
        self.computational_resources.iter().find(|c| c.computational_name == name)
    }
}
