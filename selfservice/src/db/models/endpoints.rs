use crate::types::CloudProvider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    Active,
    Inactive,
}

impl EndpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointStatus::Active => "active",
            EndpointStatus::Inactive => "inactive",
        }
    }

    pub fn from_db_string(s: &str) -> Option<EndpointStatus> {
        match s {
            "active" => Some(EndpointStatus::Active),
            "inactive" => Some(EndpointStatus::Inactive),
            _ => None,
        }
    }
}

/// Database request for registering an endpoint
#[derive(Debug, Clone)]
pub struct EndpointCreateDBRequest {
    pub name: String,
    pub url: Url,
    pub account: String,
    pub tag: Option<String>,
    pub cloud_provider: CloudProvider,
}

/// A cloud region or account where resources are provisioned, reached through its own
/// provisioning service.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub name: String,
    pub url: Url,
    pub account: String,
    pub tag: Option<String>,
    pub cloud_provider: CloudProvider,
    pub status: EndpointStatus,
    pub created_at: DateTime<Utc>,
}
