//! API request/response models for billing reports and quotas.

use crate::db::models::billing::{BillingFilter, BillingResourceType};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Report filter sent as a POST body. Empty lists match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct BillingReportRequest {
    #[schema(value_type = Option<String>, format = Date)]
    pub date_start: Option<NaiveDate>,
    #[schema(value_type = Option<String>, format = Date)]
    pub date_end: Option<NaiveDate>,
    pub users: Vec<String>,
    pub projects: Vec<String>,
    pub resource_types: Vec<BillingResourceType>,
    pub datalab_ids: Vec<String>,
}

impl From<BillingReportRequest> for BillingFilter {
    fn from(request: BillingReportRequest) -> Self {
        Self {
            date_start: request.date_start,
            date_end: request.date_end,
            users: request.users,
            projects: request.projects,
            resource_types: request.resource_types,
            datalab_ids: request.datalab_ids,
        }
    }
}

/// Report filter as query parameters; list values are comma separated.
#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
pub struct BillingReportQuery {
    #[param(value_type = Option<String>, format = Date)]
    pub date_start: Option<NaiveDate>,
    #[param(value_type = Option<String>, format = Date)]
    pub date_end: Option<NaiveDate>,
    /// Comma separated user names
    pub users: Option<String>,
    /// Comma separated project names
    pub projects: Option<String>,
}

pub(crate) fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl From<BillingReportQuery> for BillingFilter {
    fn from(query: BillingReportQuery) -> Self {
        Self {
            date_start: query.date_start,
            date_end: query.date_end,
            users: split_list(query.users.as_deref()),
            projects: split_list(query.projects.as_deref()),
            ..Default::default()
        }
    }
}

/// How much of a project's budget has been spent.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuotaResponse {
    pub project: String,
    /// Percent of the budget spent; absent when the project has no budget
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_used: Option<f64>,
    pub quota_reached: bool,
}
