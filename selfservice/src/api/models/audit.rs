//! API query model for the audit log.

use super::billing::split_list;
use super::pagination::Pagination;
use crate::db::models::audit::AuditFilter;
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

/// Query parameters for listing audit entries
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListAuditQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,
    /// Comma separated user names
    pub users: Option<String>,
    /// Comma separated project names
    pub projects: Option<String>,
    /// Comma separated resource names
    pub resource_names: Option<String>,
    #[param(value_type = Option<String>, format = Date)]
    pub date_start: Option<NaiveDate>,
    #[param(value_type = Option<String>, format = Date)]
    pub date_end: Option<NaiveDate>,
}

impl From<&ListAuditQuery> for AuditFilter {
    fn from(query: &ListAuditQuery) -> Self {
        Self {
            users: split_list(query.users.as_deref()),
            projects: split_list(query.projects.as_deref()),
            resource_names: split_list(query.resource_names.as_deref()),
            date_start: query.date_start,
            date_end: query.date_end,
            skip: query.pagination.skip(),
            limit: query.pagination.limit(),
        }
    }
}
