use crate::db::handlers::AuditDao;
use crate::db::models::audit::{AuditAction, AuditCreateDBRequest, AuditEntry, AuditFilter, AuditResourceType};
use crate::errors::Result;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct AuditService {
    dao: Arc<dyn AuditDao>,
}

impl AuditService {
    pub fn new(dao: Arc<dyn AuditDao>) -> Self {
        Self { dao }
    }

    /// Append an audit entry. A failed write is logged and never fails the audited action.
    pub async fn record(
        &self,
        user: &str,
        action: AuditAction,
        project: Option<&str>,
        resource_name: &str,
        resource_type: AuditResourceType,
        info: Option<String>,
    ) {
        let request = AuditCreateDBRequest {
            user: user.to_string(),
            action,
            project: project.map(str::to_string),
            resource_name: resource_name.to_string(),
            resource_type,
            info,
        };
        if let Err(e) = self.dao.insert(&request).await {
            warn!(user, %action, resource_name, "Failed to write audit entry: {e}");
        }
    }

    pub async fn list(&self, filter: &AuditFilter) -> Result<(Vec<AuditEntry>, i64)> {
        Ok(self.dao.list(filter).await?)
    }
}
