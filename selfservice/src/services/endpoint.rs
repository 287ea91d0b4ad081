//! Registry of provisioning endpoints.

use crate::auth::CurrentUser;
use crate::db::Store;
use crate::db::handlers::{EndpointDao, ExploratoryDao};
use crate::db::models::audit::{AuditAction, AuditResourceType};
use crate::db::models::endpoints::{Endpoint, EndpointCreateDBRequest, EndpointStatus};
use crate::db::models::exploratories::ExploratoryFilter;
use crate::errors::{Error, Result};
use crate::provisioning::paths;
use crate::services::Dispatcher;
use crate::services::audit::AuditService;
use crate::status::UserInstanceStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

/// Result of probing an endpoint's provisioning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EndpointHealth {
    pub name: String,
    pub status: EndpointStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct EndpointService {
    endpoints: Arc<dyn EndpointDao>,
    exploratories: Arc<dyn ExploratoryDao>,
    dispatcher: Dispatcher,
    audit: AuditService,
}

impl EndpointService {
    pub fn new(store: &Store, dispatcher: Dispatcher, audit: AuditService) -> Self {
        Self {
            endpoints: store.endpoints.clone(),
            exploratories: store.exploratories.clone(),
            dispatcher,
            audit,
        }
    }

    #[instrument(skip(self, user, request), fields(user = %user.name, endpoint = %request.name), err)]
    pub async fn create(&self, user: &CurrentUser, request: EndpointCreateDBRequest) -> Result<Endpoint> {
        let mut errors = Vec::new();
        if request.name.trim().is_empty() {
            errors.push("name must not be empty".to_string());
        }
        if !matches!(request.url.scheme(), "http" | "https") {
            errors.push(format!("url scheme '{}' is not http or https", request.url.scheme()));
        }
        if !errors.is_empty() {
            return Err(Error::Validation { errors });
        }
        if self.endpoints.get(&request.name).await?.is_some() {
            return Err(Error::conflict(format!("Endpoint {} already exists", request.name)));
        }
        if self.endpoints.list().await?.iter().any(|e| e.url == request.url) {
            return Err(Error::conflict(format!("An endpoint with url {} already exists", request.url)));
        }

        let endpoint = self.endpoints.insert(&request).await?;
        self.audit
            .record(
                &user.name,
                AuditAction::Create,
                None,
                &endpoint.name,
                AuditResourceType::Endpoint,
                Some(endpoint.url.to_string()),
            )
            .await;
        Ok(endpoint)
    }

    pub async fn get(&self, name: &str) -> Result<Endpoint> {
        self.dispatcher.endpoint(name).await
    }

    pub async fn list(&self) -> Result<Vec<Endpoint>> {
        let mut endpoints = self.endpoints.list().await?;
        endpoints.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(endpoints)
    }

    /// Unregister an endpoint. Refused while any notebook on it is not yet terminated.
    #[instrument(skip(self, user), fields(user = %user.name), err)]
    pub async fn remove(&self, user: &CurrentUser, name: &str) -> Result<()> {
        let endpoint = self.get(name).await?;
        let filter = ExploratoryFilter {
            endpoint: Some(endpoint.name.clone()),
            ..Default::default()
        };
        let live = self
            .exploratories
            .list(&filter)
            .await?
            .into_iter()
            .filter(|e| e.status != UserInstanceStatus::Terminated)
            .count();
        if live > 0 {
            return Err(Error::conflict(format!(
                "Endpoint {name} still has {live} notebook(s) that are not terminated"
            )));
        }

        if !self.endpoints.delete(name).await? {
            return Err(Error::not_found("Endpoint", name));
        }
        self.audit
            .record(&user.name, AuditAction::Delete, None, name, AuditResourceType::Endpoint, None)
            .await;
        Ok(())
    }

    /// Ping the endpoint's provisioning service and record whether it answered.
    #[instrument(skip(self, token), err)]
    pub async fn status(&self, name: &str, token: &str) -> Result<EndpointHealth> {
        let endpoint = self.get(name).await?;
        let (status, error) = match self.dispatcher.get(&endpoint, paths::HEALTH_CHECK, token, "check endpoint").await {
            Ok(_) => (EndpointStatus::Active, None),
            Err(e) => {
                warn!(endpoint = %endpoint.name, "Endpoint health check failed: {e}");
                (EndpointStatus::Inactive, Some(e.user_message()))
            }
        };
        if status != endpoint.status {
            info!(endpoint = %endpoint.name, from = endpoint.status.as_str(), to = status.as_str(), "Endpoint status changed");
            self.endpoints.update_status(&endpoint.name, status).await?;
        }
        Ok(EndpointHealth {
            name: endpoint.name,
            status,
            error,
        })
    }
}
