//! Business rules for every resource the control plane manages.
//!
//! Services sit between the HTTP handlers and the [`Store`]. They enforce ownership, project
//! membership and quota rules, drive status changes through [`crate::status`], dispatch action
//! documents to the provisioning service and write the audit trail.
//!
//! # Cascading writes
//!
//! Actions that touch a notebook and its clusters write in a fixed order: the notebook status
//! first, then the clusters. If the provisioning call that follows fails, the notebook is marked
//! FAILED and the clusters keep the cascaded status; the next status check repairs them.

pub mod audit;
pub mod backup;
pub mod billing;
pub mod computational;
pub mod endpoint;
pub mod environment;
pub mod exploratory;
pub mod library;
pub mod project;
pub mod scheduler;

use crate::auth::CurrentUser;
use crate::config::Config;
use crate::db::Store;
use crate::db::handlers::{EndpointDao, ProjectDao};
use crate::db::models::endpoints::{Endpoint, EndpointStatus};
use crate::db::models::projects::Project;
use crate::errors::{Error, Result};
use crate::provisioning::billing::BillingSource;
use crate::provisioning::dto::RequestBuilder;
use crate::provisioning::{ProvisioningService, RequestIdRegistry};
use crate::types::RequestUuid;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use url::Url;

/// Sends action documents to the provisioning service and registers the returned request ids.
#[derive(Clone)]
pub struct Dispatcher {
    endpoints: Arc<dyn EndpointDao>,
    provisioning: Arc<dyn ProvisioningService>,
    pub registry: RequestIdRegistry,
    pub builder: RequestBuilder,
}

impl Dispatcher {
    pub fn new(
        endpoints: Arc<dyn EndpointDao>,
        provisioning: Arc<dyn ProvisioningService>,
        registry: RequestIdRegistry,
        builder: RequestBuilder,
    ) -> Self {
        Self {
            endpoints,
            provisioning,
            registry,
            builder,
        }
    }

    /// Endpoint record by name; 404 when unknown.
    pub async fn endpoint(&self, name: &str) -> Result<Endpoint> {
        self.endpoints.get(name).await?.ok_or_else(|| Error::not_found("Endpoint", name))
    }

    /// Dispatch to the provisioning service of a registered endpoint.
    pub async fn send(&self, endpoint: &str, path: &str, user: &CurrentUser, body: &impl Serialize, operation: &str) -> Result<RequestUuid> {
        let endpoint = self.endpoint(endpoint).await?;
        if endpoint.status == EndpointStatus::Inactive {
            return Err(Error::ResourceInappropriateState {
                message: format!("Endpoint {} is inactive", endpoint.name),
            });
        }
        self.send_to(&endpoint.url, path, user, body, operation).await
    }

    #[instrument(skip(self, user, body), fields(user = %user.name), err)]
    pub async fn send_to(&self, base_url: &Url, path: &str, user: &CurrentUser, body: &impl Serialize, operation: &str) -> Result<RequestUuid> {
        let body = serde_json::to_value(body).map_err(|e| Error::Other(e.into()))?;
        let request_id = self
            .provisioning
            .post(base_url, path, &user.token, &body)
            .await
            .map_err(|source| Error::Datalab {
                operation: operation.to_string(),
                source,
            })?;
        self.registry.put(&user.name, request_id).await?;
        info!(request_id = %request_id, path, "Dispatched provisioning request");
        Ok(request_id)
    }

    /// GET from the provisioning service of a registered endpoint.
    pub async fn get(&self, endpoint: &Endpoint, path: &str, token: &str, operation: &str) -> Result<serde_json::Value> {
        self.provisioning
            .get(&endpoint.url, path, token)
            .await
            .map_err(|source| Error::Datalab {
                operation: operation.to_string(),
                source,
            })
    }
}

/// Project by name, if the caller may create resources in it.
///
/// 404 when the project does not exist, 403 when the caller shares no group with it. Admins
/// pass regardless of groups.
pub async fn check_membership(projects: &dyn ProjectDao, user: &CurrentUser, project: &str) -> Result<Project> {
    let project_record = projects.get(project).await?.ok_or_else(|| Error::not_found("Project", project))?;
    if !user.is_admin && !project_record.shares_group(&user.groups) {
        return Err(Error::InsufficientPermissions {
            action: "use".to_string(),
            resource: format!("project {project}"),
        });
    }
    Ok(project_record)
}

/// Every service, wired over one store.
#[derive(Clone)]
pub struct Services {
    pub audit: audit::AuditService,
    pub billing: billing::BillingService,
    pub exploratory: exploratory::ExploratoryService,
    pub computational: computational::ComputationalService,
    pub library: library::LibraryService,
    pub project: project::ProjectService,
    pub endpoint: endpoint::EndpointService,
    pub backup: backup::BackupService,
    pub scheduler: scheduler::SchedulerJobService,
    pub environment: environment::EnvironmentService,
    pub dispatcher: Dispatcher,
}

impl Services {
    pub fn new(store: Store, provisioning: Arc<dyn ProvisioningService>, billing_source: Arc<dyn BillingSource>, config: &Config) -> Self {
        let registry = RequestIdRegistry::new(store.request_ids.clone(), config.provisioning.request_id_ttl);
        let dispatcher = Dispatcher::new(
            store.endpoints.clone(),
            provisioning,
            registry,
            RequestBuilder::new(&config.provisioning),
        );

        let audit = audit::AuditService::new(store.audit.clone());
        let billing = billing::BillingService::new(&store, billing_source, dispatcher.clone(), &config.billing);
        let exploratory = exploratory::ExploratoryService::new(&store, dispatcher.clone(), audit.clone(), billing.clone());
        let computational = computational::ComputationalService::new(&store, dispatcher.clone(), audit.clone(), billing.clone());
        let library = library::LibraryService::new(&store, dispatcher.clone(), audit.clone());
        let project = project::ProjectService::new(&store, dispatcher.clone(), audit.clone(), exploratory.clone());
        let endpoint = endpoint::EndpointService::new(&store, dispatcher.clone(), audit.clone());
        let backup = backup::BackupService::new(&store, dispatcher.clone(), audit.clone(), config.provisioning.ssn_url.clone());
        let scheduler = scheduler::SchedulerJobService::new(
            &store,
            exploratory.clone(),
            computational.clone(),
            audit.clone(),
            config.provisioning.service_token.clone(),
        );
        let environment = environment::EnvironmentService::new(
            &store,
            dispatcher.clone(),
            exploratory.clone(),
            billing.clone(),
            config.provisioning.service_token.clone(),
        );

        Self {
            audit,
            billing,
            exploratory,
            computational,
            library,
            project,
            endpoint,
            backup,
            scheduler,
            environment,
            dispatcher,
        }
    }
}
