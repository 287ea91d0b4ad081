//! Scheduled start, stop and termination of notebooks and Spark clusters.
//!
//! Rules are stored on the resource itself. The background scheduler calls the `run_*_jobs`
//! methods once a minute; each selects the resources whose rule fires in the current minute of
//! the rule's timezone and drives them through the regular lifecycle services, acting as the
//! resource owner with the service token.

use crate::auth::CurrentUser;
use crate::db::Store;
use crate::db::handlers::{ComputationalDao, ExploratoryDao};
use crate::db::models::audit::{AuditAction, AuditResourceType};
use crate::db::models::computational::ComputationalResource;
use crate::db::models::exploratories::{Exploratory, ExploratoryFilter};
use crate::db::models::scheduler::SchedulerJobData;
use crate::errors::{Error, Result};
use crate::services::audit::AuditService;
use crate::services::computational::ComputationalService;
use crate::services::exploratory::ExploratoryService;
use crate::status::UserInstanceStatus;
use crate::types::{ComputationalKind, ExploratoryKey};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Clone)]
pub struct SchedulerJobService {
    exploratories: Arc<dyn ExploratoryDao>,
    computational: Arc<dyn ComputationalDao>,
    exploratory_service: ExploratoryService,
    computational_service: ComputationalService,
    audit: AuditService,
    service_token: Option<String>,
}

fn validate(data: &SchedulerJobData) -> Result<()> {
    let errors = data.validation_errors();
    if errors.is_empty() { Ok(()) } else { Err(Error::Validation { errors }) }
}

impl SchedulerJobService {
    pub fn new(
        store: &Store,
        exploratory_service: ExploratoryService,
        computational_service: ComputationalService,
        audit: AuditService,
        service_token: Option<String>,
    ) -> Self {
        Self {
            exploratories: store.exploratories.clone(),
            computational: store.computational.clone(),
            exploratory_service,
            computational_service,
            audit,
            service_token,
        }
    }

    /// Acts as `owner` using the service token.
    fn system_user(&self, owner: &str) -> CurrentUser {
        CurrentUser::system(owner, self.service_token.as_deref().unwrap_or_default())
    }

    #[instrument(skip(self, user, data), fields(user = %user.name), err)]
    pub async fn update_for_exploratory(&self, user: &CurrentUser, project: &str, name: &str, data: SchedulerJobData) -> Result<()> {
        validate(&data)?;
        let record = self.exploratory_service.get(&ExploratoryKey::new(&user.name, project, name)).await?;
        if record.status.is_terminal() {
            return Err(Error::conflict(format!("Notebook {name} is {}", record.status)));
        }
        self.exploratories.update_scheduler(record.id, Some(&data)).await?;
        self.audit
            .record(&user.name, AuditAction::SetUpScheduler, Some(project), name, AuditResourceType::Notebook, None)
            .await;
        Ok(())
    }

    pub async fn get_for_exploratory(&self, user: &CurrentUser, project: &str, name: &str) -> Result<SchedulerJobData> {
        let key = ExploratoryKey::new(&user.name, project, name);
        self.exploratory_service
            .get(&key)
            .await?
            .scheduler_data
            .ok_or_else(|| Error::not_found("Scheduler job", key))
    }

    /// Set the rule of a Spark cluster; cloud clusters cannot be scheduled.
    #[instrument(skip(self, user, data), fields(user = %user.name), err)]
    pub async fn update_for_computational(
        &self,
        user: &CurrentUser,
        project: &str,
        exploratory_name: &str,
        name: &str,
        data: SchedulerJobData,
    ) -> Result<()> {
        validate(&data)?;
        let key = ExploratoryKey::new(&user.name, project, exploratory_name).computational(name);
        let (_, cluster) = self.computational_service.get(&key).await?;
        if cluster.resource_type != ComputationalKind::Spark {
            return Err(Error::bad_request(format!("Cluster {name} is a cloud cluster and cannot be scheduled")));
        }
        if cluster.status.is_terminal() {
            return Err(Error::conflict(format!("Cluster {name} is {}", cluster.status)));
        }
        self.computational.update_scheduler(cluster.id, Some(&data)).await?;
        self.audit
            .record(&user.name, AuditAction::SetUpScheduler, Some(project), name, AuditResourceType::Computational, None)
            .await;
        Ok(())
    }

    pub async fn get_for_computational(&self, user: &CurrentUser, project: &str, exploratory_name: &str, name: &str) -> Result<SchedulerJobData> {
        let key = ExploratoryKey::new(&user.name, project, exploratory_name).computational(name);
        let (_, cluster) = self.computational_service.get(&key).await?;
        cluster.scheduler_data.ok_or_else(|| Error::not_found("Scheduler job", key))
    }

    async fn scheduled_notebooks(&self) -> Result<Vec<Exploratory>> {
        let filter = ExploratoryFilter {
            with_scheduler: true,
            ..Default::default()
        };
        Ok(self.exploratories.list(&filter).await?)
    }

    /// Every scheduled Spark cluster with its parent notebook.
    async fn scheduled_clusters(&self) -> Result<Vec<(Exploratory, ComputationalResource, SchedulerJobData)>> {
        let notebooks = self.exploratories.list(&ExploratoryFilter::default()).await?;
        Ok(notebooks
            .into_iter()
            .flat_map(|notebook| {
                let clusters = notebook.computational_resources.clone();
                clusters.into_iter().filter_map(move |cluster| {
                    let data = cluster.scheduler_data.clone()?;
                    (cluster.resource_type == ComputationalKind::Spark).then(|| (notebook.clone(), cluster, data))
                })
            })
            .collect())
    }

    /// Start stopped notebooks and Spark clusters whose start time is now.
    #[instrument(skip(self))]
    pub async fn run_start_jobs(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut started = 0;
        for notebook in self.scheduled_notebooks().await? {
            let Some(data) = &notebook.scheduler_data else { continue };
            if notebook.status != UserInstanceStatus::Stopped || !data.should_start(now) {
                continue;
            }
            let owner = self.system_user(&notebook.user);
            match self.exploratory_service.start(&owner, &notebook.project, &notebook.exploratory_name).await {
                Ok(_) => started += 1,
                Err(e) => warn!(notebook = %notebook.key(), "Scheduled start failed: {e}"),
            }
        }

        for (notebook, cluster, data) in self.scheduled_clusters().await? {
            if cluster.status != UserInstanceStatus::Stopped
                || notebook.status != UserInstanceStatus::Running
                || !data.should_start(now)
            {
                continue;
            }
            let owner = self.system_user(&notebook.user);
            let key = notebook.key().computational(&cluster.computational_name);
            match self.computational_service.start(&owner, &key).await {
                Ok(_) => started += 1,
                Err(e) => warn!(cluster = %key, "Scheduled start failed: {e}"),
            }
        }

        if started > 0 {
            info!(started, "Scheduler started resources");
        }
        Ok(started)
    }

    /// Stop running notebooks and Spark clusters whose end time is now or that have been idle for
    /// longer than their inactivity limit.
    #[instrument(skip(self))]
    pub async fn run_stop_jobs(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut stopped = 0;
        for notebook in self.scheduled_notebooks().await? {
            let Some(data) = &notebook.scheduler_data else { continue };
            if notebook.status != UserInstanceStatus::Running || !data.should_stop(now, notebook.last_activity) {
                continue;
            }
            let owner = self.system_user(&notebook.user);
            match self.exploratory_service.stop(&owner, &notebook.project, &notebook.exploratory_name).await {
                Ok(_) => stopped += 1,
                Err(e) => warn!(notebook = %notebook.key(), "Scheduled stop failed: {e}"),
            }
        }

        for (notebook, cluster, data) in self.scheduled_clusters().await? {
            if cluster.status != UserInstanceStatus::Running || !data.should_stop(now, notebook.last_activity) {
                continue;
            }
            let owner = self.system_user(&notebook.user);
            let key = notebook.key().computational(&cluster.computational_name);
            match self.computational_service.stop(&owner, &key).await {
                Ok(_) => stopped += 1,
                Err(e) => warn!(cluster = %key, "Scheduled stop failed: {e}"),
            }
        }

        if stopped > 0 {
            info!(stopped, "Scheduler stopped resources");
        }
        Ok(stopped)
    }

    #[instrument(skip(self))]
    pub async fn run_terminate_jobs(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut terminated = 0;
        for notebook in self.scheduled_notebooks().await? {
            let Some(data) = &notebook.scheduler_data else { continue };
            if notebook.status.is_terminal() || !data.should_terminate(now) {
                continue;
            }
            let owner = self.system_user(&notebook.user);
            match self
                .exploratory_service
                .terminate(&owner, &notebook.project, &notebook.exploratory_name)
                .await
            {
                Ok(Some(_)) => terminated += 1,
                Ok(None) => {}
                Err(e) => warn!(notebook = %notebook.key(), "Scheduled termination failed: {e}"),
            }
        }

        for (notebook, cluster, data) in self.scheduled_clusters().await? {
            if cluster.status.is_terminal() || !data.should_terminate(now) {
                continue;
            }
            let owner = self.system_user(&notebook.user);
            let key = notebook.key().computational(&cluster.computational_name);
            match self.computational_service.terminate(&owner, &key).await {
                Ok(Some(_)) => terminated += 1,
                Ok(None) => {}
                Err(e) => warn!(cluster = %key, "Scheduled termination failed: {e}"),
            }
        }

        if terminated > 0 {
            info!(terminated, "Scheduler terminated resources");
        }
        Ok(terminated)
    }

    /// Start the stopped Spark clusters of a notebook that just came up, when their rule asks to
    /// follow the notebook.
    pub async fn start_synced_clusters(&self, notebook: &Exploratory) -> Result<usize> {
        if notebook.status != UserInstanceStatus::Running {
            return Ok(0);
        }
        let mut started = 0;
        for cluster in &notebook.computational_resources {
            let synced = cluster.scheduler_data.as_ref().is_some_and(|d| d.sync_start_required);
            if !synced || cluster.resource_type != ComputationalKind::Spark || cluster.status != UserInstanceStatus::Stopped {
                continue;
            }
            let owner = self.system_user(&notebook.user);
            let key = notebook.key().computational(&cluster.computational_name);
            debug!(cluster = %key, "Starting cluster with its notebook");
            match self.computational_service.start(&owner, &key).await {
                Ok(_) => started += 1,
                Err(e) => warn!(cluster = %key, "Synced start failed: {e}"),
            }
        }
        Ok(started)
    }
}
