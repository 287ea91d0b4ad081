//! Library installation on notebooks and clusters.

use crate::auth::CurrentUser;
use crate::db::Store;
use crate::db::handlers::{ComputationalDao, ExploratoryDao};
use crate::db::models::audit::{AuditAction, AuditResourceType};
use crate::db::models::exploratories::Exploratory;
use crate::db::models::libraries::{LibStatus, Library, merge_libraries};
use crate::errors::{Error, Result};
use crate::provisioning::callbacks::LibraryStatusCallback;
use crate::provisioning::paths;
use crate::services::Dispatcher;
use crate::services::audit::AuditService;
use crate::status::UserInstanceStatus;
use crate::types::{ExploratoryKey, RequestUuid};
use std::sync::Arc;
use tracing::{instrument, warn};

/// A library the caller asks to install.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryRequest {
    pub group: String,
    pub name: String,
    pub version: Option<String>,
}

/// Library groups offered for an image; clusters always get the JVM group.
pub fn lib_groups_for(image: &str, on_cluster: bool) -> Vec<&'static str> {
    let mut groups = vec!["os_pkg", "pip3", "others"];
    let image = image.to_ascii_lowercase();
    if image.contains("rstudio") || image.contains("jupyter") {
        groups.push("r_pkg");
    }
    if on_cluster || image.contains("zeppelin") || image.contains("jupyter") {
        groups.push("java");
    }
    groups
}

/// Keep the last request for each group and name.
fn dedup(requests: Vec<LibraryRequest>) -> Vec<LibraryRequest> {
    let mut unique: Vec<LibraryRequest> = Vec::with_capacity(requests.len());
    for request in requests {
        match unique.iter_mut().find(|r| r.group == request.group && r.name == request.name) {
            Some(existing) => *existing = request,
            None => unique.push(request),
        }
    }
    unique
}

#[derive(Clone)]
pub struct LibraryService {
    exploratories: Arc<dyn ExploratoryDao>,
    computational: Arc<dyn ComputationalDao>,
    dispatcher: Dispatcher,
    audit: AuditService,
}

/// Where libraries are installed.
enum Target<'a> {
    Notebook,
    Cluster(&'a crate::db::models::computational::ComputationalResource),
}

impl LibraryService {
    pub fn new(store: &Store, dispatcher: Dispatcher, audit: AuditService) -> Self {
        Self {
            exploratories: store.exploratories.clone(),
            computational: store.computational.clone(),
            dispatcher,
            audit,
        }
    }

    async fn notebook(&self, key: &ExploratoryKey) -> Result<Exploratory> {
        self.exploratories
            .find(key)
            .await?
            .ok_or_else(|| Error::not_found("Notebook", key))
    }

    fn target<'a>(notebook: &'a Exploratory, computational_name: Option<&str>) -> Result<Target<'a>> {
        match computational_name {
            None => Ok(Target::Notebook),
            Some(name) => notebook
                .computational(name)
                .map(Target::Cluster)
                .ok_or_else(|| Error::not_found("Cluster", notebook.key().computational(name))),
        }
    }

    async fn store_libs(&self, notebook: &Exploratory, target: &Target<'_>, libs: &[Library]) -> Result<()> {
        match target {
            Target::Notebook => self.exploratories.update_libs(notebook.id, libs).await?,
            Target::Cluster(cluster) => self.computational.update_libs(cluster.id, libs).await?,
        }
        Ok(())
    }

    /// Libraries installed or being installed on a notebook or one of its clusters.
    pub async fn list(&self, key: &ExploratoryKey, computational_name: Option<&str>) -> Result<Vec<Library>> {
        let notebook = self.notebook(key).await?;
        Ok(match Self::target(&notebook, computational_name)? {
            Target::Notebook => notebook.libs.clone(),
            Target::Cluster(cluster) => cluster.libs.clone(),
        })
    }

    pub async fn lib_groups(&self, key: &ExploratoryKey, computational_name: Option<&str>) -> Result<Vec<String>> {
        let notebook = self.notebook(key).await?;
        Self::target(&notebook, computational_name)?;
        Ok(lib_groups_for(&notebook.image, computational_name.is_some())
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Mark the requested libraries INSTALLING and ask the provisioning service to install them.
    ///
    /// If the dispatch fails the requested libraries are marked FAILED; the target itself is left
    /// untouched.
    #[instrument(skip(self, user, requests), fields(user = %user.name, count = requests.len()), err)]
    pub async fn install(
        &self,
        user: &CurrentUser,
        key: &ExploratoryKey,
        computational_name: Option<&str>,
        requests: Vec<LibraryRequest>,
    ) -> Result<RequestUuid> {
        if requests.is_empty() {
            return Err(Error::Validation {
                errors: vec!["libs must not be empty".to_string()],
            });
        }
        let notebook = self.notebook(key).await?;
        let target = Self::target(&notebook, computational_name)?;
        let (status, mut current) = match &target {
            Target::Notebook => (notebook.status, notebook.libs.clone()),
            Target::Cluster(cluster) => (cluster.status, cluster.libs.clone()),
        };
        if status != UserInstanceStatus::Running {
            return Err(Error::ResourceInappropriateState {
                message: format!("Libraries can only be installed on a running resource, not one with status {status}"),
            });
        }

        let requested: Vec<Library> = dedup(requests)
            .into_iter()
            .map(|r| Library {
                group: r.group,
                name: r.name,
                version: r.version,
                status: LibStatus::Installing,
                error_message: None,
                add_deps: vec![],
            })
            .collect();
        merge_libraries(&mut current, requested.clone());
        self.store_libs(&notebook, &target, &current).await?;

        let body = self.dispatcher.builder.library_install(&notebook, computational_name, &requested);
        let path = match target {
            Target::Notebook => paths::EXPLORATORY_LIB_INSTALL,
            Target::Cluster(_) => paths::COMPUTATIONAL_LIB_INSTALL,
        };
        let request_id = match self.dispatcher.send(&notebook.endpoint, path, user, &body, "install libraries").await {
            Ok(request_id) => request_id,
            Err(e) => {
                let failed = requested.iter().cloned().map(|lib| Library {
                    status: LibStatus::Failed,
                    error_message: Some(e.to_string()),
                    ..lib
                });
                merge_libraries(&mut current, failed);
                if let Err(store_err) = self.store_libs(&notebook, &target, &current).await {
                    warn!("Could not mark libraries failed: {store_err}");
                }
                return Err(e);
            }
        };

        let names: Vec<String> = requested.iter().map(|l| format!("{}:{}", l.group, l.name)).collect();
        let resource_name = computational_name.unwrap_or(&notebook.exploratory_name);
        self.audit
            .record(
                &user.name,
                AuditAction::InstallLibs,
                Some(&notebook.project),
                resource_name,
                AuditResourceType::Library,
                Some(names.join(", ")),
            )
            .await;
        Ok(request_id)
    }

    #[instrument(skip(self, callback), fields(user = %callback.user, name = %callback.exploratory_name), err)]
    pub async fn update_status_from_callback(&self, callback: LibraryStatusCallback) -> Result<Vec<Library>> {
        let reported = callback
            .libs
            .into_iter()
            .map(|lib| {
                let status = LibStatus::parse(&lib.status).ok_or_else(|| Error::bad_request(format!("Unknown library status '{}'", lib.status)))?;
                Ok(Library {
                    group: lib.group,
                    name: lib.name,
                    version: lib.version,
                    status,
                    error_message: lib.error_message,
                    add_deps: lib.add_deps,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.dispatcher.registry.check_and_remove(callback.request_id).await?;

        let key = ExploratoryKey::new(&callback.user, &callback.project, &callback.exploratory_name);
        let notebook = self.notebook(&key).await?;
        let target = Self::target(&notebook, callback.computational_name.as_deref())?;
        let mut current = match &target {
            Target::Notebook => notebook.libs.clone(),
            Target::Cluster(cluster) => cluster.libs.clone(),
        };
        merge_libraries(&mut current, reported);
        self.store_libs(&notebook, &target, &current).await?;
        Ok(current)
    }
}
