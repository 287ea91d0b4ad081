//! Backups of the self-service node's configuration, keys and database.

use crate::auth::CurrentUser;
use crate::db::Store;
use crate::db::handlers::BackupDao;
use crate::db::models::audit::{AuditAction, AuditResourceType};
use crate::db::models::backups::{Backup, BackupRequest, BackupStatus};
use crate::errors::{Error, Result};
use crate::provisioning::callbacks::BackupStatusCallback;
use crate::provisioning::paths;
use crate::services::Dispatcher;
use crate::services::audit::AuditService;
use crate::types::BackupId;
use chrono::Utc;
use std::sync::Arc;
use tracing::{instrument, warn};
use url::Url;
use uuid::Uuid;

#[derive(Clone)]
pub struct BackupService {
    backups: Arc<dyn BackupDao>,
    dispatcher: Dispatcher,
    audit: AuditService,
    ssn_url: Url,
}

impl BackupService {
    pub fn new(store: &Store, dispatcher: Dispatcher, audit: AuditService, ssn_url: Url) -> Self {
        Self {
            backups: store.backups.clone(),
            dispatcher,
            audit,
            ssn_url,
        }
    }

    /// Record a backup in CREATING and ask the provisioning service on the self-service node to
    /// produce it. Returns the backup id the caller polls with.
    #[instrument(skip(self, user, request), fields(user = %user.name), err)]
    pub async fn create(&self, user: &CurrentUser, request: BackupRequest) -> Result<BackupId> {
        let backup = Backup {
            id: Uuid::new_v4(),
            user: user.name.clone(),
            request,
            status: BackupStatus::Creating,
            file_name: None,
            error_message: None,
            updated_at: Utc::now(),
        };
        self.backups.insert(&backup).await?;

        let body = self.dispatcher.builder.backup(backup.id, &backup.request);
        if let Err(e) = self
            .dispatcher
            .send_to(&self.ssn_url, paths::BACKUP, user, &body, "create backup")
            .await
        {
            let message = e.to_string();
            if let Err(store_err) = self
                .backups
                .update_status(backup.id, BackupStatus::Failed, None, Some(&message))
                .await
            {
                warn!(backup = %backup.id, "Could not mark backup failed: {store_err}");
            }
            return Err(e);
        }

        self.audit
            .record(
                &user.name,
                AuditAction::Backup,
                None,
                &backup.id.to_string(),
                AuditResourceType::Backup,
                None,
            )
            .await;
        Ok(backup.id)
    }

    pub async fn get(&self, user: &CurrentUser, id: BackupId) -> Result<Backup> {
        self.backups
            .get(&user.name, id)
            .await?
            .ok_or_else(|| Error::not_found("Backup", id))
    }

    pub async fn list(&self, user: &CurrentUser) -> Result<Vec<Backup>> {
        Ok(self.backups.list(&user.name).await?)
    }

    #[instrument(skip(self, callback), fields(backup = %callback.id, status = callback.status.as_str()), err)]
    pub async fn update_status_from_callback(&self, callback: BackupStatusCallback) -> Result<Backup> {
        let user = self.dispatcher.registry.check_and_remove(callback.request_id).await?;
        self.backups
            .update_status(
                callback.id,
                callback.status,
                callback.file_name.as_deref(),
                callback.error_message.as_deref(),
            )
            .await?;
        self.backups
            .get(&user, callback.id)
            .await?
            .ok_or_else(|| Error::not_found("Backup", callback.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;

    fn request() -> BackupRequest {
        BackupRequest {
            config_files: vec!["all".to_string()],
            database_backup: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_sends_to_self_service_node() {
        let env = TestEnv::new().await;
        let admin = env.admin();

        let id = env.services.backup.create(&admin, request()).await.unwrap();

        let backup = env.services.backup.get(&admin, id).await.unwrap();
        assert_eq!(backup.status, BackupStatus::Creating);
        assert_eq!(env.provisioning.paths(), vec![paths::BACKUP.to_string()]);
        assert_eq!(env.provisioning.base_urls(), vec![env.config.provisioning.ssn_url.clone()]);
    }

    #[tokio::test]
    async fn test_failed_dispatch_marks_backup_failed() {
        let env = TestEnv::new().await;
        let admin = env.admin();
        env.provisioning.fail_next();

        assert!(env.services.backup.create(&admin, request()).await.is_err());
        let backups = env.services.backup.list(&admin).await.unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].status, BackupStatus::Failed);
        assert!(backups[0].error_message.is_some());
    }

    #[tokio::test]
    async fn test_callback_completes_backup() {
        let env = TestEnv::new().await;
        let admin = env.admin();
        let id = env.services.backup.create(&admin, request()).await.unwrap();
        let request_id = env.provisioning.last_request_id().unwrap();

        let backup = env
            .services
            .backup
            .update_status_from_callback(BackupStatusCallback {
                request_id,
                id,
                status: BackupStatus::Created,
                file_name: Some("backup.tar.gz".to_string()),
                error_message: None,
            })
            .await
            .unwrap();
        assert_eq!(backup.status, BackupStatus::Created);
        assert_eq!(backup.file_name.as_deref(), Some("backup.tar.gz"));
    }

    #[tokio::test]
    async fn test_backups_are_private() {
        let env = TestEnv::new().await;
        let id = env.services.backup.create(&env.admin(), request()).await.unwrap();

        let err = env.services.backup.get(&env.user("alice"), id).await.unwrap_err();
        assert!(matches!(err, Error::ResourceNotFound { .. }));
    }
}
