//! Endpoints the provisioning service posts back to once an action finished.
//!
//! Authenticated with the shared callback token rather than a user JWT. Every callback consumes
//! the request id it answers, so a replayed callback is rejected with 404.

use crate::AppState;
use crate::auth::CallbackAuth;
use crate::errors::Result;
use crate::provisioning::callbacks::{
    BackupStatusCallback, ComputationalStatusCallback, EnvironmentStatusCallback, ExploratoryStatusCallback, LibraryStatusCallback,
    ProjectStatusCallback,
};
use axum::{Json, extract::State, http::StatusCode};

#[utoipa::path(
    post,
    path = "/infrastructure_provision/callback/exploratory",
    tag = "callbacks",
    summary = "Notebook status",
    request_body = ExploratoryStatusCallback,
    responses(
        (status = 200, description = "Status applied"),
        (status = 400, description = "Unknown status"),
        (status = 404, description = "Unknown request id or notebook")
    ),
    security(("CallbackToken" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn exploratory_callback(
    State(state): State<AppState>,
    _: CallbackAuth,
    Json(callback): Json<ExploratoryStatusCallback>,
) -> Result<StatusCode> {
    state.services.exploratory.update_status_from_callback(callback).await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    post,
    path = "/infrastructure_provision/callback/computational",
    tag = "callbacks",
    summary = "Cluster status",
    request_body = ComputationalStatusCallback,
    responses(
        (status = 200, description = "Status applied"),
        (status = 400, description = "Unknown status"),
        (status = 404, description = "Unknown request id or cluster")
    ),
    security(("CallbackToken" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn computational_callback(
    State(state): State<AppState>,
    _: CallbackAuth,
    Json(callback): Json<ComputationalStatusCallback>,
) -> Result<StatusCode> {
    state.services.computational.update_status_from_callback(callback).await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    post,
    path = "/infrastructure_provision/callback/library",
    tag = "callbacks",
    summary = "Library install status",
    request_body = LibraryStatusCallback,
    responses(
        (status = 200, description = "Statuses applied"),
        (status = 404, description = "Unknown request id or target")
    ),
    security(("CallbackToken" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn library_callback(
    State(state): State<AppState>,
    _: CallbackAuth,
    Json(callback): Json<LibraryStatusCallback>,
) -> Result<StatusCode> {
    state.services.library.update_status_from_callback(callback).await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    post,
    path = "/infrastructure_provision/callback/project",
    tag = "callbacks",
    summary = "Edge status",
    request_body = ProjectStatusCallback,
    responses(
        (status = 200, description = "Status applied"),
        (status = 400, description = "Unknown status"),
        (status = 404, description = "Unknown request id, project or endpoint")
    ),
    security(("CallbackToken" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn project_callback(
    State(state): State<AppState>,
    _: CallbackAuth,
    Json(callback): Json<ProjectStatusCallback>,
) -> Result<StatusCode> {
    state.services.project.update_status_from_callback(callback).await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    post,
    path = "/infrastructure_provision/callback/backup",
    tag = "callbacks",
    summary = "Backup status",
    request_body = BackupStatusCallback,
    responses(
        (status = 200, description = "Status applied"),
        (status = 404, description = "Unknown request id or backup")
    ),
    security(("CallbackToken" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn backup_callback(
    State(state): State<AppState>,
    _: CallbackAuth,
    Json(callback): Json<BackupStatusCallback>,
) -> Result<StatusCode> {
    state.services.backup.update_status_from_callback(callback).await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    post,
    path = "/infrastructure_provision/callback/status",
    tag = "callbacks",
    summary = "Observed cloud statuses",
    description = "Answer to a status check. Statuses of unknown instances are ignored.",
    request_body = EnvironmentStatusCallback,
    responses(
        (status = 200, description = "Statuses reconciled"),
        (status = 404, description = "Unknown request id")
    ),
    security(("CallbackToken" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn status_callback(
    State(state): State<AppState>,
    _: CallbackAuth,
    Json(report): Json<EnvironmentStatusCallback>,
) -> Result<StatusCode> {
    state.services.environment.apply_observed_statuses(report).await?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use crate::db::models::exploratories::ExploratoryFieldsUpdate;
    use crate::status::UserInstanceStatus;
    use crate::test_utils::{CALLBACK_TOKEN, TestEnv};
    use crate::types::ExploratoryKey;
    use serde_json::json;
    use uuid::Uuid;

    fn callback_auth() -> String {
        format!("Bearer {CALLBACK_TOKEN}")
    }

    #[test_log::test(tokio::test)]
    async fn test_exploratory_callback_updates_status_once() {
        let env = TestEnv::with_running_project().await;
        env.running_notebook("alice", "nb").await;
        let request_id = Uuid::new_v4();
        env.services.dispatcher.registry.put("alice", request_id).await.unwrap();
        let server = env.server();
        let body = json!({
            "request_id": request_id,
            "user": "alice",
            "project": "ds",
            "exploratory_name": "nb",
            "status": "stopped",
            "instance_id": "i-123",
        });

        server
            .post("/api/infrastructure_provision/callback/exploratory")
            .add_header("authorization", callback_auth())
            .json(&body)
            .await
            .assert_status_ok();

        let nb = env.store.exploratories.find(&ExploratoryKey::new("alice", "ds", "nb")).await.unwrap().unwrap();
        assert_eq!(nb.status, UserInstanceStatus::Stopped);
        assert_eq!(nb.instance_id.as_deref(), Some("i-123"));

        server
            .post("/api/infrastructure_provision/callback/exploratory")
            .add_header("authorization", callback_auth())
            .json(&body)
            .await
            .assert_status_not_found();
    }

    #[test_log::test(tokio::test)]
    async fn test_callbacks_require_callback_token() {
        let env = TestEnv::with_running_project().await;
        let server = env.server();
        let body = json!({
            "request_id": Uuid::new_v4(),
            "endpoint": "local",
            "resources": [],
        });

        server
            .post("/api/infrastructure_provision/callback/status")
            .json(&body)
            .await
            .assert_status_unauthorized();

        server
            .post("/api/infrastructure_provision/callback/status")
            .add_header("authorization", env.bearer(&env.admin()))
            .json(&body)
            .await
            .assert_status_unauthorized();
    }

    #[test_log::test(tokio::test)]
    async fn test_status_callback_reconciles_notebooks() {
        let env = TestEnv::with_running_project().await;
        let nb = env.running_notebook("alice", "nb").await;
        env.store
            .exploratories
            .update_fields(
                nb.id,
                &ExploratoryFieldsUpdate {
                    instance_id: Some("i-1".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let request_id = Uuid::new_v4();
        env.services.dispatcher.registry.put("system", request_id).await.unwrap();

        env.server()
            .post("/api/infrastructure_provision/callback/status")
            .add_header("authorization", callback_auth())
            .json(&json!({
                "request_id": request_id,
                "endpoint": "local",
                "resources": [{"instance_id": "i-1", "status": "stopped"}, {"instance_id": "i-unknown", "status": "running"}],
            }))
            .await
            .assert_status_ok();

        let nb = env.store.exploratories.find(&ExploratoryKey::new("alice", "ds", "nb")).await.unwrap().unwrap();
        assert_eq!(nb.status, UserInstanceStatus::Stopped);
    }

    #[test_log::test(tokio::test)]
    async fn test_unknown_status_is_rejected() {
        let env = TestEnv::with_running_project().await;
        env.running_notebook("alice", "nb").await;
        let request_id = Uuid::new_v4();
        env.services.dispatcher.registry.put("alice", request_id).await.unwrap();

        env.server()
            .post("/api/infrastructure_provision/callback/exploratory")
            .add_header("authorization", callback_auth())
            .json(&json!({
                "request_id": request_id,
                "user": "alice",
                "project": "ds",
                "exploratory_name": "nb",
                "status": "hibernating",
            }))
            .await
            .assert_status_bad_request();
    }
}
