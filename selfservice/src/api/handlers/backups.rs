use crate::AppState;
use crate::api::models::backups::BackupCreatedResponse;
use crate::auth::RequireAdmin;
use crate::db::models::backups::{Backup, BackupRequest};
use crate::errors::Result;
use crate::types::BackupId;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

#[utoipa::path(
    post,
    path = "/infrastructure/backup",
    tag = "backups",
    summary = "Create backup",
    request_body = BackupRequest,
    responses(
        (status = 202, description = "Backup requested", body = BackupCreatedResponse),
        (status = 403, description = "Admin only"),
        (status = 500, description = "Provisioning service unreachable; the backup is recorded as failed")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_backup(
    State(state): State<AppState>,
    RequireAdmin(user): RequireAdmin,
    Json(request): Json<BackupRequest>,
) -> Result<(StatusCode, Json<BackupCreatedResponse>)> {
    let id = state.services.backup.create(&user, request).await?;
    Ok((StatusCode::ACCEPTED, Json(BackupCreatedResponse { id })))
}

#[utoipa::path(
    get,
    path = "/infrastructure/backup",
    tag = "backups",
    summary = "List backups",
    responses((status = 200, description = "Backups requested by the caller", body = Vec<Backup>)),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_backups(State(state): State<AppState>, RequireAdmin(user): RequireAdmin) -> Result<Json<Vec<Backup>>> {
    Ok(Json(state.services.backup.list(&user).await?))
}

#[utoipa::path(
    get,
    path = "/infrastructure/backup/{id}",
    tag = "backups",
    summary = "Get backup",
    params(("id" = String, Path, format = "uuid")),
    responses(
        (status = 200, description = "Backup", body = Backup),
        (status = 404, description = "Backup not found")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_backup(State(state): State<AppState>, Path(id): Path<BackupId>, RequireAdmin(user): RequireAdmin) -> Result<Json<Backup>> {
    Ok(Json(state.services.backup.get(&user, id).await?))
}

#[cfg(test)]
mod tests {
    use crate::api::models::backups::BackupCreatedResponse;
    use crate::db::models::backups::{Backup, BackupStatus};
    use crate::test_utils::TestEnv;
    use serde_json::json;

    #[test_log::test(tokio::test)]
    async fn test_create_and_get_backup() {
        let env = TestEnv::new().await;
        let server = env.server();
        let admin = env.bearer(&env.admin());

        let response = server
            .post("/api/infrastructure/backup")
            .add_header("authorization", admin.clone())
            .json(&json!({"config_files": ["all"], "database_backup": true}))
            .await;
        response.assert_status(axum::http::StatusCode::ACCEPTED);
        let created: BackupCreatedResponse = response.json();

        let backup: Backup = server
            .get(&format!("/api/infrastructure/backup/{}", created.id))
            .add_header("authorization", admin)
            .await
            .json();
        assert_eq!(backup.status, BackupStatus::Creating);
        assert!(backup.request.database_backup);
    }

    #[test_log::test(tokio::test)]
    async fn test_backups_are_admin_only() {
        let env = TestEnv::new().await;
        env.server()
            .get("/api/infrastructure/backup")
            .add_header("authorization", env.bearer(&env.user("alice")))
            .await
            .assert_status_forbidden();
    }
}
