use crate::AppState;
use crate::api::models::environment::{EnvironmentResponse, InfrastructureInfo, StoppedResponse};
use crate::auth::{CurrentUser, RequireAdmin};
use crate::errors::Result;
use axum::{
    Json,
    extract::{Path, State},
};

#[utoipa::path(
    get,
    path = "/infrastructure/info",
    tag = "environment",
    summary = "Caller's resources",
    responses((status = 200, description = "Projects, notebooks and budget usage", body = InfrastructureInfo)),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn infrastructure_info(State(state): State<AppState>, user: CurrentUser) -> Result<Json<InfrastructureInfo>> {
    Ok(Json(state.services.environment.user_resources(&user).await?.into()))
}

#[utoipa::path(
    get,
    path = "/environment/all",
    tag = "environment",
    summary = "Whole environment",
    responses(
        (status = 200, description = "Every project and live notebook", body = EnvironmentResponse),
        (status = 403, description = "Admin only")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn all_resources(State(state): State<AppState>, _: RequireAdmin) -> Result<Json<EnvironmentResponse>> {
    Ok(Json(state.services.environment.list_all_resources().await?.into()))
}

#[utoipa::path(
    post,
    path = "/environment/stop/{user}",
    tag = "environment",
    summary = "Stop a user's notebooks",
    params(("user" = String, Path)),
    responses(
        (status = 200, description = "Number of notebooks a stop was dispatched for", body = StoppedResponse),
        (status = 403, description = "Admin only")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn stop_user_environment(
    State(state): State<AppState>,
    Path(user): Path<String>,
    RequireAdmin(admin): RequireAdmin,
) -> Result<Json<StoppedResponse>> {
    let stopped = state.services.environment.stop_all_for_user(&admin, &user).await?;
    Ok(Json(StoppedResponse { stopped }))
}

#[cfg(test)]
mod tests {
    use crate::api::models::environment::{EnvironmentResponse, InfrastructureInfo, StoppedResponse};
    use crate::provisioning::paths;
    use crate::test_utils::TestEnv;

    #[test_log::test(tokio::test)]
    async fn test_infrastructure_info_lists_own_notebooks() {
        let env = TestEnv::with_running_project().await;
        env.running_notebook("alice", "nb").await;
        env.running_notebook("bob", "other").await;

        let info: InfrastructureInfo = env
            .server()
            .get("/api/infrastructure/info")
            .add_header("authorization", env.bearer(&env.user("alice")))
            .await
            .json();
        assert_eq!(info.projects.len(), 1);
        assert_eq!(info.exploratories.len(), 1);
        assert_eq!(info.exploratories[0].user, "alice");
    }

    #[test_log::test(tokio::test)]
    async fn test_admin_views_and_stops_environment() {
        let env = TestEnv::with_running_project().await;
        env.running_notebook("alice", "nb").await;
        env.running_notebook("bob", "other").await;
        let server = env.server();
        let admin = env.bearer(&env.admin());

        let all: EnvironmentResponse = server
            .get("/api/environment/all")
            .add_header("authorization", admin.clone())
            .await
            .json();
        assert_eq!(all.exploratories.len(), 2);

        let stopped: StoppedResponse = server
            .post("/api/environment/stop/alice")
            .add_header("authorization", admin)
            .await
            .json();
        assert_eq!(stopped.stopped, 1);
        assert_eq!(env.provisioning.paths(), vec![paths::EXPLORATORY_STOP.to_string()]);

        server
            .get("/api/environment/all")
            .add_header("authorization", env.bearer(&env.user("alice")))
            .await
            .assert_status_forbidden();
    }
}
