use crate::AppState;
use crate::api::models::accepted::{AcceptedResponse, accepted, terminated};
use crate::api::models::exploratories::{
    ExploratoryActionRequest, ExploratoryCreateRequest, ExploratoryReconfigureRequest, ExploratoryResponse, ImageCreateRequest,
    ListExploratoriesQuery,
};
use crate::auth::CurrentUser;
use crate::errors::Result;
use crate::types::ExploratoryKey;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
};

#[utoipa::path(
    put,
    path = "/infrastructure_provision/exploratory_environment",
    tag = "exploratory",
    summary = "Create notebook",
    request_body = ExploratoryCreateRequest,
    responses(
        (status = 202, description = "Creation dispatched", body = AcceptedResponse),
        (status = 403, description = "Not a project member, or the budget is spent"),
        (status = 409, description = "A notebook with this name already exists"),
        (status = 422, description = "Invalid request body"),
        (status = 500, description = "Edge not running or provisioning failed")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_exploratory(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<ExploratoryCreateRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>)> {
    request.validate()?;
    let request_id = state.services.exploratory.create(&user, request.into()).await?;
    Ok(accepted(request_id))
}

#[utoipa::path(
    post,
    path = "/infrastructure_provision/exploratory_environment",
    tag = "exploratory",
    summary = "Start notebook",
    request_body = ExploratoryActionRequest,
    responses(
        (status = 202, description = "Start dispatched", body = AcceptedResponse),
        (status = 404, description = "Notebook not found"),
        (status = 409, description = "Notebook is not stopped")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn start_exploratory(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<ExploratoryActionRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>)> {
    let request_id = state.services.exploratory.start(&user, &request.project, &request.name).await?;
    Ok(accepted(request_id))
}

#[utoipa::path(
    delete,
    path = "/infrastructure_provision/exploratory_environment/{project}/{name}/stop",
    tag = "exploratory",
    summary = "Stop notebook",
    params(("project" = String, Path), ("name" = String, Path)),
    responses(
        (status = 202, description = "Stop dispatched", body = AcceptedResponse),
        (status = 404, description = "Notebook not found"),
        (status = 409, description = "Notebook is not running")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn stop_exploratory(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
    user: CurrentUser,
) -> Result<(StatusCode, Json<AcceptedResponse>)> {
    let request_id = state.services.exploratory.stop(&user, &project, &name).await?;
    Ok(accepted(request_id))
}

#[utoipa::path(
    delete,
    path = "/infrastructure_provision/exploratory_environment/{project}/{name}/terminate",
    tag = "exploratory",
    summary = "Terminate notebook",
    params(("project" = String, Path), ("name" = String, Path)),
    responses(
        (status = 202, description = "Termination dispatched", body = AcceptedResponse),
        (status = 200, description = "Already terminating or terminated"),
        (status = 404, description = "Notebook not found")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn terminate_exploratory(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
    user: CurrentUser,
) -> Result<Response> {
    let request_id = state.services.exploratory.terminate(&user, &project, &name).await?;
    Ok(terminated(request_id))
}

#[utoipa::path(
    put,
    path = "/infrastructure_provision/exploratory_environment/reconfigure",
    tag = "exploratory",
    summary = "Reconfigure notebook Spark",
    request_body = ExploratoryReconfigureRequest,
    responses(
        (status = 202, description = "Reconfiguration dispatched", body = AcceptedResponse),
        (status = 404, description = "Notebook not found"),
        (status = 409, description = "Notebook is not running")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn reconfigure_exploratory(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<ExploratoryReconfigureRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>)> {
    let request_id = state
        .services
        .exploratory
        .reconfigure(&user, &request.project, &request.name, request.config)
        .await?;
    Ok(accepted(request_id))
}

#[utoipa::path(
    post,
    path = "/infrastructure_provision/exploratory_environment/{project}/{name}/image",
    tag = "exploratory",
    summary = "Create image from notebook",
    params(("project" = String, Path), ("name" = String, Path)),
    request_body = ImageCreateRequest,
    responses(
        (status = 202, description = "Image creation dispatched", body = AcceptedResponse),
        (status = 409, description = "Notebook is not running")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_image(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
    user: CurrentUser,
    Json(request): Json<ImageCreateRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>)> {
    request.validate()?;
    let request_id = state
        .services
        .exploratory
        .create_image(&user, &project, &name, &request.name, request.description.as_deref())
        .await?;
    Ok(accepted(request_id))
}

#[utoipa::path(
    get,
    path = "/infrastructure_provision/exploratory_environment/{project}/{name}",
    tag = "exploratory",
    summary = "Get notebook",
    params(("project" = String, Path), ("name" = String, Path)),
    responses(
        (status = 200, description = "Notebook with its clusters", body = ExploratoryResponse),
        (status = 404, description = "Notebook not found")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_exploratory(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
    user: CurrentUser,
) -> Result<Json<ExploratoryResponse>> {
    let record = state
        .services
        .exploratory
        .get(&ExploratoryKey::new(&user.name, project, name))
        .await?;
    Ok(Json(record.into()))
}

#[utoipa::path(
    get,
    path = "/infrastructure_provision/exploratory_environment",
    tag = "exploratory",
    summary = "List own notebooks",
    params(ListExploratoriesQuery),
    responses((status = 200, description = "The caller's notebooks", body = Vec<ExploratoryResponse>)),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_exploratories(
    State(state): State<AppState>,
    Query(query): Query<ListExploratoriesQuery>,
    user: CurrentUser,
) -> Result<Json<Vec<ExploratoryResponse>>> {
    let records = state.services.exploratory.list(&user, query.project.as_deref()).await?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}

#[cfg(test)]
mod tests {
    use crate::api::models::accepted::AcceptedResponse;
    use crate::api::models::exploratories::ExploratoryResponse;
    use crate::provisioning::paths;
    use crate::status::UserInstanceStatus;
    use crate::test_utils::TestEnv;
    use serde_json::json;

    const BASE: &str = "/api/infrastructure_provision/exploratory_environment";

    #[test_log::test(tokio::test)]
    async fn test_create_returns_accepted_with_request_id() {
        let env = TestEnv::with_running_project().await;
        let server = env.server();
        let alice = env.user("alice");

        let response = server
            .put(BASE)
            .add_header("authorization", env.bearer(&alice))
            .json(&json!({
                "project": "ds",
                "endpoint": "local",
                "name": "nb",
                "template_name": "Jupyter notebook",
                "image": "docker.datalab-jupyter",
                "shape": "t2.medium"
            }))
            .await;

        response.assert_status(axum::http::StatusCode::ACCEPTED);
        let body: AcceptedResponse = response.json();
        assert_eq!(env.provisioning.last_request_id(), Some(body.request_id));
        assert_eq!(env.provisioning.paths(), vec![paths::EXPLORATORY_CREATE.to_string()]);
    }

    #[test_log::test(tokio::test)]
    async fn test_create_rejects_invalid_name() {
        let env = TestEnv::with_running_project().await;
        let server = env.server();

        let response = server
            .put(BASE)
            .add_header("authorization", env.bearer(&env.user("alice")))
            .json(&json!({
                "project": "ds",
                "endpoint": "local",
                "name": "not valid!",
                "template_name": "Jupyter notebook",
                "image": "docker.datalab-jupyter",
                "shape": "t2.medium"
            }))
            .await;

        response.assert_status(axum::http::StatusCode::UNPROCESSABLE_ENTITY);
        assert!(env.provisioning.paths().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_requests_without_token_are_rejected() {
        let env = TestEnv::with_running_project().await;
        let response = env.server().get(BASE).await;
        response.assert_status_unauthorized();
    }

    #[test_log::test(tokio::test)]
    async fn test_stop_then_stop_again_conflicts() {
        let env = TestEnv::with_running_project().await;
        env.running_notebook("alice", "nb").await;
        let server = env.server();
        let auth = env.bearer(&env.user("alice"));

        server
            .delete(&format!("{BASE}/ds/nb/stop"))
            .add_header("authorization", auth.clone())
            .await
            .assert_status(axum::http::StatusCode::ACCEPTED);

        server
            .delete(&format!("{BASE}/ds/nb/stop"))
            .add_header("authorization", auth.clone())
            .await
            .assert_status(axum::http::StatusCode::CONFLICT);

        let record: ExploratoryResponse = server
            .get(&format!("{BASE}/ds/nb"))
            .add_header("authorization", auth)
            .await
            .json();
        assert_eq!(record.status, UserInstanceStatus::Stopping);
    }

    #[test_log::test(tokio::test)]
    async fn test_terminate_twice_is_accepted_then_ok() {
        let env = TestEnv::with_running_project().await;
        env.running_notebook("alice", "nb").await;
        let server = env.server();
        let auth = env.bearer(&env.user("alice"));

        server
            .delete(&format!("{BASE}/ds/nb/terminate"))
            .add_header("authorization", auth.clone())
            .await
            .assert_status(axum::http::StatusCode::ACCEPTED);
        server
            .delete(&format!("{BASE}/ds/nb/terminate"))
            .add_header("authorization", auth)
            .await
            .assert_status_ok();
        assert_eq!(env.provisioning.paths(), vec![paths::EXPLORATORY_TERMINATE.to_string()]);
    }

    #[test_log::test(tokio::test)]
    async fn test_notebooks_of_other_users_are_not_visible() {
        let env = TestEnv::with_running_project().await;
        env.running_notebook("alice", "nb").await;
        let server = env.server();

        server
            .get(&format!("{BASE}/ds/nb"))
            .add_header("authorization", env.bearer(&env.user("bob")))
            .await
            .assert_status_not_found();

        let listed: Vec<ExploratoryResponse> = server
            .get(BASE)
            .add_header("authorization", env.bearer(&env.user("alice")))
            .await
            .json();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].exploratory_name, "nb");
    }
}
