use crate::AppState;
use crate::api::models::endpoints::{EndpointCreateRequest, EndpointResponse};
use crate::auth::{CurrentUser, RequireAdmin};
use crate::db::models::endpoints::EndpointCreateDBRequest;
use crate::errors::Result;
use crate::services::endpoint::EndpointHealth;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

#[utoipa::path(
    post,
    path = "/endpoint",
    tag = "endpoints",
    summary = "Register endpoint",
    request_body = EndpointCreateRequest,
    responses(
        (status = 201, description = "Endpoint registered", body = EndpointResponse),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Name or URL already registered"),
        (status = 422, description = "Invalid request body")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_endpoint(
    State(state): State<AppState>,
    RequireAdmin(user): RequireAdmin,
    Json(request): Json<EndpointCreateRequest>,
) -> Result<(StatusCode, Json<EndpointResponse>)> {
    let request = EndpointCreateDBRequest::try_from(request)?;
    let endpoint = state.services.endpoint.create(&user, request).await?;
    Ok((StatusCode::CREATED, Json(endpoint.into())))
}

#[utoipa::path(
    get,
    path = "/endpoint",
    tag = "endpoints",
    summary = "List endpoints",
    responses((status = 200, description = "Registered endpoints", body = Vec<EndpointResponse>)),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_endpoints(State(state): State<AppState>, _user: CurrentUser) -> Result<Json<Vec<EndpointResponse>>> {
    let endpoints = state.services.endpoint.list().await?;
    Ok(Json(endpoints.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/endpoint/{name}",
    tag = "endpoints",
    summary = "Get endpoint",
    params(("name" = String, Path)),
    responses(
        (status = 200, description = "Endpoint", body = EndpointResponse),
        (status = 404, description = "Endpoint not found")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_endpoint(State(state): State<AppState>, Path(name): Path<String>, _user: CurrentUser) -> Result<Json<EndpointResponse>> {
    Ok(Json(state.services.endpoint.get(&name).await?.into()))
}

#[utoipa::path(
    delete,
    path = "/endpoint/{name}",
    tag = "endpoints",
    summary = "Remove endpoint",
    params(("name" = String, Path)),
    responses(
        (status = 204, description = "Endpoint removed"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Endpoint not found"),
        (status = 409, description = "Notebooks on the endpoint are not terminated")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_endpoint(State(state): State<AppState>, Path(name): Path<String>, RequireAdmin(user): RequireAdmin) -> Result<StatusCode> {
    state.services.endpoint.remove(&user, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/endpoint/{name}/healthcheck",
    tag = "endpoints",
    summary = "Check endpoint health",
    description = "Pings the endpoint's provisioning service and records it active or inactive.",
    params(("name" = String, Path)),
    responses(
        (status = 200, description = "Health check result", body = EndpointHealth),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Endpoint not found")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn endpoint_health(State(state): State<AppState>, Path(name): Path<String>, RequireAdmin(user): RequireAdmin) -> Result<Json<EndpointHealth>> {
    Ok(Json(state.services.endpoint.status(&name, &user.token).await?))
}

#[cfg(test)]
mod tests {
    use crate::api::models::endpoints::EndpointResponse;
    use crate::db::models::endpoints::EndpointStatus;
    use crate::services::endpoint::EndpointHealth;
    use crate::test_utils::TestEnv;
    use serde_json::json;

    #[test_log::test(tokio::test)]
    async fn test_register_list_and_remove() {
        let env = TestEnv::new().await;
        let server = env.server();
        let admin = env.bearer(&env.admin());

        let created: EndpointResponse = server
            .post("/api/endpoint")
            .add_header("authorization", admin.clone())
            .json(&json!({
                "name": "remote",
                "url": "https://remote.example.com/",
                "account": "remote",
                "cloud_provider": "gcp"
            }))
            .await
            .json();
        assert_eq!(created.status, EndpointStatus::Active);

        let listed: Vec<EndpointResponse> = server
            .get("/api/endpoint")
            .add_header("authorization", env.bearer(&env.user("alice")))
            .await
            .json();
        assert_eq!(listed.len(), 1);

        server
            .delete("/api/endpoint/remote")
            .add_header("authorization", admin.clone())
            .await
            .assert_status(axum::http::StatusCode::NO_CONTENT);
        server
            .get("/api/endpoint/remote")
            .add_header("authorization", admin)
            .await
            .assert_status_not_found();
    }

    #[test_log::test(tokio::test)]
    async fn test_invalid_url_is_rejected() {
        let env = TestEnv::new().await;
        env.server()
            .post("/api/endpoint")
            .add_header("authorization", env.bearer(&env.admin()))
            .json(&json!({"name": "bad", "url": "::nope", "account": "a", "cloud_provider": "aws"}))
            .await
            .assert_status(axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test_log::test(tokio::test)]
    async fn test_healthcheck_reports_unreachable_endpoint() {
        let env = TestEnv::with_running_project().await;
        env.provisioning.fail_next();

        let health: EndpointHealth = env
            .server()
            .get("/api/endpoint/local/healthcheck")
            .add_header("authorization", env.bearer(&env.admin()))
            .await
            .json();
        assert_eq!(health.status, EndpointStatus::Inactive);
    }
}
