use crate::AppState;
use crate::api::models::accepted::{AcceptedResponse, accepted};
use crate::api::models::libraries::{LibraryInstallRequest, LibraryTargetQuery};
use crate::auth::CurrentUser;
use crate::db::models::libraries::Library;
use crate::errors::Result;
use crate::types::ExploratoryKey;
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};

#[utoipa::path(
    post,
    path = "/infrastructure_provision/exploratory_environment/lib_install",
    tag = "libraries",
    summary = "Install libraries",
    request_body = LibraryInstallRequest,
    responses(
        (status = 202, description = "Installation dispatched", body = AcceptedResponse),
        (status = 404, description = "Notebook or cluster not found"),
        (status = 422, description = "Empty list or unknown library group"),
        (status = 500, description = "Target not running or provisioning failed")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn install_libraries(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<LibraryInstallRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>)> {
    let key = ExploratoryKey::new(&user.name, &request.project, &request.exploratory_name);
    let computational_name = request.computational_name.as_deref();
    let groups = state.services.library.lib_groups(&key, computational_name).await?;
    request.validate(&groups)?;

    let libs = request.libs.iter().cloned().map(Into::into).collect();
    let request_id = state.services.library.install(&user, &key, computational_name, libs).await?;
    Ok(accepted(request_id))
}

#[utoipa::path(
    get,
    path = "/infrastructure_provision/exploratory_environment/lib_list",
    tag = "libraries",
    summary = "List libraries",
    params(LibraryTargetQuery),
    responses(
        (status = 200, description = "Libraries on the notebook or cluster", body = Vec<Library>),
        (status = 404, description = "Notebook or cluster not found")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_libraries(
    State(state): State<AppState>,
    Query(query): Query<LibraryTargetQuery>,
    user: CurrentUser,
) -> Result<Json<Vec<Library>>> {
    let libs = state
        .services
        .library
        .list(&query.key(&user.name), query.computational_name.as_deref())
        .await?;
    Ok(Json(libs))
}

#[utoipa::path(
    get,
    path = "/infrastructure_provision/exploratory_environment/lib_groups",
    tag = "libraries",
    summary = "List library groups",
    params(LibraryTargetQuery),
    responses(
        (status = 200, description = "Package groups offered for the target", body = Vec<String>),
        (status = 404, description = "Notebook or cluster not found")
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_lib_groups(
    State(state): State<AppState>,
    Query(query): Query<LibraryTargetQuery>,
    user: CurrentUser,
) -> Result<Json<Vec<String>>> {
    let groups = state
        .services
        .library
        .lib_groups(&query.key(&user.name), query.computational_name.as_deref())
        .await?;
    Ok(Json(groups))
}
