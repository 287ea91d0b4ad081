//! Responses for actions the provisioning service carries out asynchronously.

use crate::types::RequestUuid;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The action was handed to the provisioning service; its outcome arrives on a callback.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AcceptedResponse {
    #[schema(value_type = String, format = "uuid")]
    pub request_id: RequestUuid,
}

pub fn accepted(request_id: RequestUuid) -> (StatusCode, Json<AcceptedResponse>) {
    (StatusCode::ACCEPTED, Json(AcceptedResponse { request_id }))
}

/// 202 with the request id when a termination was dispatched, 200 with an empty body when the
/// resource was already terminating or terminated.
pub fn terminated(request_id: Option<RequestUuid>) -> Response {
    match request_id {
        Some(request_id) => accepted(request_id).into_response(),
        None => StatusCode::OK.into_response(),
    }
}
