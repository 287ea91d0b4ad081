use crate::db::errors::DbError;
use crate::provisioning::ProvisioningError;
use crate::status::TransitionError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use utoipa::ToSchema;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Caller is authenticated but may not act on the resource
    #[error("Insufficient permissions to {action} {resource}")]
    InsufficientPermissions { action: String, resource: String },

    /// Malformed request or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Request body failed field validation
    #[error("Validation failed: {}", errors.join("; "))]
    Validation { errors: Vec<String> },

    /// Requested resource not found
    #[error("{resource} {id} not found")]
    ResourceNotFound { resource: String, id: String },

    /// The resource exists but the action conflicts with its current state
    #[error("{message}")]
    ResourceConflict { message: String },

    /// A parent resource is in a status that does not allow the action
    #[error("{message}")]
    ResourceInappropriateState { message: String },

    /// A project or the whole installation has exhausted its budget
    #[error("{message}")]
    QuotaReached { message: String },

    /// A call to the provisioning service failed; the resource was marked failed
    #[error("Could not {operation}: {source}")]
    Datalab {
        operation: String,
        #[source]
        source: ProvisioningError,
    },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

impl Error {
    pub fn not_found(resource: &str, id: impl std::fmt::Display) -> Self {
        Error::ResourceNotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Error::ResourceConflict { message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest { message: message.into() }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
            Error::ResourceConflict { .. } => StatusCode::CONFLICT,
            Error::ResourceInappropriateState { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::QuotaReached { .. } => StatusCode::FORBIDDEN,
            Error::Datalab { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::InsufficientPermissions { action, resource } => {
                format!("Insufficient permissions to {action} {resource}")
            }
            Error::BadRequest { message }
            | Error::ResourceConflict { message }
            | Error::ResourceInappropriateState { message }
            | Error::QuotaReached { message } => message.clone(),
            Error::Validation { errors } => errors.join("; "),
            Error::ResourceNotFound { resource, id } => format!("{resource} {id} not found"),
            Error::Datalab { operation, .. } => format!("Could not {operation}. Please contact your administrator"),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { table, .. } => match table.as_deref() {
                    Some("exploratories") => "A notebook with this name already exists".to_string(),
                    Some("computational_resources") => "A cluster with this name already exists for the notebook".to_string(),
                    Some("projects") => "A project with this name already exists".to_string(),
                    Some("endpoints") => "An endpoint with this name already exists".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) | Error::Datalab { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::ResourceInappropriateState { .. } => {
                tracing::warn!("Inappropriate resource state: {}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::InsufficientPermissions { .. } | Error::QuotaReached { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. } | Error::Validation { .. } | Error::ResourceNotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
            Error::ResourceConflict { .. } => {
                tracing::warn!("Conflict error: {}", self);
            }
        }

        let status = self.status_code();
        let body = ErrorBody {
            code: status.as_u16(),
            message: self.user_message(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<TransitionError> for Error {
    fn from(err: TransitionError) -> Self {
        Error::ResourceConflict { message: err.to_string() }
    }
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{ResourceAction, UserInstanceStatus};

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::not_found("notebook", "x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(Error::conflict("busy").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            Error::ResourceInappropriateState { message: "no".into() }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(Error::Validation { errors: vec![] }.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(Error::Database(DbError::duplicate("projects", "pk", "a")).status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_transition_error_is_conflict() {
        let err: Error = UserInstanceStatus::Running.transition(ResourceAction::Start).unwrap_err().into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.user_message(), "cannot start a resource with status running");
    }

    #[test]
    fn test_provisioning_failure_hides_cause() {
        let err = Error::Datalab {
            operation: "start notebook".into(),
            source: ProvisioningError::Status {
                status: 502,
                body: "upstream secret detail".into(),
            },
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.user_message().contains("secret"));
    }
}
