//! API response model for backups; the request body is [`BackupRequest`] itself.
//!
//! [`BackupRequest`]: crate::db::models::backups::BackupRequest

use crate::types::BackupId;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The backup was recorded and handed to the provisioning service.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BackupCreatedResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: BackupId,
}
