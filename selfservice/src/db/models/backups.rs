use crate::types::BackupId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Creating,
    Created,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Creating => "creating",
            BackupStatus::Created => "created",
            BackupStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<BackupStatus> {
        match s.trim().to_ascii_lowercase().as_str() {
            "creating" => Some(BackupStatus::Creating),
            "created" => Some(BackupStatus::Created),
            "failed" => Some(BackupStatus::Failed),
            _ => None,
        }
    }
}

/// What to include in a backup of the central node. `["all"]` selects everything of a kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct BackupRequest {
    pub config_files: Vec<String>,
    pub keys: Vec<String>,
    pub certificates: Vec<String>,
    pub jars: Vec<String>,
    pub database_backup: bool,
    pub logs_backup: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Backup {
    #[schema(value_type = String, format = "uuid")]
    pub id: BackupId,
    pub user: String,
    pub request: BackupRequest,
    pub status: BackupStatus,
    pub file_name: Option<String>,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}
