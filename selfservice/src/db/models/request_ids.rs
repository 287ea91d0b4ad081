use crate::types::RequestUuid;
use chrono::{DateTime, Utc};

/// Correlation id handed out by the provisioning service, mapped to the user who made the call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestId {
    pub id: RequestUuid,
    pub user: String,
    pub request_time: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
}
