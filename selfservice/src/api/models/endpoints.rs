//! API request/response models for provisioning endpoints.

use super::{check_name, check_not_blank, into_result};
use crate::db::models::endpoints::{Endpoint, EndpointCreateDBRequest, EndpointStatus};
use crate::errors::{Error, Result};
use crate::types::CloudProvider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

/// Request body for registering an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EndpointCreateRequest {
    #[schema(example = "local")]
    pub name: String,
    /// Base URL of the endpoint's provisioning service
    #[schema(example = "https://provisioning.example.com:8084/")]
    pub url: String,
    #[schema(example = "local")]
    pub account: String,
    pub tag: Option<String>,
    pub cloud_provider: CloudProvider,
}

impl TryFrom<EndpointCreateRequest> for EndpointCreateDBRequest {
    type Error = Error;

    fn try_from(request: EndpointCreateRequest) -> Result<Self> {
        let mut errors = Vec::new();
        check_name(&mut errors, "name", &request.name);
        check_not_blank(&mut errors, "account", &request.account);
        let url = Url::parse(&request.url)
            .map_err(|e| errors.push(format!("url '{}' is invalid: {e}", request.url)))
            .ok();
        into_result(errors)?;
        let Some(url) = url else {
            return Err(Error::bad_request("url is invalid"));
        };
        Ok(Self {
            name: request.name,
            url,
            account: request.account,
            tag: request.tag,
            cloud_provider: request.cloud_provider,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EndpointResponse {
    pub name: String,
    pub url: String,
    pub account: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub cloud_provider: CloudProvider,
    pub status: EndpointStatus,
    pub created_at: DateTime<Utc>,
}

impl From<Endpoint> for EndpointResponse {
    fn from(db: Endpoint) -> Self {
        Self {
            name: db.name,
            url: db.url.to_string(),
            account: db.account,
            tag: db.tag,
            cloud_provider: db.cloud_provider,
            status: db.status,
            created_at: db.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> EndpointCreateRequest {
        EndpointCreateRequest {
            name: "local".to_string(),
            url: url.to_string(),
            account: "local".to_string(),
            tag: None,
            cloud_provider: CloudProvider::Gcp,
        }
    }

    #[test]
    fn test_url_is_parsed() {
        let db = EndpointCreateDBRequest::try_from(request("https://prov.example.com/")).unwrap();
        assert_eq!(db.url.host_str(), Some("prov.example.com"));

        let err = EndpointCreateDBRequest::try_from(request("not a url")).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
