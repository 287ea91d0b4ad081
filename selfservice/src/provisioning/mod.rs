//! Client for the provisioning service.
//!
//! Every lifecycle action ends in a POST of an action document to the provisioning service of
//! the endpoint the resource lives on. The service answers with a request UUID immediately and
//! reports the outcome later through one of the callback routes; [`RequestIdRegistry`] keeps
//! track of which user each outstanding UUID belongs to.
//!
//! - [`ProvisioningService`]: the outbound seam, implemented over reqwest by
//!   [`ReqwestProvisioningService`] and by a recording fake in tests
//! - [`dto::RequestBuilder`]: builds the action documents
//! - [`callbacks`]: documents the provisioning service posts back
//! - [`billing::BillingSource`]: cost rows pulled from each endpoint

pub mod billing;
pub mod callbacks;
pub mod dto;
pub mod paths;
pub mod request_ids;

pub use request_ids::RequestIdRegistry;

use crate::config::ProvisioningConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// The provisioning service answered with a non-success status
    #[error("provisioning service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not reach provisioning service: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid provisioning url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unexpected response from provisioning service: {0}")]
    InvalidResponse(String),
}

/// Outbound calls to the provisioning service of an endpoint.
#[async_trait]
pub trait ProvisioningService: Send + Sync {
    /// POST an action document and return the request UUID the service assigned.
    async fn post(&self, base_url: &Url, path: &str, token: &str, body: &Value) -> Result<Uuid, ProvisioningError>;

    /// GET a JSON document.
    async fn get(&self, base_url: &Url, path: &str, token: &str) -> Result<Value, ProvisioningError>;
}

pub struct ReqwestProvisioningService {
    client: Client,
}

impl ReqwestProvisioningService {
    pub fn new(config: &ProvisioningConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client })
    }
}

/// Makes sure a url has a trailing slash, so that `join` appends instead of replacing the last
/// path segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let mut path = new_url.path().to_string();
        path.push('/');
        new_url.set_path(&path);
        new_url
    }
}

/// The provisioning service returns the request id either as a JSON string or as bare text.
fn parse_request_id(body: &str) -> Result<Uuid, ProvisioningError> {
    let trimmed = body.trim();
    let unquoted = serde_json::from_str::<String>(trimmed).unwrap_or_else(|_| trimmed.to_string());
    Uuid::parse_str(&unquoted).map_err(|_| ProvisioningError::InvalidResponse(format!("expected a request id, got '{trimmed}'")))
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProvisioningError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(status, "Provisioning service rejected request");
    Err(ProvisioningError::Status { status, body })
}

#[async_trait]
impl ProvisioningService for ReqwestProvisioningService {
    #[instrument(skip(self, token, body), fields(base_url = %base_url), err)]
    async fn post(&self, base_url: &Url, path: &str, token: &str, body: &Value) -> Result<Uuid, ProvisioningError> {
        let url = ensure_slash(base_url).join(path)?;
        debug!("Posting provisioning request to {}", url);

        let response = self.client.post(url).bearer_auth(token).json(body).send().await?;
        let text = check_status(response).await?.text().await?;
        parse_request_id(&text)
    }

    #[instrument(skip(self, token), fields(base_url = %base_url), err)]
    async fn get(&self, base_url: &Url, path: &str, token: &str) -> Result<Value, ProvisioningError> {
        let url = ensure_slash(base_url).join(path)?;
        debug!("Fetching {}", url);

        let response = self.client.get(url).bearer_auth(token).send().await?;
        let text = check_status(response).await?.text().await?;
        serde_json::from_str(&text).map_err(|e| ProvisioningError::InvalidResponse(format!("invalid JSON: {e}")))
    }
}
