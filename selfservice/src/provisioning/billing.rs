//! Cost rows pulled from the billing agent of each endpoint.

use super::{ProvisioningError, ProvisioningService, paths};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

/// One cost row as reported by the cloud billing export, keyed by the `datalab_id` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBillingRow {
    pub datalab_id: String,
    pub product: String,
    pub usage_type: Option<String>,
    pub usage_date: NaiveDate,
    pub cost: f64,
    pub currency: Option<String>,
}

#[async_trait]
pub trait BillingSource: Send + Sync {
    /// Rows with usage dates in `[from, to]` for the endpoint at `base_url`.
    async fn fetch(&self, base_url: &Url, token: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<RawBillingRow>, ProvisioningError>;
}

/// Reads billing through the endpoint's provisioning service.
pub struct ProvisioningBillingSource {
    provisioning: Arc<dyn ProvisioningService>,
}

impl ProvisioningBillingSource {
    pub fn new(provisioning: Arc<dyn ProvisioningService>) -> Self {
        Self { provisioning }
    }
}

#[async_trait]
impl BillingSource for ProvisioningBillingSource {
    async fn fetch(&self, base_url: &Url, token: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<RawBillingRow>, ProvisioningError> {
        let path = format!("{}?date_start={from}&date_end={to}", paths::BILLING);
        let value = self.provisioning.get(base_url, &path, token).await?;
        serde_json::from_value(value).map_err(|e| ProvisioningError::InvalidResponse(format!("invalid billing rows: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvisioningConfig;
    use crate::provisioning::ReqwestProvisioningService;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test_log::test(tokio::test)]
    async fn test_fetch_passes_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/billing"))
            .and(query_param("date_start", "2026-10-01"))
            .and(query_param("date_end", "2026-10-19"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"datalab_id": "dlab-ds-local-alice-nb", "product": "EC2", "usage_type": null,
                 "usage_date": "2026-10-02", "cost": 1.5, "currency": "USD"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        crate::test_utils::install_crypto_provider();
        let provisioning = Arc::new(ReqwestProvisioningService::new(&ProvisioningConfig::default()).unwrap());
        let source = ProvisioningBillingSource::new(provisioning);
        let rows = source
            .fetch(
                &Url::parse(&server.uri()).unwrap(),
                "token",
                NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cost, 1.5);
        assert_eq!(rows[0].datalab_id, "dlab-ds-local-alice-nb");
    }
}
