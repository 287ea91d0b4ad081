//! Billing collection, reports and budget quotas.
//!
//! Quota usage is `cost / budget * 100`; a quota is reached at 100%. A missing or zero budget is
//! unlimited. Monthly budgets count only cost with usage dates in the current calendar month.

use crate::config::BillingConfig;
use crate::db::Store;
use crate::db::handlers::{BillingDao, EndpointDao, ExploratoryDao, ProjectDao};
use crate::db::models::billing::{BillingFilter, BillingReport, BillingReportLine, BillingResourceType};
use crate::db::models::endpoints::EndpointStatus;
use crate::db::models::exploratories::ExploratoryFilter;
use crate::db::models::projects::Budget;
use crate::errors::{Error, Result};
use crate::provisioning::billing::{BillingSource, RawBillingRow};
use crate::services::Dispatcher;
use chrono::{Datelike, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Who a cost allocation tag belongs to.
#[derive(Debug, Clone)]
struct TagOwner {
    user: Option<String>,
    project: Option<String>,
    exploratory_name: Option<String>,
    resource_name: Option<String>,
    resource_type: BillingResourceType,
    shape: Option<String>,
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Rounded to two decimals so that summed fractional costs reach 100% exactly.
fn usage_percent(cost: f64, limit: f64) -> f64 {
    (cost / limit * 10_000.0).round() / 100.0
}

#[derive(Clone)]
pub struct BillingService {
    billing: Arc<dyn BillingDao>,
    projects: Arc<dyn ProjectDao>,
    exploratories: Arc<dyn ExploratoryDao>,
    endpoints: Arc<dyn EndpointDao>,
    source: Arc<dyn BillingSource>,
    dispatcher: Dispatcher,
    config: BillingConfig,
}

impl BillingService {
    pub fn new(store: &Store, source: Arc<dyn BillingSource>, dispatcher: Dispatcher, config: &BillingConfig) -> Self {
        Self {
            billing: store.billing.clone(),
            projects: store.projects.clone(),
            exploratories: store.exploratories.clone(),
            endpoints: store.endpoints.clone(),
            source,
            dispatcher,
            config: config.clone(),
        }
    }

    /// Index every known cost allocation tag on an endpoint.
    async fn tag_owners(&self, endpoint: &str) -> Result<HashMap<String, TagOwner>> {
        let builder = &self.dispatcher.builder;
        let mut owners = HashMap::new();

        let filter = ExploratoryFilter {
            endpoint: Some(endpoint.to_string()),
            ..Default::default()
        };
        for exploratory in self.exploratories.list(&filter).await? {
            owners.insert(
                builder.exploratory_tag(&exploratory),
                TagOwner {
                    user: Some(exploratory.user.clone()),
                    project: Some(exploratory.project.clone()),
                    exploratory_name: Some(exploratory.exploratory_name.clone()),
                    resource_name: Some(exploratory.exploratory_name.clone()),
                    resource_type: BillingResourceType::Exploratory,
                    shape: Some(exploratory.shape.clone()),
                },
            );
            for cluster in &exploratory.computational_resources {
                owners.insert(
                    builder.computational_tag(&exploratory, &cluster.computational_name),
                    TagOwner {
                        user: Some(exploratory.user.clone()),
                        project: Some(exploratory.project.clone()),
                        exploratory_name: Some(exploratory.exploratory_name.clone()),
                        resource_name: Some(cluster.computational_name.clone()),
                        resource_type: BillingResourceType::Computational,
                        shape: Some(cluster.master_shape.clone()),
                    },
                );
            }
        }

        for project in self.projects.list().await? {
            if project.endpoint(endpoint).is_some() {
                owners.insert(
                    builder.edge_tag(&project.name, endpoint),
                    TagOwner {
                        user: None,
                        project: Some(project.name.clone()),
                        exploratory_name: None,
                        resource_name: Some(format!("{}-edge", project.name)),
                        resource_type: BillingResourceType::Edge,
                        shape: None,
                    },
                );
            }
        }

        Ok(owners)
    }

    /// Sum raw rows per `(datalab_id, usage_date)` and attach the owning resource.
    fn aggregate(&self, endpoint: &str, rows: Vec<RawBillingRow>, owners: &HashMap<String, TagOwner>) -> Vec<BillingReportLine> {
        let mut grouped: BTreeMap<(String, NaiveDate), BillingReportLine> = BTreeMap::new();
        for row in rows {
            let key = (row.datalab_id.clone(), row.usage_date);
            match grouped.get_mut(&key) {
                Some(line) => {
                    line.cost += row.cost;
                    if !line.product.split(", ").any(|p| p == row.product) {
                        line.product = format!("{}, {}", line.product, row.product);
                    }
                }
                None => {
                    let owner = owners.get(&row.datalab_id);
                    let resource_type = match owner {
                        Some(owner) => owner.resource_type,
                        None if row.datalab_id.ends_with("-ssn") => BillingResourceType::Ssn,
                        None => BillingResourceType::Other,
                    };
                    grouped.insert(
                        key,
                        BillingReportLine {
                            datalab_id: row.datalab_id,
                            endpoint: Some(endpoint.to_string()),
                            user: owner.and_then(|o| o.user.clone()),
                            project: owner.and_then(|o| o.project.clone()),
                            exploratory_name: owner.and_then(|o| o.exploratory_name.clone()),
                            resource_name: owner.and_then(|o| o.resource_name.clone()),
                            resource_type,
                            shape: owner.and_then(|o| o.shape.clone()),
                            product: row.product,
                            usage_type: row.usage_type,
                            usage_date: row.usage_date,
                            cost: row.cost,
                            currency: row.currency.unwrap_or_else(|| self.config.currency.clone()),
                        },
                    );
                }
            }
        }
        grouped.into_values().collect()
    }

    /// Pull billing for `[from, to]` from every active endpoint and replace the stored lines.
    ///
    /// An endpoint that cannot be reached is skipped; its stored lines are kept.
    #[instrument(skip(self, token), err)]
    pub async fn collect(&self, token: &str, from: NaiveDate, to: NaiveDate) -> Result<usize> {
        let mut collected = 0;
        for endpoint in self.endpoints.list().await? {
            if endpoint.status != EndpointStatus::Active {
                continue;
            }
            let rows = match self.source.fetch(&endpoint.url, token, from, to).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(endpoint = %endpoint.name, "Skipping billing for endpoint: {e}");
                    continue;
                }
            };
            let owners = self.tag_owners(&endpoint.name).await?;
            let lines = self.aggregate(&endpoint.name, rows, &owners);
            collected += lines.len();
            self.billing.replace_lines(&endpoint.name, from, to, &lines).await?;
        }
        info!(collected, "Collected billing lines");
        Ok(collected)
    }

    /// Collect the current month up to today.
    pub async fn collect_current_month(&self, token: &str) -> Result<usize> {
        let today = Utc::now().date_naive();
        self.collect(token, first_of_month(today), today).await
    }

    pub async fn report(&self, filter: &BillingFilter) -> Result<BillingReport> {
        let lines = self.billing.lines(filter).await?;
        let total_cost = lines.iter().map(|l| l.cost).sum();
        let currency = lines
            .first()
            .map(|l| l.currency.clone())
            .unwrap_or_else(|| self.config.currency.clone());
        Ok(BillingReport {
            date_start: filter.date_start.or_else(|| lines.iter().map(|l| l.usage_date).min()),
            date_end: filter.date_end.or_else(|| lines.iter().map(|l| l.usage_date).max()),
            currency,
            total_cost,
            lines,
        })
    }

    fn since(&self, monthly: bool) -> Option<NaiveDate> {
        monthly.then(|| first_of_month(Utc::now().date_naive()))
    }

    async fn budget_usage(&self, project: &str, budget: &Budget) -> Result<Option<f64>> {
        let Some(limit) = budget.limit() else {
            return Ok(None);
        };
        let cost = self.billing.project_cost(project, self.since(budget.monthly_budget)).await?;
        Ok(Some(usage_percent(cost, limit as f64)))
    }

    /// Percentage of the project budget used; `None` when the project has no budget.
    pub async fn project_quota_used(&self, project: &str) -> Result<Option<f64>> {
        let record = self.projects.get(project).await?.ok_or_else(|| Error::not_found("Project", project))?;
        self.budget_usage(project, &record.budget).await
    }

    pub async fn is_project_quota_reached(&self, project: &str) -> Result<bool> {
        Ok(self.project_quota_used(project).await?.is_some_and(|used| used >= 100.0))
    }

    /// Percentage of the installation budget used; `None` when there is no total budget.
    pub async fn total_quota_used(&self) -> Result<Option<f64>> {
        let Some(limit) = self.config.total_budget.filter(|b| *b > 0.0) else {
            return Ok(None);
        };
        let cost = self.billing.total_cost(self.since(self.config.monthly_total_budget)).await?;
        Ok(Some(usage_percent(cost, limit)))
    }

    pub async fn is_total_quota_reached(&self) -> Result<bool> {
        Ok(self.total_quota_used().await?.is_some_and(|used| used >= 100.0))
    }

    /// Refuse to start new work in a project whose budget, or the installation's, is exhausted.
    pub async fn check_quota(&self, project: &str) -> Result<()> {
        if self.is_total_quota_reached().await? {
            return Err(Error::QuotaReached {
                message: "The total budget of the installation is exhausted".to_string(),
            });
        }
        if self.is_project_quota_reached(project).await? {
            return Err(Error::QuotaReached {
                message: format!("Project {project} has exhausted its budget"),
            });
        }
        Ok(())
    }
}
