use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// What a cost line was spent on, derived from its `datalab_id` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BillingResourceType {
    Exploratory,
    Computational,
    Edge,
    Ssn,
    Other,
}

impl BillingResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingResourceType::Exploratory => "exploratory",
            BillingResourceType::Computational => "computational",
            BillingResourceType::Edge => "edge",
            BillingResourceType::Ssn => "ssn",
            BillingResourceType::Other => "other",
        }
    }

    pub fn from_db_string(s: &str) -> Option<BillingResourceType> {
        match s {
            "exploratory" => Some(BillingResourceType::Exploratory),
            "computational" => Some(BillingResourceType::Computational),
            "edge" => Some(BillingResourceType::Edge),
            "ssn" => Some(BillingResourceType::Ssn),
            "other" => Some(BillingResourceType::Other),
            _ => None,
        }
    }
}

/// Cost of one resource for one day and product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BillingReportLine {
    /// Synthetic tag every cloud resource carries
    pub datalab_id: String,
    pub endpoint: Option<String>,
    pub user: Option<String>,
    pub project: Option<String>,
    pub exploratory_name: Option<String>,
    pub resource_name: Option<String>,
    pub resource_type: BillingResourceType,
    pub shape: Option<String>,
    pub product: String,
    pub usage_type: Option<String>,
    #[schema(value_type = String, format = Date)]
    pub usage_date: NaiveDate,
    pub cost: f64,
    pub currency: String,
}

/// Filter for billing lines. Empty lists match everything.
#[derive(Debug, Clone, Default)]
pub struct BillingFilter {
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub users: Vec<String>,
    pub projects: Vec<String>,
    pub resource_types: Vec<BillingResourceType>,
    pub datalab_ids: Vec<String>,
}

fn any_or_contains(list: &[String], value: Option<&String>) -> bool {
    list.is_empty() || value.is_some_and(|v| list.contains(v))
}

impl BillingFilter {
    pub fn matches(&self, line: &BillingReportLine) -> bool {
        self.date_start.is_none_or(|start| line.usage_date >= start)
            && self.date_end.is_none_or(|end| line.usage_date <= end)
            && any_or_contains(&self.users, line.user.as_ref())
            && any_or_contains(&self.projects, line.project.as_ref())
            && (self.resource_types.is_empty() || self.resource_types.contains(&line.resource_type))
            && (self.datalab_ids.is_empty() || self.datalab_ids.contains(&line.datalab_id))
    }
}

/// Billing lines of a window with their total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BillingReport {
    #[schema(value_type = Option<String>, format = Date)]
    pub date_start: Option<NaiveDate>,
    #[schema(value_type = Option<String>, format = Date)]
    pub date_end: Option<NaiveDate>,
    pub currency: String,
    pub total_cost: f64,
    pub lines: Vec<BillingReportLine>,
}
