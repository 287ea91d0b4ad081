//! API request models for library installation.

use crate::errors::{Error, Result};
use crate::services::library::LibraryRequest;
use crate::types::ExploratoryKey;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// One library to install.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LibraryItem {
    #[schema(example = "pip3")]
    pub group: String,
    #[schema(example = "pandas")]
    pub name: String,
    #[schema(example = "2.2.0")]
    pub version: Option<String>,
}

impl From<LibraryItem> for LibraryRequest {
    fn from(item: LibraryItem) -> Self {
        Self {
            group: item.group,
            name: item.name,
            version: item.version,
        }
    }
}

/// Request body for installing libraries on a notebook, or on one of its clusters when
/// `computational_name` is set.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LibraryInstallRequest {
    pub project: String,
    pub exploratory_name: String,
    pub computational_name: Option<String>,
    pub libs: Vec<LibraryItem>,
}

impl LibraryInstallRequest {
    /// Every library needs a group and a name; the group must be one the target offers.
    pub fn validate(&self, groups: &[String]) -> Result<()> {
        let mut errors = Vec::new();
        for lib in &self.libs {
            if lib.name.trim().is_empty() {
                errors.push("library name must not be empty".to_string());
            }
            if !groups.contains(&lib.group) {
                errors.push(format!("library group '{}' is not available; expected one of {}", lib.group, groups.join(", ")));
            }
        }
        if errors.is_empty() { Ok(()) } else { Err(Error::Validation { errors }) }
    }
}

/// Query parameters addressing a notebook or one of its clusters
#[derive(Debug, Clone, Deserialize, IntoParams, ToSchema)]
pub struct LibraryTargetQuery {
    pub project: String,
    pub exploratory_name: String,
    pub computational_name: Option<String>,
}

impl LibraryTargetQuery {
    pub fn key(&self, user: &str) -> ExploratoryKey {
        ExploratoryKey::new(user, &self.project, &self.exploratory_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_unknown_group() {
        let request = LibraryInstallRequest {
            project: "ds".to_string(),
            exploratory_name: "nb".to_string(),
            computational_name: None,
            libs: vec![
                LibraryItem {
                    group: "pip3".to_string(),
                    name: "pandas".to_string(),
                    version: None,
                },
                LibraryItem {
                    group: "cran".to_string(),
                    name: "ggplot2".to_string(),
                    version: None,
                },
            ],
        };
        let groups = vec!["os_pkg".to_string(), "pip3".to_string()];
        let Err(Error::Validation { errors }) = request.validate(&groups) else {
            panic!("expected validation error");
        };
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("cran"));
    }
}
