use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Installation state of a library on a notebook or cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LibStatus {
    Installing,
    Installed,
    Failed,
    InvalidVersion,
    InvalidName,
}

impl LibStatus {
    /// Parse a status string reported by the provisioning service.
    pub fn parse(s: &str) -> Option<LibStatus> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "installing" => Some(LibStatus::Installing),
            "installed" => Some(LibStatus::Installed),
            "failed" => Some(LibStatus::Failed),
            "invalid_version" => Some(LibStatus::InvalidVersion),
            "invalid_name" => Some(LibStatus::InvalidName),
            _ => None,
        }
    }
}

/// A library installed (or being installed) on a resource, unique by `group` and `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Library {
    /// Package manager group, e.g. `pip3`, `r_pkg`, `os_pkg`, `java`
    pub group: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub status: LibStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Dependencies pulled in alongside the library
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_deps: Vec<String>,
}

impl Library {
    pub fn same_package(&self, group: &str, name: &str) -> bool {
        self.group == group && self.name == name
    }
}

/// Merge `incoming` libraries into `current`, replacing entries with the same group and name.
pub fn merge_libraries(current: &mut Vec<Library>, incoming: impl IntoIterator<Item = Library>) {
    for lib in incoming {
        match current.iter_mut().find(|existing| existing.same_package(&lib.group, &lib.name)) {
            Some(existing) => *existing = lib,
            None => current.push(lib),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib(name: &str, version: &str, status: LibStatus) -> Library {
        Library {
            group: "pip3".to_string(),
            name: name.to_string(),
            version: Some(version.to_string()),
            status,
            error_message: None,
            add_deps: vec![],
        }
    }

    #[test]
    fn test_merge_replaces_by_group_and_name() {
        let mut current = vec![lib("numpy", "1.0", LibStatus::Installed), lib("pandas", "2.0", LibStatus::Failed)];
        merge_libraries(&mut current, vec![lib("pandas", "2.1", LibStatus::Installing), lib("scipy", "1.2", LibStatus::Installing)]);

        assert_eq!(current.len(), 3);
        assert_eq!(current[1].version.as_deref(), Some("2.1"));
        assert_eq!(current[1].status, LibStatus::Installing);
        assert_eq!(current[2].name, "scipy");
    }

    #[test]
    fn test_parse_lib_status() {
        assert_eq!(LibStatus::parse("INVALID VERSION"), Some(LibStatus::InvalidVersion));
        assert_eq!(LibStatus::parse("installed"), Some(LibStatus::Installed));
        assert_eq!(LibStatus::parse("queued"), None);
    }
}
