//! API request and response data models.
//!
//! Request bodies are validated here before they reach a service; records coming back from the
//! store are converted into response types so the wire format can change independently of the
//! schema.

pub mod accepted;
pub mod audit;
pub mod backups;
pub mod billing;
pub mod computational;
pub mod endpoints;
pub mod environment;
pub mod exploratories;
pub mod libraries;
pub mod pagination;
pub mod projects;

use crate::errors::{Error, Result};

/// Longest name accepted for anything that ends up in a cloud resource name.
pub const MAX_NAME_LENGTH: usize = 64;

/// Record an error when `value` is not a usable resource name: non-empty, at most
/// [`MAX_NAME_LENGTH`] characters of ASCII letters, digits, `-` and `_`.
pub(crate) fn check_name(errors: &mut Vec<String>, field: &str, value: &str) {
    if value.is_empty() {
        errors.push(format!("{field} must not be empty"));
    } else if value.len() > MAX_NAME_LENGTH {
        errors.push(format!("{field} must be at most {MAX_NAME_LENGTH} characters"));
    } else if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        errors.push(format!("{field} may only contain letters, digits, '-' and '_'"));
    }
}

pub(crate) fn check_not_blank(errors: &mut Vec<String>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(format!("{field} must not be empty"));
    }
}

pub(crate) fn into_result(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() { Ok(()) } else { Err(Error::Validation { errors }) }
}
