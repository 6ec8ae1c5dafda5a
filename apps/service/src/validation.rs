use url::Url;

use crate::error::{CoordinatorError, CoordinatorResult};

/// Schemes a node may advertise as its relay endpoint
const RELAY_SCHEMES: [&str; 2] = ["rtmp", "rtmps"];

/// Validation results with specific error messages
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self { is_valid: true, error: None }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self { is_valid: false, error: Some(msg.into()) }
    }

    pub fn into_result(self) -> CoordinatorResult<()> {
        if self.is_valid {
            Ok(())
        } else {
            Err(CoordinatorError::Validation(
                self.error.unwrap_or_else(|| "Validation failed".to_string()),
            ))
        }
    }
}

/// Validate a node identifier
pub fn validate_node_id(node_id: &str) -> ValidationResult {
    if node_id.trim().is_empty() {
        return ValidationResult::err("node_id cannot be empty");
    }
    if node_id.len() > 128 {
        return ValidationResult::err("node_id must be at most 128 characters");
    }
    if node_id.chars().any(char::is_whitespace) {
        return ValidationResult::err("node_id cannot contain whitespace");
    }
    ValidationResult::ok()
}

/// Validate a node's HTTP/HTTPS stats endpoint
pub fn validate_stats_url(target: &str) -> ValidationResult {
    validate_url(target, &["http", "https"], "http:// or https://")
}

/// Validate a node-advertised relay endpoint
pub fn validate_relay_url(target: &str) -> ValidationResult {
    validate_url(target, &RELAY_SCHEMES, "rtmp:// or rtmps://")
}

fn validate_url(target: &str, schemes: &[&str], hint: &str) -> ValidationResult {
    if target.trim().is_empty() {
        return ValidationResult::err("URL cannot be empty");
    }

    match Url::parse(target) {
        Ok(url) => {
            let scheme = url.scheme();
            if !schemes.contains(&scheme) {
                return ValidationResult::err(format!("Invalid scheme '{scheme}'. Must be {hint}"));
            }

            if url.host_str().is_none_or(str::is_empty) {
                return ValidationResult::err("URL must have a valid host");
            }

            ValidationResult::ok()
        }
        Err(e) => {
            // If it fails to parse, check if it's missing a scheme
            if !target.contains("://") {
                ValidationResult::err(format!("URL must include scheme ({hint})"))
            } else {
                ValidationResult::err(format!("Invalid URL: {e}"))
            }
        }
    }
}
