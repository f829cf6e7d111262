//! Configuration validation system.

use super::types::BalancerConfig;
use std::collections::HashSet;

/// A single validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// Error message.
    pub message: String,
    /// Severity level.
    pub severity: ValidationSeverity,
}

impl ValidationError {
    /// Create a new error.
    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: ValidationSeverity::Error,
        }
    }

    /// Create a new warning.
    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: ValidationSeverity::Warning,
        }
    }
}

/// Severity of validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// Error - configuration is invalid.
    Error,
    /// Warning - configuration may have issues.
    Warning,
}

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    errors: Vec<ValidationError>,
}

impl ValidationResult {
    /// Create a new empty (valid) result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an error to the result.
    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Check if the validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self
            .errors
            .iter()
            .any(|e| e.severity == ValidationSeverity::Error)
    }

    /// Get all validation errors.
    #[must_use]
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Get only errors (not warnings).
    #[must_use]
    pub fn errors_only(&self) -> Vec<&ValidationError> {
        self.errors
            .iter()
            .filter(|e| e.severity == ValidationSeverity::Error)
            .collect()
    }

    /// Get only warnings.
    #[must_use]
    pub fn warnings(&self) -> Vec<&ValidationError> {
        self.errors
            .iter()
            .filter(|e| e.severity == ValidationSeverity::Warning)
            .collect()
    }

    /// Merge another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
    }
}

/// Trait for configuration validators.
pub trait Validator: std::fmt::Debug + Send + Sync {
    /// Validate a configuration and return any errors.
    fn validate(&self, config: &BalancerConfig) -> ValidationResult;
}

/// Range and uniqueness checks.
#[derive(Debug, Default)]
pub struct BasicValidator;

impl BasicValidator {
    /// Create a new basic validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for BasicValidator {
    fn validate(&self, config: &BalancerConfig) -> ValidationResult {
        let mut result = ValidationResult::new();
        let policy = &config.balancer;
        let health = &config.health_check;

        if policy.request_timeout.is_zero() {
            result.add_error(ValidationError::error(
                "balancer.request_timeout",
                "Request timeout cannot be 0",
            ));
        }
        if policy.hash_replicas == 0 {
            result.add_error(ValidationError::error(
                "balancer.hash_replicas",
                "Hash ring needs at least 1 replica per endpoint",
            ));
        }
        if policy.response_window == 0 {
            result.add_error(ValidationError::error(
                "balancer.response_window",
                "Response time window must be at least 1",
            ));
        }

        if health.unhealthy_retries == 0 {
            result.add_error(ValidationError::error(
                "health_check.unhealthy_retries",
                "Unhealthy retries must be at least 1",
            ));
        }
        if health.healthy_retries == 0 {
            result.add_error(ValidationError::error(
                "health_check.healthy_retries",
                "Healthy retries must be at least 1",
            ));
        }
        if health.enabled && health.interval.is_zero() {
            result.add_error(ValidationError::error(
                "health_check.interval",
                "Health check interval cannot be 0",
            ));
        }

        if config.endpoints.is_empty() {
            result.add_error(ValidationError::warning(
                "endpoints",
                "No endpoints configured; every request will be rejected",
            ));
        }

        // Check for duplicate endpoints
        let mut seen = HashSet::new();
        for endpoint in &config.endpoints {
            let name = endpoint.name();

            if endpoint.host.is_empty() {
                result.add_error(ValidationError::error(
                    "endpoints[].host",
                    "Endpoint host cannot be empty",
                ));
            }
            if endpoint.port == 0 {
                result.add_error(ValidationError::error(
                    format!("endpoints.{name}.port"),
                    "Endpoint port cannot be 0",
                ));
            }
            if endpoint.weight == 0 {
                result.add_error(ValidationError::warning(
                    format!("endpoints.{name}.weight"),
                    "Weight 0 is treated as 1",
                ));
            }
            if !seen.insert(name.clone()) {
                result.add_error(ValidationError::error(
                    format!("endpoints.{name}"),
                    format!("Duplicate endpoint: {name}"),
                ));
            }
        }

        result
    }
}

/// Checks that the persistence mode fits the strategy.
#[derive(Debug, Default)]
pub struct PersistenceValidator;

impl PersistenceValidator {
    /// Create a new persistence validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for PersistenceValidator {
    fn validate(&self, config: &BalancerConfig) -> ValidationResult {
        let mut result = ValidationResult::new();
        let policy = &config.balancer;

        if policy.strategy.is_ip_hash() && policy.persistence.is_cookie_based() {
            result.add_error(ValidationError::error(
                "balancer.persistence",
                format!(
                    "Strategy '{}' cannot be combined with cookie persistence",
                    policy.strategy
                ),
            ));
        }

        if policy.persistence.is_cookie_based() && config.affinity.cookie_name.trim().is_empty() {
            result.add_error(ValidationError::error(
                "affinity.cookie_name",
                "Cookie name is required for cookie persistence",
            ));
        }

        if policy.persistence == crate::balancer::PersistenceMode::ApplicationCookie
            && config.affinity.application_cookie.trim().is_empty()
        {
            result.add_error(ValidationError::error(
                "affinity.application_cookie",
                "Application cookie name is required for application-cookie persistence",
            ));
        }

        result
    }
}
