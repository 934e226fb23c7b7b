//! Validation of release configurations and declared backends.
//!
//! This module checks configuration values and the endpoints of a "want"
//! backend before anything is planned, so obviously broken input never
//! reaches the control plane.

use crate::backend::{Backend, Endpoint, Platform, Trigger, PRIVATE_INVOKER, PUBLIC_INVOKER};
use crate::error::{ConfigError, ReleaseError, Result};
use crate::planner::parse_filter;
use tracing::debug;

use super::spec::{ExecutorConfig, PollerConfig, ReleaseConfig};

/// Highest per-instance concurrency accepted by v2 functions.
const MAX_CONCURRENCY: u32 = 1000;

/// Validator for release configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a release configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails.
    pub fn validate(&self, config: &ReleaseConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_project(config, &mut result);
        Self::validate_executor("executors.heavy", &config.executors.heavy, &mut result);
        Self::validate_executor("executors.light", &config.executors.light, &mut result);
        Self::validate_poller("pollers.v1", &config.pollers.v1, &mut result);
        Self::validate_poller("pollers.v2", &config.pollers.v2, &mut result);
        Self::validate_filters(&config.planner.only, &mut result);

        if config.sources.v1_source_url.is_none() && config.sources.v2_storage.is_none() {
            result.warnings.push(String::from(
                "sources: no upload location configured; creates and updates will fail",
            ));
        }

        Self::finish(result)
    }

    /// Validates the endpoints of a declared backend.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails.
    pub fn validate_backend(&self, backend: &Backend) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        if backend.is_empty() {
            result.warnings.push(String::from("No endpoints declared"));
        }

        for endpoint in backend.all_endpoints() {
            Self::validate_endpoint(endpoint, &mut result);
        }

        Self::finish(result)
    }

    fn finish(result: ValidationResult) -> Result<ValidationResult> {
        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(ReleaseError::Config(ConfigError::validation(
                first_error.message.clone(),
                first_error.field.clone(),
            )))
        }
    }

    fn validate_project(config: &ReleaseConfig, result: &mut ValidationResult) {
        if config.project.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("project"),
                message: String::from("Project id cannot be empty"),
            });
        } else if !is_valid_name(&config.project) {
            result.errors.push(ValidationError {
                field: String::from("project"),
                message: format!(
                    "Project id '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    config.project
                ),
            });
        }

        if config.app_engine_location.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("app_engine_location"),
                message: String::from("App Engine location cannot be empty"),
            });
        }
    }

    fn validate_executor(prefix: &str, executor: &ExecutorConfig, result: &mut ValidationResult) {
        if executor.concurrency == 0 {
            result.errors.push(ValidationError {
                field: format!("{prefix}.concurrency"),
                message: String::from("Concurrency must be at least 1"),
            });
        }

        if executor.max_backoff_ms < executor.backoff_ms {
            result.errors.push(ValidationError {
                field: format!("{prefix}.max_backoff_ms"),
                message: format!(
                    "Maximum backoff ({}ms) is lower than the initial backoff ({}ms)",
                    executor.max_backoff_ms, executor.backoff_ms
                ),
            });
        }

        if executor.retries == 0 {
            result
                .warnings
                .push(format!("{prefix}.retries: quota errors will not be retried"));
        }
    }

    fn validate_poller(prefix: &str, poller: &PollerConfig, result: &mut ValidationResult) {
        if !poller.api_origin.starts_with("https://") && !poller.api_origin.starts_with("http://") {
            result.errors.push(ValidationError {
                field: format!("{prefix}.api_origin"),
                message: format!("API origin must be an http(s) URL: {}", poller.api_origin),
            });
        } else if poller.api_origin.starts_with("http://") {
            result
                .warnings
                .push(format!("{prefix}.api_origin: plain http should only be used for emulators"));
        }

        if poller.master_timeout_secs == 0 {
            result.errors.push(ValidationError {
                field: format!("{prefix}.master_timeout_secs"),
                message: String::from("Master timeout must be at least 1 second"),
            });
        }

        if poller.backoff_ms == 0 {
            result.errors.push(ValidationError {
                field: format!("{prefix}.backoff_ms"),
                message: String::from("Poll backoff must be at least 1 millisecond"),
            });
        }

        if poller.max_backoff_ms < poller.backoff_ms {
            result.errors.push(ValidationError {
                field: format!("{prefix}.max_backoff_ms"),
                message: String::from("Maximum poll backoff is lower than the initial backoff"),
            });
        }
    }

    fn validate_filters(filters: &[String], result: &mut ValidationResult) {
        for (i, filter) in filters.iter().enumerate() {
            if parse_filter(filter).is_empty() {
                result.errors.push(ValidationError {
                    field: format!("planner.only[{i}]"),
                    message: format!("Filter '{filter}' does not name any function"),
                });
            }
        }
    }

    fn validate_endpoint(endpoint: &Endpoint, result: &mut ValidationResult) {
        let prefix = format!("endpoints.{}", endpoint.label());

        if endpoint.concurrency.is_some() && endpoint.platform == Platform::V1 {
            result.errors.push(ValidationError {
                field: format!("{prefix}.concurrency"),
                message: String::from("Concurrency is only supported by v2 functions"),
            });
        }

        if let Some(concurrency) = endpoint.concurrency
            && !(1..=MAX_CONCURRENCY).contains(&concurrency)
        {
            result.errors.push(ValidationError {
                field: format!("{prefix}.concurrency"),
                message: format!("Concurrency must be between 1 and {MAX_CONCURRENCY}"),
            });
        }

        if let (Some(min), Some(max)) = (endpoint.min_instances, endpoint.max_instances)
            && min > max
        {
            result.errors.push(ValidationError {
                field: format!("{prefix}.min_instances"),
                message: format!("minInstances ({min}) exceeds maxInstances ({max})"),
            });
        }

        if let Some(invoker) = endpoint.invoker()
            && invoker.len() > 1
            && invoker
                .iter()
                .any(|m| m == PUBLIC_INVOKER || m == PRIVATE_INVOKER)
        {
            result.errors.push(ValidationError {
                field: format!("{prefix}.invoker"),
                message: String::from(
                    "'public' and 'private' cannot be combined with other members",
                ),
            });
        }

        match &endpoint.trigger {
            Trigger::ScheduleTrigger(schedule) if schedule.schedule.trim().is_empty() => {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.scheduleTrigger.schedule"),
                    message: String::from("Schedule cannot be empty"),
                });
            }
            Trigger::EventTrigger(event) if event.event_type.is_empty() => {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.eventTrigger.eventType"),
                    message: String::from("Event type cannot be empty"),
                });
            }
            Trigger::EventTrigger(_) if endpoint.is_pubsub_triggered() => {
                let has_topic = endpoint
                    .event_trigger()
                    .is_some_and(|t| t.event_filters.contains_key(crate::backend::TOPIC_FILTER));
                if !has_topic {
                    result.errors.push(ValidationError {
                        field: format!("{prefix}.eventTrigger.eventFilters"),
                        message: String::from("Pub/Sub triggers require a topic filter"),
                    });
                }
            }
            _ => {}
        }

        if endpoint.runtime.is_empty() {
            result.errors.push(ValidationError {
                field: format!("{prefix}.runtime"),
                message: String::from("Runtime cannot be empty"),
            });
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    if !chars.next().is_some_and(|first| first.is_ascii_lowercase()) {
        return false;
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
