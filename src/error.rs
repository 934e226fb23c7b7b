//! Error types for the release engine.
//!
//! This module provides the error hierarchy for every stage of a release:
//! configuration, resource model, planning, control-plane calls, and the
//! per-endpoint failures recorded while fabricating a plan.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::backend::EndpointKey;

/// The main error type for the release engine.
#[derive(Debug, Error)]
pub enum ReleaseError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Resource model errors.
    #[error("Resource model error: {0}")]
    Model(#[from] ModelError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Control-plane API errors.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// One or more endpoints failed to deploy.
    #[error("{0}")]
    Deploy(#[from] DeployFailure),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// Resource model errors.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The same endpoint was inserted twice into one backend.
    #[error("Duplicate endpoint {id} in region {region}")]
    DuplicateEndpoint {
        /// Region of the endpoint.
        region: String,
        /// Endpoint id.
        id: String,
    },

    /// A live resource could not be mapped back to an endpoint.
    #[error("Cannot interpret resource {name}: {reason}")]
    Unrecognized {
        /// Resource name.
        name: String,
        /// Why it could not be interpreted.
        reason: String,
    },
}

/// Planning errors. These abort a release before any mutation.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The requested transition cannot be applied to an existing endpoint.
    #[error("[{endpoint}] {message}")]
    IllegalUpdate {
        /// Endpoint whose update was refused.
        endpoint: EndpointKey,
        /// Description of the illegal transition.
        message: String,
    },

    /// Deletions are pending but nobody can confirm them.
    #[error(
        "Aborting because deletion cannot proceed in non-interactive mode. \
         Pass --force to delete {count} function(s) without confirmation"
    )]
    NonInteractiveDeletion {
        /// Number of pending deletions.
        count: usize,
    },
}

/// Control-plane API errors.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The API answered with a non-success status.
    #[error("API request failed: {status} - {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Network error.
    #[error("Network error: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from the API.
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// A long-running operation finished with an error.
    #[error("Operation {operation} failed with code {code}: {message}")]
    OperationFailed {
        /// Operation name.
        operation: String,
        /// RPC status code reported by the operation.
        code: i32,
        /// Message reported by the operation.
        message: String,
    },

    /// A long-running operation did not finish in time.
    #[error("Timed out after {waited_secs}s waiting for operation {operation}")]
    Timeout {
        /// Operation name.
        operation: String,
        /// Seconds spent polling.
        waited_secs: u64,
    },

    /// A call could not be attempted because an input was missing.
    #[error("Precondition failed: {message}")]
    Precondition {
        /// What was missing.
        message: String,
    },
}

/// Kind of control-plane operation an endpoint failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Function create.
    Create,
    /// Function update.
    Update,
    /// Function delete.
    Delete,
    /// Scheduler job upsert.
    UpsertSchedule,
    /// Scheduler job delete.
    DeleteSchedule,
    /// Task queue upsert.
    UpsertTaskQueue,
    /// Task queue disable.
    DisableTaskQueue,
    /// Pub/Sub topic create.
    CreateTopic,
    /// Pub/Sub topic delete.
    DeleteTopic,
    /// Invoker IAM policy change.
    SetInvoker,
    /// Container concurrency change.
    SetConcurrency,
}

/// A failure recorded against a single endpoint during fabrication.
#[derive(Debug, Clone, Error)]
pub enum DeploymentError {
    /// An operation was attempted and failed.
    #[error("Failed to {op} function {endpoint}: {cause}")]
    Failed {
        /// Endpoint the operation belonged to.
        endpoint: EndpointKey,
        /// Operation that failed.
        op: OperationKind,
        /// Underlying control-plane error.
        #[source]
        cause: ApiError,
    },

    /// A delete was skipped because its region could not be fully deployed.
    #[error("Delete of function {endpoint} aborted because other deployments in its region failed")]
    Aborted {
        /// Endpoint whose delete never ran.
        endpoint: EndpointKey,
    },
}

/// Aggregate error returned when any endpoint failed or was aborted.
#[derive(Debug, Error)]
pub enum DeployFailure {
    /// Exactly one endpoint failed.
    #[error("There was an error deploying functions: {0}")]
    Single(Box<DeploymentError>),

    /// Several endpoints failed.
    #[error("There was an error deploying functions ({} failures)", .0.len())]
    Multiple(Vec<DeploymentError>),
}

/// Result type alias for release operations.
pub type Result<T> = std::result::Result<T, ReleaseError>;

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl ApiError {
    /// Creates a status error.
    #[must_use]
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a precondition error.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// Returns the HTTP status code carried by this error, if any.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if the API reported the resource already exists.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self.status_code(), Some(409))
    }

    /// Returns true if the API reported quota exhaustion.
    #[must_use]
    pub const fn is_quota_exceeded(&self) -> bool {
        matches!(self.status_code(), Some(429))
    }

    /// Returns true if the API reported the resource does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.status_code(), Some(404))
    }
}

impl DeploymentError {
    /// Wraps a control-plane error for an endpoint and operation.
    #[must_use]
    pub const fn failed(endpoint: EndpointKey, op: OperationKind, cause: ApiError) -> Self {
        Self::Failed { endpoint, op, cause }
    }

    /// Returns the endpoint this failure belongs to.
    #[must_use]
    pub const fn endpoint(&self) -> &EndpointKey {
        match self {
            Self::Failed { endpoint, .. } | Self::Aborted { endpoint } => endpoint,
        }
    }

    /// Returns the failed operation. Aborted results report `delete`.
    #[must_use]
    pub const fn op(&self) -> OperationKind {
        match self {
            Self::Failed { op, .. } => *op,
            Self::Aborted { .. } => OperationKind::Delete,
        }
    }

    /// Returns the control-plane cause, if the operation was attempted.
    #[must_use]
    pub const fn cause(&self) -> Option<&ApiError> {
        match self {
            Self::Failed { cause, .. } => Some(cause),
            Self::Aborted { .. } => None,
        }
    }

    /// Returns true if the operation never ran.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

impl DeployFailure {
    /// Builds the aggregate failure for a set of endpoint errors.
    ///
    /// Returns `None` when there is nothing to report.
    #[must_use]
    pub fn from_errors(mut errors: Vec<DeploymentError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop().map(|e| Self::Single(Box::new(e))),
            _ => Some(Self::Multiple(errors)),
        }
    }

    /// Returns every endpoint error contained in this failure.
    #[must_use]
    pub fn errors(&self) -> Vec<&DeploymentError> {
        match self {
            Self::Single(error) => vec![error.as_ref()],
            Self::Multiple(errors) => errors.iter().collect(),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::UpsertSchedule => "upsert schedule",
            Self::DeleteSchedule => "delete schedule",
            Self::UpsertTaskQueue => "upsert task queue",
            Self::DisableTaskQueue => "disable task queue",
            Self::CreateTopic => "create topic",
            Self::DeleteTopic => "delete topic",
            Self::SetInvoker => "set invoker",
            Self::SetConcurrency => "set concurrency",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EndpointKey {
        EndpointKey::new("proj", "us-central1", "foo")
    }

    #[test]
    fn test_status_classification() {
        assert!(ApiError::status(429, "quota").is_quota_exceeded());
        assert!(ApiError::status(409, "exists").is_conflict());
        assert!(ApiError::status(404, "gone").is_not_found());
        assert_eq!(ApiError::network("reset").status_code(), None);
    }

    #[test]
    fn test_deploy_failure_single_wraps_directly() {
        let err =
            DeploymentError::failed(key(), OperationKind::Create, ApiError::status(400, "bad"));
        let failure = DeployFailure::from_errors(vec![err]).expect("one failure");
        assert!(matches!(failure, DeployFailure::Single(_)));
        assert_eq!(failure.errors().len(), 1);
    }

    #[test]
    fn test_deploy_failure_multiple_keeps_children() {
        let errors = vec![
            DeploymentError::failed(key(), OperationKind::Create, ApiError::status(400, "bad")),
            DeploymentError::Aborted { endpoint: key() },
        ];
        let failure = DeployFailure::from_errors(errors).expect("two failures");
        assert!(matches!(failure, DeployFailure::Multiple(ref v) if v.len() == 2));
        assert!(DeployFailure::from_errors(vec![]).is_none());
    }

    #[test]
    fn test_aborted_reports_delete() {
        let err = DeploymentError::Aborted { endpoint: key() };
        assert!(err.is_aborted());
        assert_eq!(err.op(), OperationKind::Delete);
        assert!(err.cause().is_none());
        assert_eq!(
            DeploymentError::failed(key(), OperationKind::SetInvoker, ApiError::status(403, "x"))
                .to_string(),
            "Failed to set invoker function foo(us-central1): API request failed: 403 - x"
        );
    }
}
