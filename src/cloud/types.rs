//! Control-plane wire types.
//!
//! This module defines the request and response shapes exchanged with the
//! functions, Cloud Run, Scheduler, Tasks, Pub/Sub, and IAM APIs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::StorageSource;
use crate::error::ApiError;

/// A long-running operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Operation resource name.
    pub name: String,
    /// Whether the operation finished.
    #[serde(default)]
    pub done: bool,
    /// Progress metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<OperationMetadata>,
    /// Error, set when the operation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationStatus>,
    /// Result resource, set when the operation succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

/// Metadata of a functions operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetadata {
    /// Token of the build, reusable by later v1 deploys of the same sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_token: Option<String>,
    /// Resource the operation acts on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Error status of an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatus {
    /// RPC status code.
    #[serde(default)]
    pub code: i32,
    /// Error message.
    #[serde(default)]
    pub message: String,
}

/// HTTPS trigger of a v1 function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1HttpsTrigger {
    /// Invocation URL, output only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// `SECURE_ALWAYS` or `SECURE_OPTIONAL`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_level: Option<String>,
}

/// Retry marker of a v1 event trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePolicy {
    /// Present when failed events are retried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Event trigger of a v1 function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1EventTrigger {
    /// Event type.
    pub event_type: String,
    /// Event source resource.
    #[serde(default)]
    pub resource: String,
    /// Source service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Retry policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,
}

/// A v1 function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1Function {
    /// `projects/{project}/locations/{region}/functions/{id}`.
    pub name: String,
    /// Language runtime.
    #[serde(default)]
    pub runtime: String,
    /// Exported symbol.
    #[serde(default)]
    pub entry_point: String,
    /// Signed upload URL of the sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_upload_url: Option<String>,
    /// Build reuse token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_token: Option<String>,
    /// Memory in MB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_memory_mb: Option<u32>,
    /// Timeout, e.g. `60s`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Minimum instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_instances: Option<u32>,
    /// Maximum instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<u32>,
    /// Runtime service account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_email: Option<String>,
    /// Environment variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment_variables: BTreeMap<String, String>,
    /// Labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// VPC connector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_connector: Option<String>,
    /// VPC egress settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_connector_egress_settings: Option<String>,
    /// Ingress settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_settings: Option<String>,
    /// HTTPS trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_trigger: Option<V1HttpsTrigger>,
    /// Event trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_trigger: Option<V1EventTrigger>,
}

/// Source of a v2 build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V2Source {
    /// Storage object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_source: Option<StorageSource>,
}

/// Build settings of a v2 function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    /// Language runtime.
    #[serde(default)]
    pub runtime: String,
    /// Exported symbol.
    #[serde(default)]
    pub entry_point: String,
    /// Sources.
    #[serde(default)]
    pub source: V2Source,
}

/// Service settings of a v2 function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Memory, e.g. `256Mi`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_memory: Option<String>,
    /// Timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
    /// Minimum instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_instance_count: Option<u32>,
    /// Maximum instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_instance_count: Option<u32>,
    /// Runtime service account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_email: Option<String>,
    /// Environment variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment_variables: BTreeMap<String, String>,
    /// VPC connector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_connector: Option<String>,
    /// VPC egress settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_connector_egress_settings: Option<String>,
    /// Ingress settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_settings: Option<String>,
    /// Backing Cloud Run service, output only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Invocation URL, output only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// An attribute filter of a v2 event trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Attribute name.
    pub attribute: String,
    /// Attribute value.
    pub value: String,
}

/// Event trigger of a v2 function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V2EventTrigger {
    /// Event type.
    pub event_type: String,
    /// Attribute filters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_filters: Vec<EventFilter>,
    /// Pub/Sub topic, for publish triggers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubsub_topic: Option<String>,
    /// `RETRY_POLICY_RETRY` or `RETRY_POLICY_DO_NOT_RETRY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<String>,
    /// Region of the event source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_region: Option<String>,
}

/// A v2 function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V2Function {
    /// `projects/{project}/locations/{region}/functions/{id}`.
    pub name: String,
    /// Build settings.
    #[serde(default)]
    pub build_config: BuildConfig,
    /// Service settings.
    #[serde(default)]
    pub service_config: ServiceConfig,
    /// Event trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_trigger: Option<V2EventTrigger>,
    /// Labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Pub/Sub target of a scheduler job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubTarget {
    /// Topic name.
    pub topic_name: String,
    /// Message attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// OIDC token settings of an HTTP scheduler target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcToken {
    /// Service account that signs the token.
    pub service_account_email: String,
}

/// HTTP target of a scheduler job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpTarget {
    /// Target URL.
    pub uri: String,
    /// HTTP method.
    pub http_method: String,
    /// Token attached to each request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc_token: Option<OidcToken>,
}

/// Retry settings of a scheduler job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRetryConfig {
    /// Retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// Maximum total retry duration, e.g. `600s`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retry_duration: Option<String>,
    /// Minimum backoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_backoff_duration: Option<String>,
    /// Maximum backoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff_duration: Option<String>,
    /// Maximum doublings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_doublings: Option<u32>,
}

/// A scheduler job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerJob {
    /// `projects/{project}/locations/{location}/jobs/{job}`.
    pub name: String,
    /// Cron-style schedule.
    pub schedule: String,
    /// Time zone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    /// Retry settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_config: Option<JobRetryConfig>,
    /// Pub/Sub target (v1 functions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubsub_target: Option<PubsubTarget>,
    /// HTTP target (v2 functions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_target: Option<HttpTarget>,
}

/// Dispatch limits of a task queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRateLimits {
    /// Maximum concurrent dispatches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_dispatches: Option<u32>,
    /// Maximum dispatches per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_dispatches_per_second: Option<f64>,
}

/// Retry settings of a task queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRetryConfig {
    /// Maximum attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Maximum total retry duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retry_duration: Option<String>,
    /// Minimum backoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_backoff: Option<String>,
    /// Maximum backoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff: Option<String>,
    /// Maximum doublings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_doublings: Option<u32>,
}

/// State of a task queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueState {
    /// Tasks are dispatched.
    Running,
    /// Dispatch is paused.
    Paused,
    /// The queue accepts no tasks.
    Disabled,
}

/// A task queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQueue {
    /// `projects/{project}/locations/{region}/queues/{id}`.
    pub name: String,
    /// Dispatch limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limits: Option<QueueRateLimits>,
    /// Retry settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_config: Option<QueueRetryConfig>,
    /// State.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<QueueState>,
}

/// Revision settings of a Cloud Run service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionSpec {
    /// Concurrent requests per instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_concurrency: Option<u32>,
    /// Fields this tool does not touch.
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

/// Revision template of a Cloud Run service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevisionTemplate {
    /// Revision settings.
    #[serde(default)]
    pub spec: RevisionSpec,
    /// Fields this tool does not touch.
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

/// Spec of a Cloud Run service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Revision template.
    #[serde(default)]
    pub template: RevisionTemplate,
    /// Fields this tool does not touch.
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

/// A Cloud Run service backing a v2 function. Replaced as a whole, so
/// unknown fields are carried through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunService {
    /// Service spec.
    #[serde(default)]
    pub spec: ServiceSpec,
    /// Fields this tool does not touch.
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

/// A role binding of an IAM policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// Role, e.g. `roles/run.invoker`.
    pub role: String,
    /// Members granted the role.
    #[serde(default)]
    pub members: Vec<String>,
}

/// An IAM policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamPolicy {
    /// Role bindings.
    #[serde(default)]
    pub bindings: Vec<Binding>,
    /// Concurrency token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Policy version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl Operation {
    /// Returns the build token carried by the metadata, if any.
    #[must_use]
    pub fn source_token(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.source_token.as_deref())
    }

    /// Converts a finished operation into its result.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation finished with an error.
    pub fn into_result(self) -> Result<Self, ApiError> {
        match self.error {
            Some(status) => Err(ApiError::OperationFailed {
                operation: self.name,
                code: status.code,
                message: status.message,
            }),
            None => Ok(self),
        }
    }

    /// Decodes the result resource.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no response or it has the wrong shape.
    pub fn response_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, ApiError> {
        let response = self.response.clone().ok_or_else(|| ApiError::InvalidResponse {
            message: format!("operation {} has no response", self.name),
        })?;
        serde_json::from_value(response).map_err(|e| ApiError::InvalidResponse {
            message: format!("unexpected response of operation {}: {e}", self.name),
        })
    }
}

impl IamPolicy {
    /// Returns the members bound to a role.
    #[must_use]
    pub fn members_of(&self, role: &str) -> Vec<String> {
        self.bindings
            .iter()
            .filter(|b| b.role == role)
            .flat_map(|b| b.members.iter().cloned())
            .collect()
    }

    /// Replaces the members bound to a role. An empty list removes the binding.
    pub fn set_members(&mut self, role: &str, members: &[String]) {
        self.bindings.retain(|b| b.role != role);
        if !members.is_empty() {
            self.bindings.push(Binding {
                role: role.to_string(),
                members: members.to_vec(),
            });
        }
    }
}
