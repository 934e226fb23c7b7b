//! Endpoint types.
//!
//! An endpoint is one deployable function together with the single trigger
//! that invokes it. These types are deserialized from the discovery output
//! ("want") and rebuilt from control-plane listings ("have").

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Event type published by Pub/Sub on v2.
pub const PUBSUB_PUBLISH_EVENT: &str = "google.cloud.pubsub.topic.v1.messagePublished";

/// Event type published by Pub/Sub on v1.
pub const V1_PUBSUB_PUBLISH_EVENT: &str = "google.pubsub.topic.publish";

/// Event filter key that holds the topic of a Pub/Sub trigger.
pub const TOPIC_FILTER: &str = "topic";

/// Invoker sentinel that maps to `allUsers`.
pub const PUBLIC_INVOKER: &str = "public";

/// Invoker sentinel that skips the invoker call entirely.
pub const PRIVATE_INVOKER: &str = "private";

/// Function hosting generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// First generation functions.
    V1,
    /// Second generation functions (concurrency support).
    V2,
}

/// Identity of an endpoint: `(project, region, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointKey {
    /// Project id.
    pub project: String,
    /// Region of the function.
    pub region: String,
    /// Function id.
    pub id: String,
}

/// VPC connector egress routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VpcEgressSettings {
    /// Only private ranges go through the connector.
    PrivateRangesOnly,
    /// All traffic goes through the connector.
    AllTraffic,
}

/// Ingress restrictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngressSettings {
    /// Accept traffic from anywhere.
    AllowAll,
    /// Accept traffic from the project's VPC only.
    AllowInternalOnly,
    /// Accept internal traffic and traffic from a load balancer.
    AllowInternalAndGclb,
}

/// HTTPS trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpsTrigger {
    /// Members allowed to invoke the function. `None` means public on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoker: Option<Vec<String>>,
}

/// Background event trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTrigger {
    /// Event type, e.g. `google.cloud.pubsub.topic.v1.messagePublished`.
    pub event_type: String,
    /// Filters selecting the event source.
    #[serde(default)]
    pub event_filters: BTreeMap<String, String>,
    /// Whether failed invocations are retried.
    #[serde(default)]
    pub retry: bool,
    /// Region of the trigger, when it differs from the function's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Retry settings for scheduled jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRetryConfig {
    /// Number of retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// Maximum total retry time in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retry_seconds: Option<u32>,
    /// Minimum backoff in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_backoff_seconds: Option<u32>,
    /// Maximum backoff in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff_seconds: Option<u32>,
    /// Maximum number of backoff doublings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_doublings: Option<u32>,
}

/// Schedule trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTrigger {
    /// Cron-style schedule.
    #[serde(default)]
    pub schedule: String,
    /// Time zone of the schedule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    /// Retry settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_config: Option<ScheduleRetryConfig>,
}

/// Rate limits of a task queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQueueRateLimits {
    /// Maximum concurrently running tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_dispatches: Option<u32>,
    /// Maximum dispatch rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_dispatches_per_second: Option<f64>,
}

/// Retry settings of a task queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQueueRetryConfig {
    /// Maximum attempts per task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Maximum total retry time in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retry_seconds: Option<u32>,
    /// Minimum backoff in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_backoff_seconds: Option<u32>,
    /// Maximum backoff in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff_seconds: Option<u32>,
    /// Maximum number of backoff doublings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_doublings: Option<u32>,
}

/// Task queue trigger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQueueTrigger {
    /// Members allowed to enqueue tasks. Never defaults to public.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoker: Option<Vec<String>>,
    /// Queue rate limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limits: Option<TaskQueueRateLimits>,
    /// Queue retry settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_config: Option<TaskQueueRetryConfig>,
}

/// The single trigger bound to an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Trigger {
    /// Invoked over HTTPS.
    HttpsTrigger(HttpsTrigger),
    /// Invoked by a background event.
    EventTrigger(EventTrigger),
    /// Invoked on a schedule.
    ScheduleTrigger(ScheduleTrigger),
    /// Invoked by a task queue.
    TaskQueueTrigger(TaskQueueTrigger),
}

/// Kind of trigger, without its settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TriggerKind {
    /// HTTPS.
    Https,
    /// Background event.
    Event,
    /// Schedule.
    Schedule,
    /// Task queue.
    TaskQueue,
}

/// One deployable function and its trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Function id, unique within region and project.
    pub id: String,
    /// Region of the function.
    pub region: String,
    /// Project id.
    pub project: String,
    /// Hosting generation.
    pub platform: Platform,
    /// Language runtime, e.g. `nodejs20`.
    pub runtime: String,
    /// Exported symbol invoked by the runtime.
    pub entry_point: String,
    /// Memory in MB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_memory_mb: Option<u32>,
    /// Timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
    /// Minimum warm instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_instances: Option<u32>,
    /// Maximum instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<u32>,
    /// Concurrent requests per instance (v2 only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
    /// Runtime service account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_email: Option<String>,
    /// Environment variables.
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
    /// Resource labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// VPC connector name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_connector: Option<String>,
    /// VPC connector egress settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_connector_egress_settings: Option<VpcEgressSettings>,
    /// Ingress settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_settings: Option<IngressSettings>,
    /// The trigger.
    #[serde(flatten)]
    pub trigger: Trigger,
    /// Invocation URL, set once the function is deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Content digest used to skip unchanged endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl EndpointKey {
    /// Creates a new key.
    #[must_use]
    pub fn new(
        project: impl Into<String>,
        region: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            region: region.into(),
            id: id.into(),
        }
    }
}

impl Trigger {
    /// Returns the kind of this trigger.
    #[must_use]
    pub const fn kind(&self) -> TriggerKind {
        match self {
            Self::HttpsTrigger(_) => TriggerKind::Https,
            Self::EventTrigger(_) => TriggerKind::Event,
            Self::ScheduleTrigger(_) => TriggerKind::Schedule,
            Self::TaskQueueTrigger(_) => TriggerKind::TaskQueue,
        }
    }
}

impl TriggerKind {
    /// Human-readable description used in error messages ("an HTTPS function").
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Https => "an HTTPS",
            Self::Event => "a background triggered",
            Self::Schedule => "a scheduled",
            Self::TaskQueue => "a task queue",
        }
    }
}

impl Endpoint {
    /// Creates an endpoint with default settings.
    #[must_use]
    pub fn new(
        key: EndpointKey,
        platform: Platform,
        runtime: impl Into<String>,
        entry_point: impl Into<String>,
        trigger: Trigger,
    ) -> Self {
        Self {
            id: key.id,
            region: key.region,
            project: key.project,
            platform,
            runtime: runtime.into(),
            entry_point: entry_point.into(),
            available_memory_mb: None,
            timeout_seconds: None,
            min_instances: None,
            max_instances: None,
            concurrency: None,
            service_account_email: None,
            environment_variables: BTreeMap::new(),
            labels: BTreeMap::new(),
            vpc_connector: None,
            vpc_connector_egress_settings: None,
            ingress_settings: None,
            trigger,
            uri: None,
            hash: None,
        }
    }

    /// Returns the identity of this endpoint.
    #[must_use]
    pub fn key(&self) -> EndpointKey {
        EndpointKey::new(&self.project, &self.region, &self.id)
    }

    /// Returns the trigger kind.
    #[must_use]
    pub const fn trigger_kind(&self) -> TriggerKind {
        self.trigger.kind()
    }

    /// Returns the event trigger, if this endpoint has one.
    #[must_use]
    pub const fn event_trigger(&self) -> Option<&EventTrigger> {
        match &self.trigger {
            Trigger::EventTrigger(t) => Some(t),
            _ => None,
        }
    }

    /// Returns the schedule trigger, if this endpoint has one.
    #[must_use]
    pub const fn schedule_trigger(&self) -> Option<&ScheduleTrigger> {
        match &self.trigger {
            Trigger::ScheduleTrigger(t) => Some(t),
            _ => None,
        }
    }

    /// Returns the task queue trigger, if this endpoint has one.
    #[must_use]
    pub const fn task_queue_trigger(&self) -> Option<&TaskQueueTrigger> {
        match &self.trigger {
            Trigger::TaskQueueTrigger(t) => Some(t),
            _ => None,
        }
    }

    /// Returns the invoker list of an HTTPS or task queue trigger.
    #[must_use]
    pub fn invoker(&self) -> Option<&[String]> {
        match &self.trigger {
            Trigger::HttpsTrigger(t) => t.invoker.as_deref(),
            Trigger::TaskQueueTrigger(t) => t.invoker.as_deref(),
            _ => None,
        }
    }

    /// Returns true if this is a Pub/Sub publish trigger.
    #[must_use]
    pub fn is_pubsub_triggered(&self) -> bool {
        self.event_trigger().is_some_and(|t| {
            t.event_type == PUBSUB_PUBLISH_EVENT || t.event_type == V1_PUBSUB_PUBLISH_EVENT
        })
    }

    /// Returns the label used in logs, e.g. `foo(us-central1)`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}({})", self.id, self.region)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.id, self.region)
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Https => "https",
            Self::Event => "event",
            Self::Schedule => "scheduled",
            Self::TaskQueue => "taskQueue",
        };
        write!(f, "{s}")
    }
}
