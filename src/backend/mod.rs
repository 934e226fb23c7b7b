//! Resource model for function releases.
//!
//! This module defines endpoints (one function plus its trigger), the
//! backend that groups them by region, and the pure queries used by the
//! planner and reporter.

mod endpoint;
mod graph;
mod query;

pub use endpoint::{
    Endpoint, EndpointKey, EventTrigger, HttpsTrigger, IngressSettings, Platform,
    ScheduleRetryConfig, ScheduleTrigger, TaskQueueRateLimits, TaskQueueRetryConfig,
    TaskQueueTrigger, Trigger, TriggerKind, VpcEgressSettings, PRIVATE_INVOKER,
    PUBLIC_INVOKER, PUBSUB_PUBLISH_EVENT, TOPIC_FILTER, V1_PUBSUB_PUBLISH_EVENT,
};
pub use graph::{Backend, RegionalEndpoints};
pub use query::{
    compare_endpoints, function_name, in_region, is_managed, managed_labels, matching_backend,
    merge_backends, missing_endpoints, on_platform, with_trigger, DEPLOYMENT_TOOL_LABEL,
    DEPLOYMENT_TOOL_VALUE, HASH_LABEL, SCHEDULED_LABEL, TASK_QUEUE_LABEL,
};
