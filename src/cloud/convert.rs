//! Conversions between endpoints and control-plane resources.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::backend::{
    function_name, Backend, Endpoint, EndpointKey, EventTrigger, HttpsTrigger, IngressSettings,
    Platform, ScheduleTrigger, TaskQueueTrigger, Trigger, VpcEgressSettings, HASH_LABEL,
    PRIVATE_INVOKER, PUBLIC_INVOKER, PUBSUB_PUBLISH_EVENT, SCHEDULED_LABEL, TASK_QUEUE_LABEL,
    TOPIC_FILTER, V1_PUBSUB_PUBLISH_EVENT,
};
use crate::config::StorageSource;
use crate::error::{ApiError, ModelError, ReleaseError};

use super::types::{
    BuildConfig, EventFilter, FailurePolicy, HttpTarget, JobRetryConfig, OidcToken, PubsubTarget,
    QueueRateLimits, QueueRetryConfig, SchedulerJob, ServiceConfig, TaskQueue, V1EventTrigger,
    V1Function, V1HttpsTrigger, V2EventTrigger, V2Function, V2Source,
};
use super::{FunctionsV1Api, FunctionsV2Api};

/// IAM member granting public access.
pub const ALL_USERS: &str = "allUsers";

/// Prefix of scheduler jobs and topics created for scheduled functions.
pub const SCHEDULE_RESOURCE_PREFIX: &str = "fnrelease-schedule";

const RETRY_POLICY_RETRY: &str = "RETRY_POLICY_RETRY";
const RETRY_POLICY_DO_NOT_RETRY: &str = "RETRY_POLICY_DO_NOT_RETRY";
const RESOURCE_FILTER: &str = "resource";

/// Splits `projects/{p}/locations/{r}/functions/{id}` into a key.
///
/// # Errors
///
/// Returns an error if the name has another shape.
pub fn parse_function_name(name: &str) -> Result<EndpointKey, ModelError> {
    let parts: Vec<&str> = name.split('/').collect();
    match parts.as_slice() {
        ["projects", project, "locations", region, "functions", id] => {
            Ok(EndpointKey::new(*project, *region, *id))
        }
        _ => Err(ModelError::Unrecognized {
            name: name.to_string(),
            reason: String::from("not a function resource name"),
        }),
    }
}

/// Maps invoker sentinels to IAM members. `None` means no call should be made.
#[must_use]
pub fn resolve_invokers(invoker: &[String]) -> Option<Vec<String>> {
    if invoker.iter().any(|m| m == PRIVATE_INVOKER) {
        return None;
    }
    Some(
        invoker
            .iter()
            .map(|m| if m == PUBLIC_INVOKER { ALL_USERS.to_string() } else { m.clone() })
            .collect(),
    )
}

fn duration(seconds: u32) -> String {
    format!("{seconds}s")
}

fn parse_duration(value: &str) -> Option<u32> {
    value.strip_suffix('s').and_then(|s| s.parse().ok())
}

fn enum_name<T: serde::Serialize>(value: &T) -> Option<String> {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
}

fn enum_from_name<T: serde::de::DeserializeOwned>(value: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string())).ok()
}

fn with_marker(labels: &BTreeMap<String, String>, marker: &str) -> BTreeMap<String, String> {
    let mut labels = labels.clone();
    labels.insert(marker.to_string(), String::from("true"));
    labels
}

/// Name shared by the scheduler job and topic of a scheduled function.
fn schedule_id(endpoint: &Endpoint) -> String {
    format!("{SCHEDULE_RESOURCE_PREFIX}-{}-{}", endpoint.id, endpoint.region)
}

/// Scheduler job name of a scheduled function.
#[must_use]
pub fn schedule_job_name(endpoint: &Endpoint, location: &str) -> String {
    format!(
        "projects/{}/locations/{location}/jobs/{}",
        endpoint.project,
        schedule_id(endpoint)
    )
}

/// Pub/Sub topic that delivers the ticks of a v1 scheduled function.
#[must_use]
pub fn schedule_topic_name(endpoint: &Endpoint) -> String {
    format!("projects/{}/topics/{}", endpoint.project, schedule_id(endpoint))
}

/// Task queue name of a task queue function.
#[must_use]
pub fn queue_name(endpoint: &Endpoint) -> String {
    format!(
        "projects/{}/locations/{}/queues/{}",
        endpoint.project, endpoint.region, endpoint.id
    )
}

fn job_retry_config(trigger: &ScheduleTrigger) -> Option<JobRetryConfig> {
    trigger.retry_config.as_ref().map(|retry| JobRetryConfig {
        retry_count: retry.retry_count,
        max_retry_duration: retry.max_retry_seconds.map(duration),
        min_backoff_duration: retry.min_backoff_seconds.map(duration),
        max_backoff_duration: retry.max_backoff_seconds.map(duration),
        max_doublings: retry.max_doublings,
    })
}

fn schedule_of(endpoint: &Endpoint) -> Result<&ScheduleTrigger, ApiError> {
    endpoint
        .schedule_trigger()
        .ok_or_else(|| {
            ApiError::precondition(format!("{} is not a scheduled function", endpoint.label()))
        })
}

/// Pub/Sub-targeted job of a v1 scheduled function, located in `location`.
///
/// # Errors
///
/// Returns an error if the endpoint is not scheduled.
pub fn v1_schedule_job(endpoint: &Endpoint, location: &str) -> Result<SchedulerJob, ApiError> {
    let trigger = schedule_of(endpoint)?;
    Ok(SchedulerJob {
        name: schedule_job_name(endpoint, location),
        schedule: trigger.schedule.clone(),
        time_zone: trigger.time_zone.clone(),
        retry_config: job_retry_config(trigger),
        pubsub_target: Some(PubsubTarget {
            topic_name: schedule_topic_name(endpoint),
            attributes: BTreeMap::from([(String::from("scheduled"), String::from("true"))]),
        }),
        http_target: None,
    })
}

/// HTTP-targeted job of a v2 scheduled function, located in the function's region.
///
/// # Errors
///
/// Returns an error if the endpoint is not scheduled or has no uri yet.
pub fn v2_schedule_job(endpoint: &Endpoint) -> Result<SchedulerJob, ApiError> {
    let trigger = schedule_of(endpoint)?;
    let uri = endpoint.uri.clone().ok_or_else(|| {
        ApiError::precondition(format!("{} has no uri to schedule", endpoint.label()))
    })?;
    let service_account_email = endpoint
        .service_account_email
        .clone()
        .unwrap_or_else(|| format!("{}@appspot.gserviceaccount.com", endpoint.project));

    Ok(SchedulerJob {
        name: schedule_job_name(endpoint, &endpoint.region),
        schedule: trigger.schedule.clone(),
        time_zone: trigger.time_zone.clone(),
        retry_config: job_retry_config(trigger),
        pubsub_target: None,
        http_target: Some(HttpTarget {
            uri,
            http_method: String::from("POST"),
            oidc_token: Some(OidcToken { service_account_email }),
        }),
    })
}

/// Queue of a task queue function.
#[must_use]
pub fn task_queue_from_endpoint(endpoint: &Endpoint) -> TaskQueue {
    let trigger = endpoint.task_queue_trigger();
    TaskQueue {
        name: queue_name(endpoint),
        rate_limits: trigger.and_then(|t| t.rate_limits.as_ref()).map(|limits| QueueRateLimits {
            max_concurrent_dispatches: limits.max_concurrent_dispatches,
            max_dispatches_per_second: limits.max_dispatches_per_second,
        }),
        retry_config: trigger.and_then(|t| t.retry_config.as_ref()).map(|retry| QueueRetryConfig {
            max_attempts: retry.max_attempts,
            max_retry_duration: retry.max_retry_seconds.map(duration),
            min_backoff: retry.min_backoff_seconds.map(duration),
            max_backoff: retry.max_backoff_seconds.map(duration),
            max_doublings: retry.max_doublings,
        }),
        state: None,
    }
}

/// Builds the v1 function resource of an endpoint.
#[must_use]
pub fn v1_function_from_endpoint(
    endpoint: &Endpoint,
    source_upload_url: &str,
    source_token: Option<String>,
) -> V1Function {
    let mut labels = endpoint.labels.clone();
    let (https_trigger, event_trigger) = match &endpoint.trigger {
        Trigger::HttpsTrigger(_) => (Some(secure_https()), None),
        Trigger::TaskQueueTrigger(_) => {
            labels = with_marker(&labels, TASK_QUEUE_LABEL);
            (Some(secure_https()), None)
        }
        Trigger::ScheduleTrigger(_) => {
            labels = with_marker(&labels, SCHEDULED_LABEL);
            let trigger = V1EventTrigger {
                event_type: String::from(V1_PUBSUB_PUBLISH_EVENT),
                resource: schedule_topic_name(endpoint),
                service: None,
                failure_policy: None,
            };
            (None, Some(trigger))
        }
        Trigger::EventTrigger(event) => (None, Some(v1_event_trigger(event))),
    };

    V1Function {
        name: function_name(endpoint),
        runtime: endpoint.runtime.clone(),
        entry_point: endpoint.entry_point.clone(),
        source_upload_url: Some(source_upload_url.to_string()),
        source_token,
        available_memory_mb: endpoint.available_memory_mb,
        timeout: endpoint.timeout_seconds.map(duration),
        min_instances: endpoint.min_instances,
        max_instances: endpoint.max_instances,
        service_account_email: endpoint.service_account_email.clone(),
        environment_variables: endpoint.environment_variables.clone(),
        labels,
        vpc_connector: endpoint.vpc_connector.clone(),
        vpc_connector_egress_settings: endpoint
            .vpc_connector_egress_settings
            .as_ref()
            .and_then(enum_name),
        ingress_settings: endpoint.ingress_settings.as_ref().and_then(enum_name),
        https_trigger,
        event_trigger,
    }
}

fn secure_https() -> V1HttpsTrigger {
    V1HttpsTrigger {
        url: None,
        security_level: Some(String::from("SECURE_ALWAYS")),
    }
}

fn v1_event_trigger(event: &EventTrigger) -> V1EventTrigger {
    let resource = event
        .event_filters
        .get(RESOURCE_FILTER)
        .or_else(|| event.event_filters.get(TOPIC_FILTER))
        .cloned()
        .unwrap_or_default();
    let event_type = if event.event_type == PUBSUB_PUBLISH_EVENT {
        String::from(V1_PUBSUB_PUBLISH_EVENT)
    } else {
        event.event_type.clone()
    };

    V1EventTrigger {
        event_type,
        resource,
        service: None,
        failure_policy: event.retry.then(|| FailurePolicy {
            retry: Some(serde_json::Map::new()),
        }),
    }
}

/// Builds the v2 function resource of an endpoint.
#[must_use]
pub fn v2_function_from_endpoint(endpoint: &Endpoint, storage: &StorageSource) -> V2Function {
    let mut labels = endpoint.labels.clone();
    let event_trigger = match &endpoint.trigger {
        Trigger::EventTrigger(event) => Some(v2_event_trigger(event)),
        Trigger::ScheduleTrigger(_) => {
            labels = with_marker(&labels, SCHEDULED_LABEL);
            None
        }
        Trigger::TaskQueueTrigger(_) => {
            labels = with_marker(&labels, TASK_QUEUE_LABEL);
            None
        }
        Trigger::HttpsTrigger(_) => None,
    };

    V2Function {
        name: function_name(endpoint),
        build_config: BuildConfig {
            runtime: endpoint.runtime.clone(),
            entry_point: endpoint.entry_point.clone(),
            source: V2Source {
                storage_source: Some(storage.clone()),
            },
        },
        service_config: ServiceConfig {
            available_memory: endpoint.available_memory_mb.map(|mb| format!("{mb}Mi")),
            timeout_seconds: endpoint.timeout_seconds,
            min_instance_count: endpoint.min_instances,
            max_instance_count: endpoint.max_instances,
            service_account_email: endpoint.service_account_email.clone(),
            environment_variables: endpoint.environment_variables.clone(),
            vpc_connector: endpoint.vpc_connector.clone(),
            vpc_connector_egress_settings: endpoint
                .vpc_connector_egress_settings
                .as_ref()
                .and_then(enum_name),
            ingress_settings: endpoint.ingress_settings.as_ref().and_then(enum_name),
            service: None,
            uri: None,
        },
        event_trigger,
        labels,
    }
}

fn v2_event_trigger(event: &EventTrigger) -> V2EventTrigger {
    let is_pubsub = event.event_type == PUBSUB_PUBLISH_EVENT;
    let pubsub_topic = if is_pubsub {
        event.event_filters.get(TOPIC_FILTER).cloned()
    } else {
        None
    };
    let event_filters = event
        .event_filters
        .iter()
        .filter(|(attribute, _)| !(is_pubsub && attribute.as_str() == TOPIC_FILTER))
        .map(|(attribute, value)| EventFilter {
            attribute: attribute.clone(),
            value: value.clone(),
        })
        .collect();

    V2EventTrigger {
        event_type: event.event_type.clone(),
        event_filters,
        pubsub_topic,
        retry_policy: Some(String::from(if event.retry {
            RETRY_POLICY_RETRY
        } else {
            RETRY_POLICY_DO_NOT_RETRY
        })),
        trigger_region: event.region.clone(),
    }
}

/// Rebuilds an endpoint from a deployed v1 function.
///
/// # Errors
///
/// Returns an error if the function name or trigger cannot be interpreted.
pub fn endpoint_from_v1(function: &V1Function) -> Result<Endpoint, ModelError> {
    let key = parse_function_name(&function.name)?;
    let labels = &function.labels;

    let (trigger, uri) = match (&function.https_trigger, &function.event_trigger) {
        (Some(https), _) if labels.contains_key(TASK_QUEUE_LABEL) => (
            Trigger::TaskQueueTrigger(TaskQueueTrigger::default()),
            https.url.clone(),
        ),
        (Some(https), _) => (Trigger::HttpsTrigger(HttpsTrigger::default()), https.url.clone()),
        (None, Some(_)) if labels.contains_key(SCHEDULED_LABEL) => {
            (Trigger::ScheduleTrigger(ScheduleTrigger::default()), None)
        }
        (None, Some(event)) => {
            let filter = if event.event_type == V1_PUBSUB_PUBLISH_EVENT {
                TOPIC_FILTER
            } else {
                RESOURCE_FILTER
            };
            let trigger = EventTrigger {
                event_type: event.event_type.clone(),
                event_filters: BTreeMap::from([(filter.to_string(), event.resource.clone())]),
                retry: event.failure_policy.as_ref().is_some_and(|p| p.retry.is_some()),
                region: None,
            };
            (Trigger::EventTrigger(trigger), None)
        }
        (None, None) => {
            return Err(ModelError::Unrecognized {
                name: function.name.clone(),
                reason: String::from("function has no trigger"),
            });
        }
    };

    let mut endpoint =
        Endpoint::new(key, Platform::V1, &function.runtime, &function.entry_point, trigger);
    endpoint.available_memory_mb = function.available_memory_mb;
    endpoint.timeout_seconds = function.timeout.as_deref().and_then(parse_duration);
    endpoint.min_instances = function.min_instances;
    endpoint.max_instances = function.max_instances;
    endpoint.service_account_email = function.service_account_email.clone();
    endpoint.environment_variables = function.environment_variables.clone();
    endpoint.labels = labels.clone();
    endpoint.vpc_connector = function.vpc_connector.clone();
    endpoint.vpc_connector_egress_settings = function
        .vpc_connector_egress_settings
        .as_deref()
        .and_then(enum_from_name::<VpcEgressSettings>);
    endpoint.ingress_settings = function
        .ingress_settings
        .as_deref()
        .and_then(enum_from_name::<IngressSettings>);
    endpoint.uri = uri;
    endpoint.hash = labels.get(HASH_LABEL).cloned();
    Ok(endpoint)
}

fn parse_memory(value: &str) -> Option<u32> {
    if let Some(mb) = value.strip_suffix("Mi").or_else(|| value.strip_suffix('M')) {
        return mb.parse().ok();
    }
    if let Some(gb) = value.strip_suffix("Gi").or_else(|| value.strip_suffix('G')) {
        return gb.parse::<u32>().ok().map(|g| g * 1024);
    }
    None
}

/// Rebuilds an endpoint from a deployed v2 function.
///
/// # Errors
///
/// Returns an error if the function name cannot be interpreted.
pub fn endpoint_from_v2(function: &V2Function) -> Result<Endpoint, ModelError> {
    let key = parse_function_name(&function.name)?;
    let labels = &function.labels;
    let service = &function.service_config;

    let trigger = match &function.event_trigger {
        Some(event) => {
            let mut event_filters: BTreeMap<String, String> = event
                .event_filters
                .iter()
                .map(|f| (f.attribute.clone(), f.value.clone()))
                .collect();
            if let Some(topic) = &event.pubsub_topic {
                event_filters.insert(TOPIC_FILTER.to_string(), topic.clone());
            }
            Trigger::EventTrigger(EventTrigger {
                event_type: event.event_type.clone(),
                event_filters,
                retry: event.retry_policy.as_deref() == Some(RETRY_POLICY_RETRY),
                region: event.trigger_region.clone(),
            })
        }
        None if labels.contains_key(SCHEDULED_LABEL) => {
            Trigger::ScheduleTrigger(ScheduleTrigger::default())
        }
        None if labels.contains_key(TASK_QUEUE_LABEL) => {
            Trigger::TaskQueueTrigger(TaskQueueTrigger::default())
        }
        None => Trigger::HttpsTrigger(HttpsTrigger::default()),
    };

    let mut endpoint = Endpoint::new(
        key,
        Platform::V2,
        &function.build_config.runtime,
        &function.build_config.entry_point,
        trigger,
    );
    endpoint.available_memory_mb = service.available_memory.as_deref().and_then(parse_memory);
    endpoint.timeout_seconds = service.timeout_seconds;
    endpoint.min_instances = service.min_instance_count;
    endpoint.max_instances = service.max_instance_count;
    endpoint.service_account_email = service.service_account_email.clone();
    endpoint.environment_variables = service.environment_variables.clone();
    endpoint.labels = labels.clone();
    endpoint.vpc_connector = service.vpc_connector.clone();
    endpoint.vpc_connector_egress_settings = service
        .vpc_connector_egress_settings
        .as_deref()
        .and_then(enum_from_name::<VpcEgressSettings>);
    endpoint.ingress_settings = service
        .ingress_settings
        .as_deref()
        .and_then(enum_from_name::<IngressSettings>);
    endpoint.uri = service.uri.clone();
    endpoint.hash = labels.get(HASH_LABEL).cloned();
    Ok(endpoint)
}

/// Builds the "have" backend from every deployed function of a project.
///
/// Functions that cannot be interpreted are skipped with a warning.
///
/// # Errors
///
/// Returns an error if either list call fails.
pub async fn list_backend(
    v1: &dyn FunctionsV1Api,
    v2: &dyn FunctionsV2Api,
    project: &str,
) -> Result<Backend, ReleaseError> {
    let (v1_functions, v2_functions) =
        tokio::try_join!(v1.list_functions(project), v2.list_functions(project))?;
    debug!(
        "Found {} v1 and {} v2 functions in {project}",
        v1_functions.len(),
        v2_functions.len()
    );

    let converted = v1_functions
        .iter()
        .map(endpoint_from_v1)
        .chain(v2_functions.iter().map(endpoint_from_v2));

    let mut backend = Backend::empty();
    for endpoint in converted {
        match endpoint {
            Ok(endpoint) => backend.insert(endpoint)?,
            Err(e) => warn!("Ignoring deployed function: {e}"),
        }
    }
    Ok(backend)
}
