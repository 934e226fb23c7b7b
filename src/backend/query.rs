//! Pure queries over endpoints and backends.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::ModelError;

use super::endpoint::{Endpoint, Platform, TriggerKind};
use super::graph::Backend;

/// Label key marking resources created by this tool.
pub const DEPLOYMENT_TOOL_LABEL: &str = "deployment-tool";

/// Value prefix of the deployment tool label.
pub const DEPLOYMENT_TOOL_VALUE: &str = "cli-fnrelease";

/// Label key holding the content hash of a deployed endpoint.
pub const HASH_LABEL: &str = "deployment-hash";

/// Label marking v1 functions backing a schedule.
pub const SCHEDULED_LABEL: &str = "deployment-scheduled";

/// Label marking v1 functions backing a task queue.
pub const TASK_QUEUE_LABEL: &str = "deployment-taskqueue";

/// Returns true if the labels mark a resource as created by this tool.
#[must_use]
pub fn is_managed(labels: &BTreeMap<String, String>) -> bool {
    labels
        .get(DEPLOYMENT_TOOL_LABEL)
        .is_some_and(|v| v.starts_with(DEPLOYMENT_TOOL_VALUE))
}

/// Labels added to every resource this tool creates or updates.
#[must_use]
pub fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(
        String::from(DEPLOYMENT_TOOL_LABEL),
        String::from(DEPLOYMENT_TOOL_VALUE),
    )])
}

/// Total ordering used for deterministic output: v2 first, then region, then id.
#[must_use]
pub fn compare_endpoints(left: &Endpoint, right: &Endpoint) -> Ordering {
    platform_rank(left.platform)
        .cmp(&platform_rank(right.platform))
        .then_with(|| left.region.cmp(&right.region))
        .then_with(|| left.id.cmp(&right.id))
}

const fn platform_rank(platform: Platform) -> u8 {
    match platform {
        Platform::V2 => 0,
        Platform::V1 => 1,
    }
}

/// Fully qualified function resource name.
#[must_use]
pub fn function_name(endpoint: &Endpoint) -> String {
    format!(
        "projects/{}/locations/{}/functions/{}",
        endpoint.project, endpoint.region, endpoint.id
    )
}

/// Returns a backend holding only the endpoints that satisfy the predicate.
#[must_use]
pub fn matching_backend(backend: &Backend, predicate: impl Fn(&Endpoint) -> bool) -> Backend {
    let endpoints = backend
        .endpoints
        .iter()
        .map(|(region, endpoints)| {
            let kept = endpoints
                .iter()
                .filter(|(_, e)| predicate(e))
                .map(|(id, e)| (id.clone(), e.clone()))
                .collect::<BTreeMap<_, _>>();
            (region.clone(), kept)
        })
        .filter(|(_, kept)| !kept.is_empty())
        .collect();

    Backend {
        endpoints,
        required_apis: backend.required_apis.clone(),
        environment_variables: backend.environment_variables.clone(),
    }
}

/// Merges backends into one.
///
/// # Errors
///
/// Returns an error if two backends hold the same endpoint.
pub fn merge_backends<'a>(
    backends: impl IntoIterator<Item = &'a Backend>,
) -> Result<Backend, ModelError> {
    let mut merged = Backend::empty();
    for backend in backends {
        for endpoint in backend.all_endpoints() {
            merged.insert(endpoint.clone())?;
        }
        merged
            .required_apis
            .extend(backend.required_apis.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.environment_variables.extend(
            backend
                .environment_variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
    }
    Ok(merged)
}

/// Endpoints of `left` that `right` does not hold, in deterministic order.
#[must_use]
pub fn missing_endpoints<'a>(left: &'a Backend, right: &Backend) -> Vec<&'a Endpoint> {
    let mut missing: Vec<&Endpoint> = left
        .all_endpoints()
        .filter(|e| !right.has_endpoint(e))
        .collect();
    missing.sort_by(|a, b| compare_endpoints(a, b));
    missing
}

/// Predicate matching a platform.
pub fn on_platform(platform: Platform) -> impl Fn(&Endpoint) -> bool {
    move |e| e.platform == platform
}

/// Predicate matching a trigger kind.
pub fn with_trigger(kind: TriggerKind) -> impl Fn(&Endpoint) -> bool {
    move |e| e.trigger_kind() == kind
}

/// Predicate matching a region.
pub fn in_region(region: &str) -> impl Fn(&Endpoint) -> bool + '_ {
    move |e| e.region == region
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{EndpointKey, EventTrigger, HttpsTrigger, Trigger};

    fn https(platform: Platform, region: &str, id: &str) -> Endpoint {
        Endpoint::new(
            EndpointKey::new("proj", region, id),
            platform,
            "nodejs20",
            id,
            Trigger::HttpsTrigger(HttpsTrigger::default()),
        )
    }

    #[test]
    fn test_compare_orders_v2_first() {
        let mut endpoints = [
            https(Platform::V1, "us-central1", "a"),
            https(Platform::V2, "us-east1", "z"),
            https(Platform::V1, "europe-west1", "b"),
            https(Platform::V2, "us-east1", "c"),
        ];
        endpoints.sort_by(compare_endpoints);
        let labels: Vec<String> = endpoints
            .iter()
            .map(|e| format!("{}:{}", e.platform, e.label()))
            .collect();
        assert_eq!(
            labels,
            vec![
                "v2:c(us-east1)",
                "v2:z(us-east1)",
                "v1:b(europe-west1)",
                "v1:a(us-central1)",
            ]
        );
    }

    #[test]
    fn test_is_managed() {
        assert!(is_managed(&managed_labels()));
        let mut labels = BTreeMap::new();
        labels.insert(String::from(DEPLOYMENT_TOOL_LABEL), String::from("terraform"));
        assert!(!is_managed(&labels));
        assert!(!is_managed(&BTreeMap::new()));
    }

    #[test]
    fn test_matching_backend_drops_empty_regions() {
        let mut event = https(Platform::V1, "europe-west1", "ev");
        event.trigger = Trigger::EventTrigger(EventTrigger {
            event_type: String::from("providers/cloud.firestore/eventTypes/document.write"),
            event_filters: BTreeMap::new(),
            retry: false,
            region: None,
        });
        let backend =
            Backend::of([https(Platform::V1, "us-central1", "a"), event]).expect("backend");

        let only_https = matching_backend(&backend, with_trigger(TriggerKind::Https));
        assert_eq!(only_https.len(), 1);
        assert_eq!(only_https.regions(), vec!["us-central1"]);

        let only_europe = matching_backend(&backend, in_region("europe-west1"));
        assert_eq!(only_europe.len(), 1);
        assert!(matching_backend(&backend, on_platform(Platform::V2)).is_empty());
    }

    #[test]
    fn test_missing_and_merge() {
        let left = Backend::of([
            https(Platform::V1, "us-central1", "a"),
            https(Platform::V1, "us-central1", "b"),
        ])
        .expect("left");
        let right = Backend::of([https(Platform::V1, "us-central1", "b")]).expect("right");
        let missing = missing_endpoints(&left, &right);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, "a");

        assert!(merge_backends([&left, &right]).is_err());
        let other = Backend::of([https(Platform::V2, "us-east1", "c")]).expect("other");
        assert_eq!(merge_backends([&left, &other]).expect("merged").len(), 3);
    }

    #[test]
    fn test_function_name() {
        let endpoint = https(Platform::V1, "us-central1", "foo");
        assert_eq!(function_name(&endpoint), "projects/proj/locations/us-central1/functions/foo");
    }
}
