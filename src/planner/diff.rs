//! Changeset computation for one region.
//!
//! This module compares the desired endpoints of a region with the deployed
//! ones and splits them into creates, updates, deletes, and skips. It also
//! refuses transitions the control plane cannot apply to a live function.

use tracing::debug;

use crate::backend::{
    is_managed, Endpoint, Platform, RegionalEndpoints, TriggerKind, PUBSUB_PUBLISH_EVENT,
    TOPIC_FILTER,
};
use crate::error::PlanError;

use super::plan::{RegionalChanges, Update};

/// Options of a single-region changeset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangesetOptions {
    /// Delete endpoints missing from the release even if they are not managed.
    pub delete_all: bool,
    /// Allow v1 endpoints to be redeployed as v2.
    ///
    /// Every v1 to v2 transition is a delete followed by a create, whatever
    /// the trigger kind. The function does not exist between the two calls,
    /// so an https function is unreachable for the length of the create.
    pub allow_platform_upgrade: bool,
    /// Skip endpoints whose deployed hash equals the desired hash.
    pub skip_unchanged: bool,
}

/// Splits the endpoints of one region into creates, updates, deletes, and skips.
///
/// # Errors
///
/// Returns an error if an update is illegal. Nothing is mutated in that case.
pub fn calculate_regional_changes(
    want: &RegionalEndpoints,
    have: &RegionalEndpoints,
    options: &ChangesetOptions,
) -> Result<RegionalChanges, PlanError> {
    let mut changes = RegionalChanges::default();

    for (id, endpoint) in want {
        let Some(live) = have.get(id) else {
            debug!("{} is new", endpoint.label());
            changes.endpoints_to_create.push(endpoint.clone());
            continue;
        };

        if options.skip_unchanged && is_unchanged(endpoint, live) {
            debug!("{} is unchanged, skipping", endpoint.label());
            changes.endpoints_to_skip.push(endpoint.clone());
            continue;
        }

        changes
            .endpoints_to_update
            .push(calculate_update(endpoint, live, options.allow_platform_upgrade)?);
    }

    for (id, endpoint) in have {
        if want.contains_key(id) {
            continue;
        }
        if options.delete_all || is_managed(&endpoint.labels) {
            changes.endpoints_to_delete.push(endpoint.clone());
        } else {
            debug!("{} is not managed by this tool, leaving it alone", endpoint.label());
        }
    }

    Ok(changes)
}

fn is_unchanged(want: &Endpoint, have: &Endpoint) -> bool {
    match (&want.hash, &have.hash) {
        (Some(want_hash), Some(have_hash)) => want_hash == have_hash,
        _ => false,
    }
}

/// Computes the update of a deployed endpoint.
///
/// # Errors
///
/// Returns an error if the transition is illegal.
pub fn calculate_update(
    want: &Endpoint,
    have: &Endpoint,
    allow_platform_upgrade: bool,
) -> Result<Update, PlanError> {
    check_for_illegal_update(want, have, allow_platform_upgrade)?;

    let recreate = changed_trigger_region(want, have)
        || changed_v2_pubsub_topic(want, have)
        || upgraded_platform(want, have);

    if recreate {
        debug!("{} must be deleted and recreated", want.label());
    }

    Ok(Update {
        endpoint: want.clone(),
        delete_and_recreate: recreate.then(|| have.clone()),
    })
}

/// Rejects transitions that cannot be applied to a live function.
///
/// # Errors
///
/// Returns an error on a trigger kind change, a v2 to v1 downgrade, or a v1 to
/// v2 upgrade unless `allow_platform_upgrade` is set.
pub fn check_for_illegal_update(
    want: &Endpoint,
    have: &Endpoint,
    allow_platform_upgrade: bool,
) -> Result<(), PlanError> {
    let illegal = |message: String| PlanError::IllegalUpdate {
        endpoint: want.key(),
        message,
    };

    let want_kind = want.trigger_kind();
    let have_kind = have.trigger_kind();
    if want_kind != have_kind {
        return Err(illegal(format!(
            "Changing from {} function to {} function is not allowed. \
             Please delete your function and create a new one instead.",
            have_kind.description(),
            want_kind.description()
        )));
    }

    match (have.platform, want.platform) {
        (Platform::V2, Platform::V1) => Err(illegal(String::from(
            "Functions cannot be downgraded from v2 to v1",
        ))),
        (Platform::V1, Platform::V2) if !allow_platform_upgrade => Err(illegal(String::from(
            "Upgrading from v1 to v2 is not enabled. Delete the v1 function first \
             or set planner.allow_platform_upgrade.",
        ))),
        _ => Ok(()),
    }
}

fn changed_trigger_region(want: &Endpoint, have: &Endpoint) -> bool {
    if want.platform != Platform::V2 || have.platform != Platform::V2 {
        return false;
    }
    match (want.event_trigger(), have.event_trigger()) {
        (Some(want_trigger), Some(have_trigger)) => want_trigger.region != have_trigger.region,
        _ => false,
    }
}

fn changed_v2_pubsub_topic(want: &Endpoint, have: &Endpoint) -> bool {
    if want.platform != Platform::V2 || have.platform != Platform::V2 {
        return false;
    }
    match (want.event_trigger(), have.event_trigger()) {
        (Some(want_trigger), Some(have_trigger))
            if want_trigger.event_type == PUBSUB_PUBLISH_EVENT
                && have_trigger.event_type == PUBSUB_PUBLISH_EVENT =>
        {
            want_trigger.event_filters.get(TOPIC_FILTER)
                != have_trigger.event_filters.get(TOPIC_FILTER)
        }
        _ => false,
    }
}

/// A v1 function cannot be updated through the v2 API, so every allowed
/// upgrade is a recreate, https and scheduled functions included.
fn upgraded_platform(want: &Endpoint, have: &Endpoint) -> bool {
    have.platform == Platform::V1 && want.platform == Platform::V2
}

/// Returns true if the update moves a scheduled function from v1 to v2.
#[must_use]
pub fn upgraded_schedule_from_v1_to_v2(want: &Endpoint, have: &Endpoint) -> bool {
    upgraded_platform(want, have)
        && want.trigger_kind() == TriggerKind::Schedule
        && have.trigger_kind() == TriggerKind::Schedule
}

/// Returns true if the update moves a function to v2 without setting concurrency.
#[must_use]
pub fn upgraded_to_v2_without_concurrency(update: &Update) -> bool {
    update.delete_and_recreate.as_ref().is_some_and(|old| {
        old.platform == Platform::V1
            && update.endpoint.platform == Platform::V2
            && update.endpoint.concurrency.is_none()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        managed_labels, EndpointKey, EventTrigger, HttpsTrigger, ScheduleTrigger, TaskQueueTrigger,
        Trigger,
    };
    use std::collections::{BTreeMap, BTreeSet};

    fn https(platform: Platform, id: &str) -> Endpoint {
        Endpoint::new(
            EndpointKey::new("proj", "us-central1", id),
            platform,
            "nodejs20",
            id,
            Trigger::HttpsTrigger(HttpsTrigger::default()),
        )
    }

    fn with_trigger(platform: Platform, id: &str, trigger: Trigger) -> Endpoint {
        let mut endpoint = https(platform, id);
        endpoint.trigger = trigger;
        endpoint
    }

    fn event(event_type: &str, filters: &[(&str, &str)], region: Option<&str>) -> Trigger {
        Trigger::EventTrigger(EventTrigger {
            event_type: event_type.to_string(),
            event_filters: filters
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            retry: false,
            region: region.map(str::to_string),
        })
    }

    fn schedule() -> Trigger {
        Trigger::ScheduleTrigger(ScheduleTrigger {
            schedule: String::from("every 5 minutes"),
            ..ScheduleTrigger::default()
        })
    }

    fn managed(mut endpoint: Endpoint) -> Endpoint {
        endpoint.labels.extend(managed_labels());
        endpoint
    }

    fn regional(endpoints: impl IntoIterator<Item = Endpoint>) -> RegionalEndpoints {
        endpoints.into_iter().map(|e| (e.id.clone(), e)).collect()
    }

    fn all_kinds(platform: Platform) -> Vec<Endpoint> {
        vec![
            https(platform, "fn"),
            with_trigger(platform, "fn", event("google.storage.object.finalize", &[], None)),
            with_trigger(platform, "fn", schedule()),
            with_trigger(platform, "fn", Trigger::TaskQueueTrigger(TaskQueueTrigger::default())),
        ]
    }

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let want = regional([
            https(Platform::V1, "a"),
            https(Platform::V1, "b"),
            https(Platform::V2, "c"),
        ]);
        let have = regional([
            managed(https(Platform::V1, "b")),
            managed(https(Platform::V2, "c")),
            managed(https(Platform::V1, "d")),
        ]);

        let changes = calculate_regional_changes(&want, &have, &ChangesetOptions::default())
            .expect("legal changes");

        let create: BTreeSet<&str> =
            changes.endpoints_to_create.iter().map(|e| e.id.as_str()).collect();
        let update: BTreeSet<&str> = changes
            .endpoints_to_update
            .iter()
            .map(|u| u.endpoint.id.as_str())
            .collect();
        let delete: BTreeSet<&str> =
            changes.endpoints_to_delete.iter().map(|e| e.id.as_str()).collect();

        assert_eq!(create, BTreeSet::from(["a"]));
        assert_eq!(update, BTreeSet::from(["b", "c"]));
        assert_eq!(delete, BTreeSet::from(["d"]));
        assert!(create.is_disjoint(&update));
        assert!(update.is_disjoint(&delete));
        assert!(create.is_disjoint(&delete));

        let union: BTreeSet<&str> = create.iter().chain(&update).chain(&delete).copied().collect();
        let ids: BTreeSet<&str> = want.keys().chain(have.keys()).map(String::as_str).collect();
        assert_eq!(union, ids);
    }

    #[test]
    fn test_unmanaged_endpoints_are_kept() {
        let have = regional([https(Platform::V1, "legacy"), managed(https(Platform::V1, "ours"))]);

        let changes =
            calculate_regional_changes(&BTreeMap::new(), &have, &ChangesetOptions::default())
                .expect("legal changes");
        let deleted: Vec<&str> =
            changes.endpoints_to_delete.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(deleted, vec!["ours"]);

        let options = ChangesetOptions {
            delete_all: true,
            ..ChangesetOptions::default()
        };
        let changes = calculate_regional_changes(&BTreeMap::new(), &have, &options)
            .expect("legal changes");
        assert_eq!(changes.endpoints_to_delete.len(), 2);
    }

    #[test]
    fn test_equal_hashes_are_skipped() {
        let mut want_endpoint = https(Platform::V2, "api");
        want_endpoint.hash = Some(String::from("h1"));
        let mut have_endpoint = managed(https(Platform::V2, "api"));
        have_endpoint.hash = Some(String::from("h1"));
        let want = regional([want_endpoint.clone()]);
        let have = regional([have_endpoint]);

        let options = ChangesetOptions {
            skip_unchanged: true,
            ..ChangesetOptions::default()
        };
        let changes = calculate_regional_changes(&want, &have, &options).expect("legal changes");
        assert_eq!(changes.endpoints_to_skip.len(), 1);
        assert!(changes.endpoints_to_update.is_empty());

        let changes = calculate_regional_changes(&want, &have, &ChangesetOptions::default())
            .expect("legal changes");
        assert_eq!(changes.endpoints_to_update.len(), 1, "targeted endpoints are never skipped");

        want_endpoint.hash = Some(String::from("h2"));
        let changes = calculate_regional_changes(&regional([want_endpoint]), &have, &options)
            .expect("legal changes");
        assert_eq!(changes.endpoints_to_update.len(), 1);
    }

    #[test]
    fn test_illegal_update_on_kind_change() {
        for platform in [Platform::V1, Platform::V2] {
            for have in all_kinds(platform) {
                for want in all_kinds(platform) {
                    let result = check_for_illegal_update(&want, &have, false);
                    if want.trigger_kind() == have.trigger_kind() {
                        let (from, to) = (have.trigger_kind(), want.trigger_kind());
                        assert!(result.is_ok(), "{from} -> {to}");
                    } else {
                        assert!(matches!(result, Err(PlanError::IllegalUpdate { .. })));
                    }
                }
            }
        }
    }

    #[test]
    fn test_illegal_update_message() {
        let have = https(Platform::V1, "fn");
        let want = with_trigger(Platform::V1, "fn", schedule());

        let err = check_for_illegal_update(&want, &have, false).expect_err("kind change");
        assert_eq!(
            err.to_string(),
            "[fn(us-central1)] Changing from an HTTPS function to a scheduled function \
             is not allowed. Please delete your function and create a new one instead."
        );
    }

    #[test]
    fn test_platform_transitions() {
        let v1 = https(Platform::V1, "fn");
        let v2 = https(Platform::V2, "fn");

        assert!(check_for_illegal_update(&v1, &v2, false).is_err());
        assert!(check_for_illegal_update(&v1, &v2, true).is_err());
        assert!(check_for_illegal_update(&v2, &v1, false).is_err());
        assert!(check_for_illegal_update(&v2, &v1, true).is_ok());
        assert!(check_for_illegal_update(&v1, &v1, false).is_ok());
        assert!(check_for_illegal_update(&v2, &v2, false).is_ok());
    }

    #[test]
    fn test_changed_trigger_region_recreates() {
        let finalized = "google.cloud.storage.object.v1.finalized";
        let have = with_trigger(Platform::V2, "fn", event(finalized, &[], Some("us")));
        let want = with_trigger(Platform::V2, "fn", event(finalized, &[], Some("eu")));

        let update = calculate_update(&want, &have, false).expect("legal");
        assert_eq!(update.delete_and_recreate.as_ref(), Some(&have));
    }

    #[test]
    fn test_changed_pubsub_topic_recreates() {
        let topic = |name: &str| {
            let trigger = event(PUBSUB_PUBLISH_EVENT, &[(TOPIC_FILTER, name)], None);
            with_trigger(Platform::V2, "fn", trigger)
        };
        let have = topic("a");

        let update = calculate_update(&topic("b"), &have, false).expect("legal");
        assert!(update.delete_and_recreate.is_some());

        let update = calculate_update(&topic("a"), &have, false).expect("legal");
        assert!(update.delete_and_recreate.is_none());
    }

    #[test]
    fn test_v1_region_change_is_in_place() {
        let finalize = "google.storage.object.finalize";
        let have = with_trigger(Platform::V1, "fn", event(finalize, &[], Some("us")));
        let want = with_trigger(Platform::V1, "fn", event(finalize, &[], Some("eu")));

        let update = calculate_update(&want, &have, false).expect("legal");
        assert!(update.delete_and_recreate.is_none());
    }

    #[test]
    fn test_timeout_change_is_in_place() {
        let have = https(Platform::V2, "fn");
        let mut want = https(Platform::V2, "fn");
        want.timeout_seconds = Some(120);

        let update = calculate_update(&want, &have, false).expect("legal");
        assert!(update.delete_and_recreate.is_none());
        assert_eq!(update.endpoint.timeout_seconds, Some(120));
    }

    #[test]
    fn test_schedule_upgrade() {
        let have = with_trigger(Platform::V1, "nightly", schedule());
        let want = with_trigger(Platform::V2, "nightly", schedule());

        assert!(calculate_update(&want, &have, false).is_err());
        let update = calculate_update(&want, &have, true).expect("upgrade allowed");
        assert!(upgraded_schedule_from_v1_to_v2(&want, &have));
        assert_eq!(update.delete_and_recreate.map(|e| e.platform), Some(Platform::V1));
        assert!(!upgraded_schedule_from_v1_to_v2(
            &https(Platform::V2, "x"),
            &https(Platform::V1, "x")
        ));
    }

    #[test]
    fn test_every_platform_upgrade_recreates() {
        for (have, want) in all_kinds(Platform::V1).into_iter().zip(all_kinds(Platform::V2)) {
            let update = calculate_update(&want, &have, true).expect("upgrade allowed");
            assert_eq!(
                update.delete_and_recreate.map(|e| e.platform),
                Some(Platform::V1),
                "{} upgrade",
                want.trigger_kind()
            );
        }
    }

    #[test]
    fn test_illegal_update_fails_the_whole_region() {
        let want = regional([
            https(Platform::V1, "ok"),
            with_trigger(Platform::V1, "bad", schedule()),
        ]);
        let have = regional([
            managed(https(Platform::V1, "ok")),
            managed(https(Platform::V1, "bad")),
        ]);

        let result = calculate_regional_changes(&want, &have, &ChangesetOptions::default());
        assert!(matches!(
            result,
            Err(PlanError::IllegalUpdate { ref endpoint, .. }) if endpoint.id == "bad"
        ));
    }
}
