//! Deployment plan types and construction.
//!
//! This module defines the structure of deployment plans and builds them
//! from the desired and deployed backends, one changeset per region.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info, warn};

use crate::backend::{compare_endpoints, matching_backend, Backend, Endpoint};
use crate::error::PlanError;

use super::diff::{calculate_regional_changes, upgraded_to_v2_without_concurrency, ChangesetOptions};

/// Warning emitted when functions move to v2 without an explicit concurrency.
pub const CONCURRENCY_DEFAULT_WARNING: &str = "One or more functions are being upgraded to v2, \
    which serves up to 80 concurrent requests per instance by default. \
    Set concurrency to 1 to keep the v1 behavior.";

/// An update of a deployed endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// The desired endpoint.
    pub endpoint: Endpoint,
    /// The deployed endpoint to delete first, when the update cannot be applied in place.
    pub delete_and_recreate: Option<Endpoint>,
}

/// Changes of one region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionalChanges {
    /// Endpoints to create.
    pub endpoints_to_create: Vec<Endpoint>,
    /// Endpoints to update.
    pub endpoints_to_update: Vec<Update>,
    /// Endpoints to delete.
    pub endpoints_to_delete: Vec<Endpoint>,
    /// Unchanged endpoints. Reported, never deployed.
    pub endpoints_to_skip: Vec<Endpoint>,
}

/// A complete deployment plan.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Region -> changes.
    pub regions: BTreeMap<String, RegionalChanges>,
    /// Non-fatal notices for the user.
    pub warnings: Vec<String>,
}

/// Options of a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Filter groups; an endpoint is in scope if it matches any. Empty means everything.
    pub filters: Vec<Vec<String>>,
    /// Delete endpoints missing from the release even if they are not managed.
    pub delete_all: bool,
    /// Allow v1 endpoints to be redeployed as v2. Every such upgrade deletes
    /// the v1 function before creating the v2 one, so it is unavailable in
    /// between.
    pub allow_platform_upgrade: bool,
    /// Skip endpoints whose hash matches the deployed one. Only sound when the
    /// hash covers the deployed source, i.e. a source digest was supplied.
    pub skip_unchanged: bool,
}

impl PlanOptions {
    /// Builds options from filter strings in `group.fn` form.
    #[must_use]
    pub fn with_filters<S: AsRef<str>>(mut self, filters: &[S]) -> Self {
        self.filters = filters
            .iter()
            .map(|f| parse_filter(f.as_ref()))
            .filter(|f| !f.is_empty())
            .collect();
        self
    }
}

/// Splits a filter such as `group.fn` or `group-fn` into id segments.
#[must_use]
pub fn parse_filter(filter: &str) -> Vec<String> {
    filter
        .split(['.', '-'])
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Returns true if the endpoint id starts with the filter's segments.
#[must_use]
pub fn endpoint_matches_filter(endpoint: &Endpoint, filter: &[String]) -> bool {
    let segments: Vec<&str> = endpoint.id.split('-').collect();
    if segments.len() < filter.len() {
        return false;
    }
    segments.iter().zip(filter).all(|(segment, wanted)| *segment == wanted.as_str())
}

/// Returns true if the endpoint matches any filter. An empty list matches everything.
#[must_use]
pub fn endpoint_matches_any_filter(endpoint: &Endpoint, filters: &[Vec<String>]) -> bool {
    filters.is_empty() || filters.iter().any(|f| endpoint_matches_filter(endpoint, f))
}

/// Builds the plan that brings `have` to `want`.
///
/// Both backends are restricted to the filters first. Endpoints with
/// unchanged hashes are skipped only when `skip_unchanged` is set and no
/// filter targets them.
///
/// # Errors
///
/// Returns an error if any region contains an illegal update.
pub fn create_deployment_plan(
    want: &Backend,
    have: &Backend,
    options: &PlanOptions,
) -> Result<DeploymentPlan, PlanError> {
    let in_scope = |e: &Endpoint| endpoint_matches_any_filter(e, &options.filters);
    let want = matching_backend(want, &in_scope);
    let have = matching_backend(have, &in_scope);

    let changeset_options = ChangesetOptions {
        delete_all: options.delete_all,
        allow_platform_upgrade: options.allow_platform_upgrade,
        skip_unchanged: options.skip_unchanged && options.filters.is_empty(),
    };

    let regions: BTreeSet<&str> = want.regions().into_iter().chain(have.regions()).collect();
    let mut plan = DeploymentPlan::new();

    for region in regions {
        debug!("Planning region {region}");
        let changes = calculate_regional_changes(
            &want.regional(region),
            &have.regional(region),
            &changeset_options,
        )?;

        let needs_warning = changes
            .endpoints_to_update
            .iter()
            .any(upgraded_to_v2_without_concurrency);
        if needs_warning && !plan.warnings.iter().any(|w| w == CONCURRENCY_DEFAULT_WARNING) {
            warn!("{CONCURRENCY_DEFAULT_WARNING}");
            plan.warnings.push(String::from(CONCURRENCY_DEFAULT_WARNING));
        }

        plan.regions.insert(region.to_string(), changes);
    }

    info!(
        "Plan: {} to create, {} to update, {} to delete, {} unchanged",
        plan.total_creates(),
        plan.total_updates(),
        plan.total_deletes(),
        plan.total_skips()
    );

    Ok(plan)
}

impl RegionalChanges {
    /// Returns true if the region has nothing to deploy.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints_to_create.is_empty()
            && self.endpoints_to_update.is_empty()
            && self.endpoints_to_delete.is_empty()
    }
}

impl DeploymentPlan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            regions: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Returns the number of creates.
    #[must_use]
    pub fn total_creates(&self) -> usize {
        self.regions.values().map(|r| r.endpoints_to_create.len()).sum()
    }

    /// Returns the number of updates.
    #[must_use]
    pub fn total_updates(&self) -> usize {
        self.regions.values().map(|r| r.endpoints_to_update.len()).sum()
    }

    /// Returns the number of deletes.
    #[must_use]
    pub fn total_deletes(&self) -> usize {
        self.regions.values().map(|r| r.endpoints_to_delete.len()).sum()
    }

    /// Returns the number of skipped endpoints.
    #[must_use]
    pub fn total_skips(&self) -> usize {
        self.regions.values().map(|r| r.endpoints_to_skip.len()).sum()
    }

    /// Returns true if the plan has nothing to deploy.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.values().all(RegionalChanges::is_empty)
    }

    /// Returns every planned delete in deterministic order.
    #[must_use]
    pub fn pending_deletes(&self) -> Vec<&Endpoint> {
        let mut deletes: Vec<&Endpoint> = self
            .regions
            .values()
            .flat_map(|r| &r.endpoints_to_delete)
            .collect();
        deletes.sort_by(|a, b| compare_endpoints(a, b));
        deletes
    }

    /// Drops every planned delete.
    pub fn drop_deletes(&mut self) {
        for changes in self.regions.values_mut() {
            changes.endpoints_to_delete.clear();
        }
    }

    /// Returns every endpoint that will exist after the plan is applied.
    #[must_use]
    pub fn deployed_endpoints(&self) -> Vec<&Endpoint> {
        let mut endpoints: Vec<&Endpoint> = self
            .regions
            .values()
            .flat_map(|r| {
                r.endpoints_to_create
                    .iter()
                    .chain(r.endpoints_to_update.iter().map(|u| &u.endpoint))
                    .chain(&r.endpoints_to_skip)
            })
            .collect();
        endpoints.sort_by(|a, b| compare_endpoints(a, b));
        endpoints
    }
}

impl Default for DeploymentPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeploymentPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (region, changes) in &self.regions {
            writeln!(f, "{region}:")?;
            for endpoint in &changes.endpoints_to_create {
                writeln!(f, "  + {} ({})", endpoint.id, endpoint.platform)?;
            }
            for update in &changes.endpoints_to_update {
                let marker = if update.delete_and_recreate.is_some() { "-/+" } else { "~" };
                writeln!(f, "  {marker} {} ({})", update.endpoint.id, update.endpoint.platform)?;
            }
            for endpoint in &changes.endpoints_to_delete {
                writeln!(f, "  - {} ({})", endpoint.id, endpoint.platform)?;
            }
            for endpoint in &changes.endpoints_to_skip {
                writeln!(f, "  = {} ({})", endpoint.id, endpoint.platform)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{managed_labels, EndpointKey, HttpsTrigger, Platform, Trigger};

    fn endpoint(platform: Platform, region: &str, id: &str) -> Endpoint {
        Endpoint::new(
            EndpointKey::new("proj", region, id),
            platform,
            "nodejs20",
            id,
            Trigger::HttpsTrigger(HttpsTrigger::default()),
        )
    }

    fn managed(mut endpoint: Endpoint) -> Endpoint {
        endpoint.labels.extend(managed_labels());
        endpoint
    }

    #[test]
    fn test_parse_filter() {
        assert_eq!(parse_filter("api.users"), vec!["api", "users"]);
        assert_eq!(parse_filter("api-users"), vec!["api", "users"]);
        assert_eq!(parse_filter("nightly"), vec!["nightly"]);
        assert!(parse_filter("..").is_empty());
    }

    #[test]
    fn test_filter_matching() {
        let endpoint = endpoint(Platform::V1, "us-central1", "api-users-get");
        assert!(endpoint_matches_filter(&endpoint, &parse_filter("api")));
        assert!(endpoint_matches_filter(&endpoint, &parse_filter("api.users")));
        assert!(!endpoint_matches_filter(&endpoint, &parse_filter("api.orders")));
        assert!(!endpoint_matches_filter(&endpoint, &parse_filter("api.users.get.extra")));
        assert!(!endpoint_matches_filter(&endpoint, &parse_filter("ap")));
        assert!(endpoint_matches_any_filter(&endpoint, &[]));
    }

    #[test]
    fn test_single_create_plan() {
        let want = Backend::of([endpoint(Platform::V1, "us-central1", "foo")]).expect("want");

        let plan = create_deployment_plan(&want, &Backend::empty(), &PlanOptions::default())
            .expect("plan");

        assert_eq!(plan.regions.len(), 1);
        let changes = plan.regions.get("us-central1").expect("region planned");
        assert_eq!(changes.endpoints_to_create.len(), 1);
        assert_eq!(changes.endpoints_to_create[0].id, "foo");
        assert!(changes.endpoints_to_update.is_empty());
        assert!(changes.endpoints_to_delete.is_empty());
    }

    #[test]
    fn test_regions_are_unioned() {
        let want = Backend::of([endpoint(Platform::V2, "us-east1", "a")]).expect("want");
        let have =
            Backend::of([managed(endpoint(Platform::V2, "europe-west1", "b"))]).expect("have");

        let plan = create_deployment_plan(&want, &have, &PlanOptions::default()).expect("plan");

        assert_eq!(
            plan.regions.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["europe-west1", "us-east1"]
        );
        assert_eq!(plan.total_creates(), 1);
        assert_eq!(plan.total_deletes(), 1);
        assert_eq!(plan.pending_deletes()[0].id, "b");
    }

    #[test]
    fn test_filters_restrict_both_sides() {
        let want = Backend::of([
            endpoint(Platform::V1, "us-central1", "api-users"),
            endpoint(Platform::V1, "us-central1", "jobs-nightly"),
        ])
        .expect("want");
        let have = Backend::of([
            managed(endpoint(Platform::V1, "us-central1", "api-old")),
            managed(endpoint(Platform::V1, "us-central1", "jobs-weekly")),
        ])
        .expect("have");

        let options = PlanOptions::default().with_filters(&["api"]);
        let plan = create_deployment_plan(&want, &have, &options).expect("plan");

        assert_eq!(plan.total_creates(), 1);
        assert_eq!(plan.total_deletes(), 1);
        assert_eq!(plan.pending_deletes()[0].id, "api-old");
    }

    #[test]
    fn test_targeted_endpoints_are_not_skipped() {
        let mut want_endpoint = endpoint(Platform::V2, "us-central1", "api");
        want_endpoint.hash = Some(String::from("same"));
        let mut have_endpoint = managed(want_endpoint.clone());
        have_endpoint.uri = Some(String::from("https://api.example"));
        let want = Backend::of([want_endpoint]).expect("want");
        let have = Backend::of([have_endpoint]).expect("have");

        let options = PlanOptions {
            skip_unchanged: true,
            ..PlanOptions::default()
        };

        let untargeted = create_deployment_plan(&want, &have, &options).expect("plan");
        assert_eq!(untargeted.total_skips(), 1);
        assert!(untargeted.is_empty());

        let targeted = create_deployment_plan(&want, &have, &options.with_filters(&["api"]))
            .expect("plan");
        assert_eq!(targeted.total_updates(), 1);
    }

    #[test]
    fn test_equal_config_hash_without_source_digest_is_updated() {
        // Same config, new source object: the hash alone cannot tell them apart.
        let hasher = crate::config::EndpointHasher::new();
        let mut want_endpoint = endpoint(Platform::V2, "us-central1", "api");
        want_endpoint.hash = Some(hasher.hash_endpoint(&want_endpoint, None));
        let have_endpoint = managed(want_endpoint.clone());
        let want = Backend::of([want_endpoint]).expect("want");
        let have = Backend::of([have_endpoint]).expect("have");

        let plan = create_deployment_plan(&want, &have, &PlanOptions::default()).expect("plan");

        assert_eq!(plan.total_updates(), 1);
        assert_eq!(plan.total_skips(), 0);
    }

    #[test]
    fn test_concurrency_warning_emitted_once() {
        let want = Backend::of([
            endpoint(Platform::V2, "us-central1", "a"),
            endpoint(Platform::V2, "us-east1", "b"),
        ])
        .expect("want");
        let have = Backend::of([
            managed(endpoint(Platform::V1, "us-central1", "a")),
            managed(endpoint(Platform::V1, "us-east1", "b")),
        ])
        .expect("have");

        let options = PlanOptions {
            allow_platform_upgrade: true,
            ..PlanOptions::default()
        };
        let plan = create_deployment_plan(&want, &have, &options).expect("plan");

        assert_eq!(plan.warnings, vec![CONCURRENCY_DEFAULT_WARNING.to_string()]);
        assert_eq!(plan.total_updates(), 2);
    }

    #[test]
    fn test_illegal_update_aborts_plan() {
        let want = Backend::of([endpoint(Platform::V1, "us-central1", "a")]).expect("want");
        let have =
            Backend::of([managed(endpoint(Platform::V2, "us-central1", "a"))]).expect("have");

        assert!(create_deployment_plan(&want, &have, &PlanOptions::default()).is_err());
    }

    #[test]
    fn test_drop_deletes_and_display() {
        let want = Backend::of([endpoint(Platform::V1, "us-central1", "keep")]).expect("want");
        let have = Backend::of([
            managed(endpoint(Platform::V1, "us-central1", "keep")),
            managed(endpoint(Platform::V1, "us-central1", "gone")),
        ])
        .expect("have");

        let mut plan = create_deployment_plan(&want, &have, &PlanOptions::default()).expect("plan");
        let rendered = plan.to_string();
        assert!(rendered.contains("  ~ keep (v1)"));
        assert!(rendered.contains("  - gone (v1)"));

        plan.drop_deletes();
        assert_eq!(plan.total_deletes(), 0);
        assert_eq!(plan.deployed_endpoints().len(), 1);
    }
}
