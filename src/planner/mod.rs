//! Planning module for release operations.
//!
//! This module compares the desired endpoints with the deployed ones and
//! produces a per-region plan of creates, updates, and deletes.

mod diff;
mod plan;

pub use diff::{
    calculate_regional_changes, calculate_update, check_for_illegal_update,
    upgraded_schedule_from_v1_to_v2, upgraded_to_v2_without_concurrency, ChangesetOptions,
};
pub use plan::{
    create_deployment_plan, endpoint_matches_any_filter, endpoint_matches_filter, parse_filter,
    DeploymentPlan, PlanOptions, RegionalChanges, Update, CONCURRENCY_DEFAULT_WARNING,
};
