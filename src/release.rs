//! Release driver.
//!
//! A release plans the changes between the desired and deployed backends,
//! asks before deleting anything, fabricates the plan, reports the results,
//! and cleans up build artifacts of what was deployed or deleted.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, TriggerKind};
use crate::cloud::ArtifactCleaner;
use crate::error::{DeployFailure, PlanError, ReleaseError, Result};
use crate::fabricator::Fabricator;
use crate::planner::{create_deployment_plan, DeploymentPlan, PlanOptions};
use crate::reporter::{DeploySummary, Reporter, SummaryReport};

/// Asks the operator to approve a destructive action.
#[cfg_attr(test, mockall::automock)]
pub trait Confirm: Send + Sync {
    /// Returns true if the operator approved.
    fn confirm(&self, message: &str) -> bool;
}

/// How deletions are approved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseOptions {
    /// Delete without asking.
    pub force: bool,
    /// Nobody can answer a prompt.
    pub non_interactive: bool,
}

/// Everything a successful release produced.
#[derive(Debug, Clone)]
pub struct ReleaseOutcome {
    /// The plan that was applied, after confirmation.
    pub plan: DeploymentPlan,
    /// Per-endpoint results.
    pub summary: DeploySummary,
    /// Operator report.
    pub report: SummaryReport,
}

/// Drives a release from plan to cleanup.
pub struct ReleaseDriver {
    fabricator: Arc<Fabricator>,
    cleaner: Arc<dyn ArtifactCleaner>,
    confirm: Box<dyn Confirm>,
    reporter: Reporter,
    options: ReleaseOptions,
}

impl ReleaseDriver {
    /// Creates a driver with the default reporter and options.
    #[must_use]
    pub fn new(
        fabricator: Arc<Fabricator>,
        cleaner: Arc<dyn ArtifactCleaner>,
        confirm: Box<dyn Confirm>,
    ) -> Self {
        Self {
            fabricator,
            cleaner,
            confirm,
            reporter: Reporter::default(),
            options: ReleaseOptions::default(),
        }
    }

    /// Sets the reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Sets the deletion options.
    #[must_use]
    pub const fn with_options(mut self, options: ReleaseOptions) -> Self {
        self.options = options;
        self
    }

    /// Runs a release.
    ///
    /// # Errors
    ///
    /// Returns a planning error before anything is changed, or a deploy
    /// failure listing every endpoint that failed or was aborted.
    pub async fn release(
        &self,
        want: &Backend,
        have: &Backend,
        plan_options: &PlanOptions,
    ) -> Result<ReleaseOutcome> {
        let mut plan = create_deployment_plan(want, have, plan_options)?;
        for warning in &plan.warnings {
            warn!("{warning}");
        }

        self.confirm_deletes(&mut plan)?;

        if plan.is_empty() {
            info!("No changes to deploy");
        }

        let summary = self.fabricator.apply_plan(&plan).await;
        let report = self.reporter.summarize(&summary);

        for endpoint in summary.deployed() {
            if endpoint.trigger_kind() == TriggerKind::Https
                && let Some(uri) = &endpoint.uri
            {
                info!("Function URL ({}): {uri}", endpoint.label());
            }
        }

        let deployed: Vec<_> = summary.deployed().into_iter().cloned().collect();
        let deleted: Vec<_> = summary.deleted().into_iter().cloned().collect();
        if let Err(e) = self.cleaner.cleanup(&deployed, &deleted).await {
            warn!(
                "Unable to clean up build artifacts: {e}. \
                 You may be billed for leftover images."
            );
        }

        if let Some(failure) = DeployFailure::from_errors(summary.errors()) {
            for line in &report.error_lines {
                error!("{line}");
            }
            for hint in &report.hints {
                warn!("{hint}");
            }
            return Err(ReleaseError::Deploy(failure));
        }

        debug!("Release {} succeeded", summary.release_id);
        Ok(ReleaseOutcome { plan, summary, report })
    }

    fn confirm_deletes(&self, plan: &mut DeploymentPlan) -> Result<()> {
        let pending = plan.pending_deletes();
        if pending.is_empty() || self.options.force {
            return Ok(());
        }

        let count = pending.len();
        if self.options.non_interactive {
            return Err(PlanError::NonInteractiveDeletion { count }.into());
        }

        let names: Vec<String> = pending.iter().map(|e| e.label()).collect();
        let message = format!(
            "The following functions are found in your project but do not exist \
             in the release:\n\t{}\n\
             Would you like to proceed with deletion? \
             Selecting no will continue the rest of the deployment.",
            names.join("\n\t")
        );
        if !self.confirm.confirm(&message) {
            info!("Skipping deletion of {count} function(s)");
            plan.drop_deletes();
        }
        Ok(())
    }
}

impl std::fmt::Debug for ReleaseDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseDriver")
            .field("fabricator", &self.fabricator)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        managed_labels, Endpoint, EndpointKey, HttpsTrigger, Platform, Trigger,
        DEPLOYMENT_TOOL_LABEL, DEPLOYMENT_TOOL_VALUE,
    };
    use crate::cloud::fake::FakeCloud;
    use crate::config::{ExecutorConfig, ReleaseConfig};
    use crate::error::ApiError;

    fn config() -> ReleaseConfig {
        let mut config = ReleaseConfig::for_project("proj");
        config.sources.v1_source_url = Some(String::from("https://upload.example.com/source.zip"));
        let fast = ExecutorConfig {
            concurrency: 4,
            retries: 0,
            backoff_ms: 1,
            max_backoff_ms: 1,
        };
        config.executors.heavy = fast;
        config.executors.light = fast;
        config
    }

    fn https(id: &str) -> Endpoint {
        Endpoint::new(
            EndpointKey::new("proj", "us-central1", id),
            Platform::V1,
            "nodejs20",
            id,
            Trigger::HttpsTrigger(HttpsTrigger::default()),
        )
    }

    fn managed(id: &str) -> Endpoint {
        let mut endpoint = https(id);
        endpoint
            .labels
            .insert(DEPLOYMENT_TOOL_LABEL.to_string(), DEPLOYMENT_TOOL_VALUE.to_string());
        endpoint
    }

    fn driver(
        cloud: &Arc<FakeCloud>,
        confirm: MockConfirm,
        options: ReleaseOptions,
    ) -> ReleaseDriver {
        let fabricator = Arc::new(Fabricator::new(cloud.plane(), &config()));
        let cleaner: Arc<dyn ArtifactCleaner> = cloud.clone();
        ReleaseDriver::new(fabricator, cleaner, Box::new(confirm)).with_options(options)
    }

    fn backends() -> (Backend, Backend) {
        let want = Backend::of([https("keep")]).expect("want");
        let have = Backend::of([managed("keep"), managed("stale")]).expect("have");
        (want, have)
    }

    #[tokio::test]
    async fn test_declined_confirmation_drops_deletes() {
        let cloud = FakeCloud::new();
        let mut confirm = MockConfirm::new();
        confirm
            .expect_confirm()
            .withf(|message| message.contains("stale(us-central1)"))
            .times(1)
            .return_const(false);
        let (want, have) = backends();

        let outcome = driver(&cloud, confirm, ReleaseOptions::default())
            .release(&want, &have, &PlanOptions::default())
            .await
            .expect("release");

        assert_eq!(outcome.plan.total_deletes(), 0);
        assert_eq!(outcome.plan.total_updates(), 1);
        assert!(cloud.calls_starting_with("v1.delete").is_empty());
        assert_eq!(
            cloud.calls_starting_with("artifacts.cleanup"),
            vec![String::from("artifacts.cleanup 1 0")]
        );
    }

    #[tokio::test]
    async fn test_non_interactive_deletion_aborts_before_any_change() {
        let cloud = FakeCloud::new();
        let mut confirm = MockConfirm::new();
        confirm.expect_confirm().never();
        let (want, have) = backends();
        let options = ReleaseOptions {
            force: false,
            non_interactive: true,
        };

        let err = driver(&cloud, confirm, options)
            .release(&want, &have, &PlanOptions::default())
            .await
            .expect_err("should abort");

        assert!(matches!(err, ReleaseError::Plan(PlanError::NonInteractiveDeletion { count: 1 })));
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_force_deletes_without_asking() {
        let cloud = FakeCloud::new();
        let mut confirm = MockConfirm::new();
        confirm.expect_confirm().never();
        let (want, have) = backends();
        let options = ReleaseOptions {
            force: true,
            non_interactive: true,
        };

        let outcome = driver(&cloud, confirm, options)
            .release(&want, &have, &PlanOptions::default())
            .await
            .expect("release");

        assert_eq!(outcome.summary.deleted().len(), 1);
        assert!(cloud
            .position("v1.delete projects/proj/locations/us-central1/functions/stale")
            .is_some());
    }

    #[tokio::test]
    async fn test_single_failure_is_reported_as_deploy_error() {
        let cloud = FakeCloud::new();
        cloud.fail_on(
            "v1.create projects/proj/locations/us-central1/functions/fresh",
            ApiError::status(400, "bad"),
        );
        let want = Backend::of([https("fresh")]).expect("want");

        let err = driver(&cloud, MockConfirm::new(), ReleaseOptions::default())
            .release(&want, &Backend::empty(), &PlanOptions::default())
            .await
            .expect_err("should fail");

        match err {
            ReleaseError::Deploy(DeployFailure::Single(error)) => {
                assert_eq!(error.endpoint(), &EndpointKey::new("proj", "us-central1", "fresh"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cleanup_failure_is_not_fatal() {
        let cloud = FakeCloud::new();
        cloud.fail_on("artifacts.cleanup 1 0", ApiError::status(500, "registry down"));
        let want = Backend::of([https("fresh")]).expect("want");

        let outcome = driver(&cloud, MockConfirm::new(), ReleaseOptions::default())
            .release(&want, &Backend::empty(), &PlanOptions::default())
            .await
            .expect("release succeeds");

        assert!(outcome.summary.is_success());
    }

    #[tokio::test]
    async fn test_release_against_listed_backend() {
        let cloud = FakeCloud::new();
        cloud.add_v1_function(crate::cloud::V1Function {
            name: String::from("projects/proj/locations/us-central1/functions/legacy"),
            runtime: String::from("nodejs18"),
            entry_point: String::from("legacy"),
            https_trigger: Some(crate::cloud::V1HttpsTrigger::default()),
            labels: managed_labels(),
            ..crate::cloud::V1Function::default()
        });
        cloud.add_v2_function(crate::cloud::V2Function {
            name: String::from("projects/proj/locations/us-central1/functions/manual"),
            ..crate::cloud::V2Function::default()
        });

        let have = crate::cloud::list_backend(
            cloud.plane().functions_v1.as_ref(),
            cloud.plane().functions_v2.as_ref(),
            "proj",
        )
        .await
        .expect("have");
        assert_eq!(have.len(), 2);

        let want = Backend::of([https("fresh")]).expect("want");
        let options = ReleaseOptions {
            force: true,
            non_interactive: true,
        };
        let outcome = driver(&cloud, MockConfirm::new(), options)
            .release(&want, &have, &PlanOptions::default())
            .await
            .expect("release");

        // Only the managed function is deleted.
        assert_eq!(outcome.plan.total_deletes(), 1);
        assert!(cloud
            .position("v1.delete projects/proj/locations/us-central1/functions/legacy")
            .is_some());
        assert!(cloud.calls_starting_with("v2.delete").is_empty());
    }
}
