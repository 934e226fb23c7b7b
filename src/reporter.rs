//! Release results and reporting.
//!
//! The fabricator records one [`DeployResult`] per planned endpoint. The
//! [`Reporter`] turns a [`DeploySummary`] into telemetry events, error lines,
//! and hints for the operator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{compare_endpoints, Endpoint, EndpointKey, Platform, TriggerKind};
use crate::error::{ApiError, DeploymentError, OperationKind};

/// Final state of one planned endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Every call succeeded.
    Succeeded,
    /// A call failed.
    Failed,
    /// The delete was never attempted.
    Aborted,
}

/// Result of one planned endpoint.
#[derive(Debug, Clone)]
pub struct DeployResult {
    /// The endpoint, with `uri` set when it was deployed.
    pub endpoint: Endpoint,
    /// Planned operation.
    pub op: OperationKind,
    /// Wall time spent on the endpoint.
    pub duration_ms: u64,
    /// Failure, if any.
    pub error: Option<DeploymentError>,
}

/// Every result of one release.
#[derive(Debug, Clone)]
pub struct DeploySummary {
    /// Release identifier.
    pub release_id: Uuid,
    /// When fabrication started.
    pub started_at: DateTime<Utc>,
    /// Wall time of the whole release.
    pub total_time_ms: u64,
    /// One result per planned endpoint.
    pub results: Vec<DeployResult>,
}

/// Aggregated telemetry for one trigger kind, platform and outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployStatEvent {
    /// Trigger kind.
    pub trigger: TriggerKind,
    /// Platform.
    pub platform: Platform,
    /// Outcome.
    pub outcome: Outcome,
    /// Number of endpoints.
    pub count: usize,
    /// Summed duration of those endpoints.
    pub total_duration_ms: u64,
}

/// Receives release telemetry.
#[cfg_attr(test, mockall::automock)]
pub trait TelemetrySink: Send + Sync {
    /// Records one aggregated event.
    fn track(&self, event: &DeployStatEvent);
}

/// Telemetry sink that writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn track(&self, event: &DeployStatEvent) {
        debug!(
            "function_deploy {} {} {}: count={} duration={}ms",
            event.trigger, event.platform, event.outcome, event.count, event.total_duration_ms
        );
    }
}

/// What the operator is told after a release.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryReport {
    /// Endpoints that deployed.
    pub succeeded: Vec<EndpointKey>,
    /// Endpoints that failed.
    pub failed: Vec<EndpointKey>,
    /// Endpoints whose delete was aborted.
    pub aborted: Vec<EndpointKey>,
    /// One line per failure, in endpoint order.
    pub error_lines: Vec<String>,
    /// Remediation hints.
    pub hints: Vec<String>,
}

/// Builds reports and emits telemetry.
pub struct Reporter {
    sink: Box<dyn TelemetrySink>,
}

impl DeployResult {
    /// A successful result.
    #[must_use]
    pub const fn succeeded(endpoint: Endpoint, op: OperationKind, duration_ms: u64) -> Self {
        Self {
            endpoint,
            op,
            duration_ms,
            error: None,
        }
    }

    /// A failed result.
    #[must_use]
    pub const fn failed(
        endpoint: Endpoint,
        op: OperationKind,
        duration_ms: u64,
        error: DeploymentError,
    ) -> Self {
        Self {
            endpoint,
            op,
            duration_ms,
            error: Some(error),
        }
    }

    /// A delete that never ran.
    #[must_use]
    pub fn aborted(endpoint: Endpoint) -> Self {
        let key = endpoint.key();
        Self {
            endpoint,
            op: OperationKind::Delete,
            duration_ms: 0,
            error: Some(DeploymentError::Aborted { endpoint: key }),
        }
    }

    /// Returns the final state of the endpoint.
    #[must_use]
    pub const fn outcome(&self) -> Outcome {
        match &self.error {
            None => Outcome::Succeeded,
            Some(DeploymentError::Aborted { .. }) => Outcome::Aborted,
            Some(DeploymentError::Failed { .. }) => Outcome::Failed,
        }
    }
}

impl DeploySummary {
    /// Returns every endpoint error, failures and aborts alike.
    #[must_use]
    pub fn errors(&self) -> Vec<DeploymentError> {
        self.results.iter().filter_map(|r| r.error.clone()).collect()
    }

    /// Returns true if every endpoint succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.error.is_none())
    }

    /// Successfully deployed (created or updated) endpoints.
    #[must_use]
    pub fn deployed(&self) -> Vec<&Endpoint> {
        self.results
            .iter()
            .filter(|r| r.error.is_none() && r.op != OperationKind::Delete)
            .map(|r| &r.endpoint)
            .collect()
    }

    /// Successfully deleted endpoints.
    #[must_use]
    pub fn deleted(&self) -> Vec<&Endpoint> {
        self.results
            .iter()
            .filter(|r| r.error.is_none() && r.op == OperationKind::Delete)
            .map(|r| &r.endpoint)
            .collect()
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Succeeded => "success",
            Self::Failed => "failure",
            Self::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(Box::new(TracingTelemetry))
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter").finish_non_exhaustive()
    }
}

impl Reporter {
    /// Creates a reporter that sends telemetry to `sink`.
    #[must_use]
    pub fn new(sink: Box<dyn TelemetrySink>) -> Self {
        Self { sink }
    }

    /// Summarizes a release.
    pub fn summarize(&self, summary: &DeploySummary) -> SummaryReport {
        let mut results: Vec<&DeployResult> = summary.results.iter().collect();
        results.sort_by(|a, b| compare_endpoints(&a.endpoint, &b.endpoint));

        self.track(&results);

        let mut report = SummaryReport::default();
        for result in &results {
            let key = result.endpoint.key();
            match (result.outcome(), &result.error) {
                (Outcome::Succeeded, _) => report.succeeded.push(key),
                (Outcome::Aborted, _) => report.aborted.push(key),
                (Outcome::Failed, Some(error)) => {
                    report.error_lines.push(error.to_string());
                    report.failed.push(key);
                }
                (Outcome::Failed, None) => report.failed.push(key),
            }
        }

        let iam_failures: Vec<String> = results
            .iter()
            .filter_map(|r| r.error.as_ref())
            .filter(|e| e.op() == OperationKind::SetInvoker)
            .map(|e| e.endpoint().to_string())
            .collect();
        if !iam_failures.is_empty() {
            report.hints.push(format!(
                "Unable to set the invoker for the IAM policy on the following functions: {}. \
                 Setting invokers requires the resourcemanager.projects.setIamPolicy permission \
                 (granted by the Owner role). Ask a project owner to grant it, \
                 or redeploy once access is granted.",
                iam_failures.join(", ")
            ));
        }

        let quota_exceeded = results
            .iter()
            .filter_map(|r| r.error.as_ref().and_then(DeploymentError::cause))
            .any(ApiError::is_quota_exceeded);
        if quota_exceeded {
            report.hints.push(String::from(
                "Exceeded maximum retries while deploying functions. If you are deploying a large \
                 number of functions, consider deploying them in batches with --only and wait a \
                 few minutes before deploying again.",
            ));
        }

        if !report.aborted.is_empty() {
            info!(
                "{} function(s) were not deleted because other deployments in their region failed",
                report.aborted.len()
            );
        }

        let total = results.len();
        let summed: u64 = results.iter().map(|r| r.duration_ms).sum();
        let average = if total == 0 { 0 } else { summed / total as u64 };
        debug!(
            "Release {}: {total} endpoint(s), {} succeeded, {} failed, {} aborted, \
             average {average}ms, total {}ms",
            summary.release_id,
            report.succeeded.len(),
            report.failed.len(),
            report.aborted.len(),
            summary.total_time_ms
        );

        report
    }

    fn track(&self, results: &[&DeployResult]) {
        let mut groups: BTreeMap<(TriggerKind, Platform, Outcome), (usize, u64)> = BTreeMap::new();
        for result in results {
            let entry = groups
                .entry((result.endpoint.trigger_kind(), result.endpoint.platform, result.outcome()))
                .or_default();
            entry.0 += 1;
            entry.1 += result.duration_ms;
        }

        for ((trigger, platform, outcome), (count, total_duration_ms)) in groups {
            self.sink.track(&DeployStatEvent {
                trigger,
                platform,
                outcome,
                count,
                total_duration_ms,
            });
        }
    }
}
