//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::backend::Endpoint;
use crate::config::{ReleaseConfig, ValidationResult};
use crate::planner::DeploymentPlan;
use crate::release::ReleaseOutcome;
use crate::reporter::Outcome;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Function")]
    function: String,
    #[tabled(rename = "Platform")]
    platform: String,
    #[tabled(rename = "Trigger")]
    trigger: String,
}

/// Result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Function")]
    function: String,
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Duration")]
    duration: String,
}

/// One planned action, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Action {
    Create,
    Update,
    Replace,
    Delete,
    Skip,
}

impl Action {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Skip => "skip",
        }
    }
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a deployment plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &DeploymentPlan) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&PlanJson::from(plan)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &DeploymentPlan) -> String {
        let mut output = String::new();
        for warning in &plan.warnings {
            let _ = writeln!(output, "{} {warning}", "!".yellow());
        }

        if plan.is_empty() {
            let _ = writeln!(
                output,
                "{} No changes required, every function is up to date.",
                "✓".green()
            );
            return output;
        }

        let _ = writeln!(
            output,
            "\nDeployment Plan ({})",
            plan.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        let rows: Vec<PlanActionRow> = planned_actions(plan)
            .into_iter()
            .filter(|(action, _)| *action != Action::Skip)
            .enumerate()
            .map(|(i, (action, endpoint))| PlanActionRow {
                index: i + 1,
                action: Self::format_action(action),
                function: endpoint.label(),
                platform: endpoint.platform.to_string(),
                trigger: endpoint.trigger_kind().to_string(),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = writeln!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete, {} unchanged",
            plan.total_creates().to_string().green(),
            plan.total_updates().to_string().yellow(),
            plan.total_deletes().to_string().red(),
            plan.total_skips()
        );
        output
    }

    /// Formats the results of a release.
    #[must_use]
    pub fn format_outcome(&self, outcome: &ReleaseOutcome) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&OutcomeJson::from(outcome)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_outcome_text(outcome),
        }
    }

    fn format_outcome_text(outcome: &ReleaseOutcome) -> String {
        let summary = &outcome.summary;
        let mut output = String::new();
        if summary.results.is_empty() {
            let _ = writeln!(output, "{} Nothing was deployed.", "✓".green());
            return output;
        }

        let rows: Vec<ResultRow> = summary
            .results
            .iter()
            .map(|r| ResultRow {
                function: r.endpoint.label(),
                operation: r.op.to_string(),
                result: Self::format_result(r.outcome()),
                duration: format!("{:.1}s", Duration(r.duration_ms)),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = writeln!(
            output,
            "\n{} Release {} finished in {:.1}s: {} succeeded",
            "✓".green(),
            summary.release_id,
            Duration(summary.total_time_ms),
            outcome.report.succeeded.len()
        );
        for endpoint in summary.deployed() {
            if let Some(uri) = &endpoint.uri {
                let _ = writeln!(output, "  {} {uri}", endpoint.label().bold());
            }
        }
        output
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &ReleaseConfig,
        results: &[ValidationResult],
        show_warnings: bool,
    ) -> String {
        let warnings: Vec<&String> = results.iter().flat_map(|r| &r.warnings).collect();
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "status": "valid",
                "project": config.project,
                "warnings": warnings,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!(
                    "{} Configuration is valid for project {}\n",
                    "✓".green(),
                    config.project
                );
                if show_warnings && !warnings.is_empty() {
                    output.push_str("\nWarnings:\n");
                    for warning in warnings {
                        let _ = writeln!(output, "  - {warning}");
                    }
                }
                output
            }
        }
    }

    fn format_action(action: Action) -> String {
        match action {
            Action::Create => action.as_str().green().to_string(),
            Action::Update => action.as_str().yellow().to_string(),
            Action::Replace => action.as_str().magenta().to_string(),
            Action::Delete => action.as_str().red().to_string(),
            Action::Skip => action.as_str().dimmed().to_string(),
        }
    }

    fn format_result(outcome: Outcome) -> String {
        match outcome {
            Outcome::Succeeded => outcome.to_string().green().to_string(),
            Outcome::Failed => outcome.to_string().red().to_string(),
            Outcome::Aborted => outcome.to_string().yellow().to_string(),
        }
    }
}

/// Milliseconds rendered as seconds.
struct Duration(u64);

impl std::fmt::Display for Duration {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&(self.0 as f64 / 1000.0), f)
    }
}

/// Lists planned actions region by region.
fn planned_actions(plan: &DeploymentPlan) -> Vec<(Action, &Endpoint)> {
    let mut actions = Vec::new();
    for changes in plan.regions.values() {
        actions.extend(changes.endpoints_to_create.iter().map(|e| (Action::Create, e)));
        actions.extend(changes.endpoints_to_update.iter().map(|u| {
            let action = if u.delete_and_recreate.is_some() {
                Action::Replace
            } else {
                Action::Update
            };
            (action, &u.endpoint)
        }));
        actions.extend(changes.endpoints_to_delete.iter().map(|e| (Action::Delete, e)));
        actions.extend(changes.endpoints_to_skip.iter().map(|e| (Action::Skip, e)));
    }
    actions
}

// JSON serialization helpers

#[derive(Serialize)]
struct PlanJson {
    created_at: String,
    creates: usize,
    updates: usize,
    deletes: usize,
    skips: usize,
    warnings: Vec<String>,
    actions: Vec<ActionJson>,
}

#[derive(Serialize)]
struct ActionJson {
    action: Action,
    function: String,
    region: String,
    platform: String,
    trigger: String,
}

impl From<&DeploymentPlan> for PlanJson {
    fn from(plan: &DeploymentPlan) -> Self {
        Self {
            created_at: plan.created_at.to_rfc3339(),
            creates: plan.total_creates(),
            updates: plan.total_updates(),
            deletes: plan.total_deletes(),
            skips: plan.total_skips(),
            warnings: plan.warnings.clone(),
            actions: planned_actions(plan)
                .into_iter()
                .map(|(action, e)| ActionJson {
                    action,
                    function: e.id.clone(),
                    region: e.region.clone(),
                    platform: e.platform.to_string(),
                    trigger: e.trigger_kind().to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct OutcomeJson {
    release_id: String,
    total_time_ms: u64,
    results: Vec<ResultJson>,
}

#[derive(Serialize)]
struct ResultJson {
    function: String,
    region: String,
    operation: String,
    outcome: Outcome,
    duration_ms: u64,
    uri: Option<String>,
}

impl From<&ReleaseOutcome> for OutcomeJson {
    fn from(outcome: &ReleaseOutcome) -> Self {
        Self {
            release_id: outcome.summary.release_id.to_string(),
            total_time_ms: outcome.summary.total_time_ms,
            results: outcome
                .summary
                .results
                .iter()
                .map(|r| ResultJson {
                    function: r.endpoint.id.clone(),
                    region: r.endpoint.region.clone(),
                    operation: r.op.to_string(),
                    outcome: r.outcome(),
                    duration_ms: r.duration_ms,
                    uri: r.endpoint.uri.clone(),
                })
                .collect(),
        }
    }
}
