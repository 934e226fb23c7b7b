//! Configuration types for a release.
//!
//! This module defines the structs that map to `fnrelease.yaml`: the target
//! project, where the uploaded sources live, planner switches, executor
//! profiles, and long-running-operation poller settings.

use serde::{Deserialize, Serialize};

/// The root configuration of a release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseConfig {
    /// Target project id.
    pub project: String,
    /// Location of scheduler jobs for v1 scheduled functions.
    #[serde(default = "default_app_engine_location")]
    pub app_engine_location: String,
    /// Uploaded source locations.
    #[serde(default)]
    pub sources: SourcesConfig,
    /// Planner switches.
    #[serde(default)]
    pub planner: PlannerConfig,
    /// Executor profiles.
    #[serde(default)]
    pub executors: ExecutorsConfig,
    /// Operation poller settings per platform.
    #[serde(default)]
    pub pollers: PollersConfig,
    /// API origins.
    #[serde(default)]
    pub api: ApiConfig,
}

/// Where the packaged sources were uploaded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourcesConfig {
    /// Signed upload URL used by v1 creates and updates.
    #[serde(default)]
    pub v1_source_url: Option<String>,
    /// Storage object used by v2 creates and updates.
    #[serde(default)]
    pub v2_storage: Option<StorageSource>,
    /// Digest of the packaged sources, mixed into endpoint hashes.
    #[serde(default)]
    pub digest: Option<String>,
}

/// A storage object holding packaged sources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSource {
    /// Bucket name.
    pub bucket: String,
    /// Object name.
    pub object: String,
    /// Object generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
}

/// Planner switches.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannerConfig {
    /// Delete functions missing from the release even if this tool did not create them.
    #[serde(default)]
    pub delete_all: bool,
    /// Allow v1 functions to be redeployed as v2.
    #[serde(default)]
    pub allow_platform_upgrade: bool,
    /// Only deploy functions matching these filters (`group.fn` form).
    #[serde(default)]
    pub only: Vec<String>,
}

/// Executor profiles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutorsConfig {
    /// Create, update, and delete calls that start long-running operations.
    #[serde(default = "ExecutorConfig::heavy")]
    pub heavy: ExecutorConfig,
    /// Secondary calls: invoker policies, topics, queues, jobs.
    #[serde(default = "ExecutorConfig::light")]
    pub light: ExecutorConfig,
}

/// One executor profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum concurrent calls.
    pub concurrency: usize,
    /// Maximum retries of a transient failure.
    pub retries: u32,
    /// First backoff delay in milliseconds.
    pub backoff_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_backoff_ms: u64,
}

/// Poller settings per platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollersConfig {
    /// v1 functions API.
    #[serde(default = "PollerConfig::v1")]
    pub v1: PollerConfig,
    /// v2 functions API.
    #[serde(default = "PollerConfig::v2")]
    pub v2: PollerConfig,
}

/// Settings of one operation poller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollerConfig {
    /// API origin, e.g. `https://cloudfunctions.googleapis.com`.
    pub api_origin: String,
    /// API version path segment.
    pub api_version: String,
    /// Give up after this many seconds.
    #[serde(default = "default_master_timeout_secs")]
    pub master_timeout_secs: u64,
    /// First poll delay in milliseconds.
    #[serde(default = "default_poll_backoff_ms")]
    pub backoff_ms: u64,
    /// Poll delay cap in milliseconds.
    #[serde(default = "default_poll_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// API origins of the secondary collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiConfig {
    /// Cloud Run origin (v2 services and their IAM).
    #[serde(default = "default_run_origin")]
    pub run_origin: String,
    /// Cloud Scheduler origin.
    #[serde(default = "default_scheduler_origin")]
    pub scheduler_origin: String,
    /// Cloud Tasks origin.
    #[serde(default = "default_tasks_origin")]
    pub tasks_origin: String,
    /// Pub/Sub origin.
    #[serde(default = "default_pubsub_origin")]
    pub pubsub_origin: String,
    /// Artifact Registry origin.
    #[serde(default = "default_artifact_registry_origin")]
    pub artifact_registry_origin: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Default master timeout: 25 minutes.
pub const DEFAULT_MASTER_TIMEOUT_SECS: u64 = 25 * 60;

fn default_app_engine_location() -> String {
    String::from("us-central1")
}

const fn default_master_timeout_secs() -> u64 {
    DEFAULT_MASTER_TIMEOUT_SECS
}

const fn default_poll_backoff_ms() -> u64 {
    250
}

const fn default_poll_max_backoff_ms() -> u64 {
    10_000
}

fn default_run_origin() -> String {
    String::from("https://run.googleapis.com")
}

fn default_scheduler_origin() -> String {
    String::from("https://cloudscheduler.googleapis.com")
}

fn default_tasks_origin() -> String {
    String::from("https://cloudtasks.googleapis.com")
}

fn default_pubsub_origin() -> String {
    String::from("https://pubsub.googleapis.com")
}

fn default_artifact_registry_origin() -> String {
    String::from("https://artifactregistry.googleapis.com")
}

const fn default_request_timeout_secs() -> u64 {
    60
}

impl ExecutorConfig {
    /// Profile for calls that consume project-wide quota.
    #[must_use]
    pub const fn heavy() -> Self {
        Self {
            concurrency: 40,
            retries: 30,
            backoff_ms: 20_000,
            max_backoff_ms: 100_000,
        }
    }

    /// Profile for cheap secondary calls.
    #[must_use]
    pub const fn light() -> Self {
        Self {
            concurrency: 200,
            retries: 3,
            backoff_ms: 200,
            max_backoff_ms: 60_000,
        }
    }
}

impl Default for ExecutorsConfig {
    fn default() -> Self {
        Self {
            heavy: ExecutorConfig::heavy(),
            light: ExecutorConfig::light(),
        }
    }
}

impl PollerConfig {
    /// Poller for the v1 functions API.
    #[must_use]
    pub fn v1() -> Self {
        Self {
            api_origin: String::from("https://cloudfunctions.googleapis.com"),
            api_version: String::from("v1"),
            master_timeout_secs: DEFAULT_MASTER_TIMEOUT_SECS,
            backoff_ms: default_poll_backoff_ms(),
            max_backoff_ms: default_poll_max_backoff_ms(),
        }
    }

    /// Poller for the v2 functions API.
    #[must_use]
    pub fn v2() -> Self {
        Self {
            api_version: String::from("v2"),
            ..Self::v1()
        }
    }

    /// Base URL including the version segment.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}/{}", self.api_origin.trim_end_matches('/'), self.api_version)
    }
}

impl Default for PollersConfig {
    fn default() -> Self {
        Self {
            v1: PollerConfig::v1(),
            v2: PollerConfig::v2(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            run_origin: default_run_origin(),
            scheduler_origin: default_scheduler_origin(),
            tasks_origin: default_tasks_origin(),
            pubsub_origin: default_pubsub_origin(),
            artifact_registry_origin: default_artifact_registry_origin(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ReleaseConfig {
    /// Creates a configuration with defaults for a project.
    #[must_use]
    pub fn for_project(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            app_engine_location: default_app_engine_location(),
            sources: SourcesConfig::default(),
            planner: PlannerConfig::default(),
            executors: ExecutorsConfig::default(),
            pollers: PollersConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_profiles() {
        let heavy = ExecutorConfig::heavy();
        let light = ExecutorConfig::light();
        assert!(heavy.concurrency < light.concurrency);
        assert!(heavy.retries > light.retries);
        assert!(heavy.backoff_ms > light.backoff_ms);
    }

    #[test]
    fn test_poller_defaults() {
        let v2 = PollerConfig::v2();
        assert_eq!(v2.master_timeout_secs, 1500);
        assert_eq!(v2.max_backoff_ms, 10_000);
        assert_eq!(v2.base_url(), "https://cloudfunctions.googleapis.com/v2");
    }
}
