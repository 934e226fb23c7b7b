//! Control-plane collaborators.
//!
//! This module defines the traits the fabricator and release driver call
//! into, the wire types they exchange, a REST implementation over `reqwest`,
//! and an HTTP poller for long-running operations.

mod client;
mod convert;
mod poller;
mod types;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use std::sync::Arc;

use crate::backend::Endpoint;
use crate::config::PollerConfig;
use crate::error::ApiError;

pub use client::RestClient;
pub use convert::{
    endpoint_from_v1, endpoint_from_v2, list_backend, parse_function_name, queue_name,
    resolve_invokers, schedule_job_name, schedule_topic_name, task_queue_from_endpoint,
    v1_function_from_endpoint, v1_schedule_job, v2_function_from_endpoint, v2_schedule_job,
    ALL_USERS, SCHEDULE_RESOURCE_PREFIX,
};
pub use poller::HttpOperationPoller;
pub use types::{
    Binding, BuildConfig, EventFilter, FailurePolicy, HttpTarget, IamPolicy, JobRetryConfig,
    OidcToken, Operation, OperationMetadata, OperationStatus, PubsubTarget, QueueRateLimits,
    QueueRetryConfig, QueueState, RevisionSpec, RevisionTemplate, RunService, SchedulerJob,
    ServiceConfig, ServiceSpec, TaskQueue, V1EventTrigger, V1Function, V1HttpsTrigger,
    V2EventTrigger, V2Function, V2Source,
};

/// Callback invoked with every polled operation state.
pub type OnPoll<'a> = &'a (dyn Fn(&Operation) + Send + Sync);

/// A request to wait for a long-running operation.
#[derive(Clone, Copy)]
pub struct PollRequest<'a> {
    /// Poller settings of the platform the operation belongs to.
    pub options: &'a PollerConfig,
    /// Operation resource name.
    pub operation_name: &'a str,
    /// Observer called on every poll tick.
    pub on_poll: Option<OnPoll<'a>>,
}

/// v1 functions API.
#[async_trait]
pub trait FunctionsV1Api: Send + Sync {
    /// Starts a function create.
    async fn create_function(&self, function: &V1Function) -> Result<Operation, ApiError>;

    /// Starts a function update.
    async fn update_function(&self, function: &V1Function) -> Result<Operation, ApiError>;

    /// Starts a function delete.
    async fn delete_function(&self, name: &str) -> Result<Operation, ApiError>;

    /// Lists every v1 function of a project.
    async fn list_functions(&self, project: &str) -> Result<Vec<V1Function>, ApiError>;
}

/// v2 functions API.
#[async_trait]
pub trait FunctionsV2Api: Send + Sync {
    /// Starts a function create.
    async fn create_function(&self, function: &V2Function) -> Result<Operation, ApiError>;

    /// Starts a function update.
    async fn update_function(&self, function: &V2Function) -> Result<Operation, ApiError>;

    /// Starts a function delete.
    async fn delete_function(&self, name: &str) -> Result<Operation, ApiError>;

    /// Lists every v2 function of a project.
    async fn list_functions(&self, project: &str) -> Result<Vec<V2Function>, ApiError>;
}

/// Waits for long-running operations.
#[async_trait]
pub trait OperationPoller: Send + Sync {
    /// Polls until the operation is done and returns its final state.
    ///
    /// Fails if the operation finished with an error or the master timeout elapsed.
    async fn poll(&self, request: PollRequest<'_>) -> Result<Operation, ApiError>;
}

/// Invoker policies of functions and services.
#[async_trait]
pub trait IamApi: Send + Sync {
    /// Members allowed to invoke a v1 function.
    async fn get_function_invokers(&self, function: &str) -> Result<Vec<String>, ApiError>;

    /// Replaces the members allowed to invoke a v1 function.
    async fn set_function_invokers(
        &self,
        function: &str,
        members: &[String],
    ) -> Result<(), ApiError>;

    /// Members allowed to invoke a Cloud Run service.
    async fn get_service_invokers(&self, service: &str) -> Result<Vec<String>, ApiError>;

    /// Replaces the members allowed to invoke a Cloud Run service.
    async fn set_service_invokers(&self, service: &str, members: &[String]) -> Result<(), ApiError>;
}

/// Cloud Scheduler.
#[async_trait]
pub trait SchedulerApi: Send + Sync {
    /// Creates the job or replaces it.
    async fn upsert_job(&self, job: &SchedulerJob) -> Result<(), ApiError>;

    /// Deletes a job. Succeeds if it is already gone.
    async fn delete_job(&self, name: &str) -> Result<(), ApiError>;
}

/// Cloud Tasks.
#[async_trait]
pub trait TasksApi: Send + Sync {
    /// Creates the queue or replaces its settings.
    async fn upsert_queue(&self, queue: &TaskQueue) -> Result<(), ApiError>;

    /// Changes the state of a queue.
    async fn update_queue_state(&self, name: &str, state: QueueState) -> Result<(), ApiError>;

    /// Replaces the members allowed to enqueue tasks.
    async fn set_enqueuer(&self, name: &str, members: &[String]) -> Result<(), ApiError>;
}

/// Pub/Sub.
#[async_trait]
pub trait PubSubApi: Send + Sync {
    /// Creates a topic. Fails with 409 if it exists.
    async fn create_topic(&self, name: &str) -> Result<(), ApiError>;

    /// Deletes a topic. Succeeds if it is already gone.
    async fn delete_topic(&self, name: &str) -> Result<(), ApiError>;
}

/// Cloud Run services backing v2 functions.
#[async_trait]
pub trait RunApi: Send + Sync {
    /// Fetches a service.
    async fn get_service(&self, name: &str) -> Result<RunService, ApiError>;

    /// Replaces a service.
    async fn replace_service(
        &self,
        name: &str,
        service: &RunService,
    ) -> Result<RunService, ApiError>;
}

/// Removes build artifacts left behind by a release.
#[async_trait]
pub trait ArtifactCleaner: Send + Sync {
    /// Cleans artifacts of deployed and deleted endpoints.
    async fn cleanup(&self, deployed: &[Endpoint], deleted: &[Endpoint]) -> Result<(), ApiError>;
}

/// Every collaborator the fabricator calls.
#[derive(Clone)]
pub struct ControlPlane {
    /// v1 functions API.
    pub functions_v1: Arc<dyn FunctionsV1Api>,
    /// v2 functions API.
    pub functions_v2: Arc<dyn FunctionsV2Api>,
    /// Operation poller.
    pub poller: Arc<dyn OperationPoller>,
    /// IAM.
    pub iam: Arc<dyn IamApi>,
    /// Cloud Scheduler.
    pub scheduler: Arc<dyn SchedulerApi>,
    /// Cloud Tasks.
    pub tasks: Arc<dyn TasksApi>,
    /// Pub/Sub.
    pub pubsub: Arc<dyn PubSubApi>,
    /// Cloud Run.
    pub run: Arc<dyn RunApi>,
}

impl ControlPlane {
    /// Builds a control plane served entirely by one REST client.
    #[must_use]
    pub fn from_rest(client: &RestClient) -> Self {
        let shared = Arc::new(client.clone());
        Self {
            functions_v1: shared.clone(),
            functions_v2: shared.clone(),
            poller: Arc::new(HttpOperationPoller::new(client.clone())),
            iam: shared.clone(),
            scheduler: shared.clone(),
            tasks: shared.clone(),
            pubsub: shared.clone(),
            run: shared,
        }
    }
}

impl std::fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlane").finish_non_exhaustive()
    }
}
