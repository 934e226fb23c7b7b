//! In-memory control plane that records every call.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::Endpoint;
use crate::error::ApiError;

use super::types::{
    Operation, OperationMetadata, QueueState, RevisionSpec, RunService, SchedulerJob, TaskQueue,
    V1Function, V2Function,
};
use super::{
    ArtifactCleaner, ControlPlane, FunctionsV1Api, FunctionsV2Api, IamApi, OperationPoller,
    PollRequest, PubSubApi, RunApi, SchedulerApi, TasksApi,
};

/// Spy implementation of every collaborator trait.
#[derive(Debug, Default)]
pub(crate) struct FakeCloud {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, ApiError>>,
    panics: Mutex<HashSet<String>>,
    operations: Mutex<HashMap<String, Option<serde_json::Value>>>,
    next_operation: AtomicUsize,
    source_token: Mutex<Option<String>>,
    v1_tokens: Mutex<Vec<(String, Option<String>)>>,
    invokers: Mutex<HashMap<String, Vec<String>>>,
    concurrency: Mutex<HashMap<String, u32>>,
    jobs: Mutex<Vec<SchedulerJob>>,
    queues: Mutex<Vec<TaskQueue>>,
    v1_functions: Mutex<Vec<V1Function>>,
    v2_functions: Mutex<Vec<V2Function>>,
}

impl FakeCloud {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call made with this exact description fails with `error`.
    pub(crate) fn fail_on(&self, call: impl Into<String>, error: ApiError) {
        self.failures.lock().expect("lock").insert(call.into(), error);
    }

    /// Every call made with this exact description panics.
    pub(crate) fn panic_on(&self, call: impl Into<String>) {
        self.panics.lock().expect("lock").insert(call.into());
    }

    /// Source token reported by polls of v1 operations.
    pub(crate) fn with_source_token(&self, token: &str) {
        *self.source_token.lock().expect("lock") = Some(token.to_string());
    }

    pub(crate) fn set_invokers(&self, resource: &str, members: &[&str]) {
        self.invokers
            .lock()
            .expect("lock")
            .insert(resource.to_string(), members.iter().map(ToString::to_string).collect());
    }

    pub(crate) fn set_concurrency(&self, service: &str, concurrency: u32) {
        self.concurrency.lock().expect("lock").insert(service.to_string(), concurrency);
    }

    pub(crate) fn add_v1_function(&self, function: V1Function) {
        self.v1_functions.lock().expect("lock").push(function);
    }

    pub(crate) fn add_v2_function(&self, function: V2Function) {
        self.v2_functions.lock().expect("lock").push(function);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }

    pub(crate) fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls().into_iter().filter(|c| c.starts_with(prefix)).collect()
    }

    pub(crate) fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub(crate) fn v1_tokens(&self) -> Vec<(String, Option<String>)> {
        self.v1_tokens.lock().expect("lock").clone()
    }

    pub(crate) fn jobs(&self) -> Vec<SchedulerJob> {
        self.jobs.lock().expect("lock").clone()
    }

    pub(crate) fn queues(&self) -> Vec<TaskQueue> {
        self.queues.lock().expect("lock").clone()
    }

    pub(crate) fn invokers_of(&self, resource: &str) -> Option<Vec<String>> {
        self.invokers.lock().expect("lock").get(resource).cloned()
    }

    pub(crate) fn plane(self: &Arc<Self>) -> ControlPlane {
        ControlPlane {
            functions_v1: self.clone(),
            functions_v2: self.clone(),
            poller: self.clone(),
            iam: self.clone(),
            scheduler: self.clone(),
            tasks: self.clone(),
            pubsub: self.clone(),
            run: self.clone(),
        }
    }

    fn record(&self, call: String) -> Result<(), ApiError> {
        let failure = self.failures.lock().expect("lock").get(&call).cloned();
        let panics = self.panics.lock().expect("lock").contains(&call);
        self.calls.lock().expect("lock").push(call.clone());
        assert!(!panics, "injected panic on {call}");
        failure.map_or(Ok(()), Err)
    }

    fn start_operation(&self, response: Option<serde_json::Value>) -> Operation {
        let id = self.next_operation.fetch_add(1, Ordering::SeqCst);
        let name = format!("operations/{id}");
        self.operations.lock().expect("lock").insert(name.clone(), response);
        Operation {
            name,
            ..Operation::default()
        }
    }

    fn v1_response(function: &V1Function) -> serde_json::Value {
        let mut deployed = function.clone();
        if let Some(trigger) = deployed.https_trigger.as_mut() {
            let id = function.name.rsplit('/').next().unwrap_or_default();
            trigger.url = Some(format!("https://fake.cloudfunctions.net/{id}"));
        }
        serde_json::to_value(deployed).expect("serialize")
    }

    fn v2_response(function: &V2Function) -> serde_json::Value {
        let id = function.name.rsplit('/').next().unwrap_or_default();
        let service = function.name.replace("/functions/", "/services/");
        let mut deployed = function.clone();
        deployed.service_config.uri = Some(format!("https://{id}-fake.a.run.app"));
        deployed.service_config.service = Some(service);
        serde_json::to_value(deployed).expect("serialize")
    }
}

#[async_trait]
impl FunctionsV1Api for FakeCloud {
    async fn create_function(&self, function: &V1Function) -> Result<Operation, ApiError> {
        self.record(format!("v1.create {}", function.name))?;
        self.v1_tokens
            .lock()
            .expect("lock")
            .push((function.name.clone(), function.source_token.clone()));
        Ok(self.start_operation(Some(Self::v1_response(function))))
    }

    async fn update_function(&self, function: &V1Function) -> Result<Operation, ApiError> {
        self.record(format!("v1.update {}", function.name))?;
        self.v1_tokens
            .lock()
            .expect("lock")
            .push((function.name.clone(), function.source_token.clone()));
        Ok(self.start_operation(Some(Self::v1_response(function))))
    }

    async fn delete_function(&self, name: &str) -> Result<Operation, ApiError> {
        self.record(format!("v1.delete {name}"))?;
        Ok(self.start_operation(None))
    }

    async fn list_functions(&self, project: &str) -> Result<Vec<V1Function>, ApiError> {
        self.record(format!("v1.list {project}"))?;
        Ok(self.v1_functions.lock().expect("lock").clone())
    }
}

#[async_trait]
impl FunctionsV2Api for FakeCloud {
    async fn create_function(&self, function: &V2Function) -> Result<Operation, ApiError> {
        self.record(format!("v2.create {}", function.name))?;
        Ok(self.start_operation(Some(Self::v2_response(function))))
    }

    async fn update_function(&self, function: &V2Function) -> Result<Operation, ApiError> {
        self.record(format!("v2.update {}", function.name))?;
        Ok(self.start_operation(Some(Self::v2_response(function))))
    }

    async fn delete_function(&self, name: &str) -> Result<Operation, ApiError> {
        self.record(format!("v2.delete {name}"))?;
        Ok(self.start_operation(None))
    }

    async fn list_functions(&self, project: &str) -> Result<Vec<V2Function>, ApiError> {
        self.record(format!("v2.list {project}"))?;
        Ok(self.v2_functions.lock().expect("lock").clone())
    }
}

#[async_trait]
impl OperationPoller for FakeCloud {
    async fn poll(&self, request: PollRequest<'_>) -> Result<Operation, ApiError> {
        let response = self
            .operations
            .lock()
            .expect("lock")
            .get(request.operation_name)
            .cloned()
            .ok_or_else(|| {
                ApiError::status(404, format!("unknown operation {}", request.operation_name))
            })?;
        let source_token = self.source_token.lock().expect("lock").clone();
        let operation = Operation {
            name: request.operation_name.to_string(),
            done: true,
            metadata: Some(OperationMetadata {
                source_token,
                target: None,
            }),
            error: None,
            response,
        };
        if let Some(on_poll) = request.on_poll {
            on_poll(&operation);
        }
        Ok(operation)
    }
}

#[async_trait]
impl IamApi for FakeCloud {
    async fn get_function_invokers(&self, function: &str) -> Result<Vec<String>, ApiError> {
        self.record(format!("iam.get_function {function}"))?;
        Ok(self.invokers_of(function).unwrap_or_default())
    }

    async fn set_function_invokers(
        &self,
        function: &str,
        members: &[String],
    ) -> Result<(), ApiError> {
        self.record(format!("iam.set_function {function}"))?;
        self.invokers.lock().expect("lock").insert(function.to_string(), members.to_vec());
        Ok(())
    }

    async fn get_service_invokers(&self, service: &str) -> Result<Vec<String>, ApiError> {
        self.record(format!("iam.get_service {service}"))?;
        Ok(self.invokers_of(service).unwrap_or_default())
    }

    async fn set_service_invokers(
        &self,
        service: &str,
        members: &[String],
    ) -> Result<(), ApiError> {
        self.record(format!("iam.set_service {service}"))?;
        self.invokers.lock().expect("lock").insert(service.to_string(), members.to_vec());
        Ok(())
    }
}

#[async_trait]
impl SchedulerApi for FakeCloud {
    async fn upsert_job(&self, job: &SchedulerJob) -> Result<(), ApiError> {
        self.record(format!("scheduler.upsert {}", job.name))?;
        self.jobs.lock().expect("lock").push(job.clone());
        Ok(())
    }

    async fn delete_job(&self, name: &str) -> Result<(), ApiError> {
        self.record(format!("scheduler.delete {name}"))
    }
}

#[async_trait]
impl TasksApi for FakeCloud {
    async fn upsert_queue(&self, queue: &TaskQueue) -> Result<(), ApiError> {
        self.record(format!("tasks.upsert {}", queue.name))?;
        self.queues.lock().expect("lock").push(queue.clone());
        Ok(())
    }

    async fn update_queue_state(&self, name: &str, state: QueueState) -> Result<(), ApiError> {
        self.record(format!("tasks.state {name} {}", json!(state).as_str().unwrap_or_default()))
    }

    async fn set_enqueuer(&self, name: &str, members: &[String]) -> Result<(), ApiError> {
        self.record(format!("tasks.enqueuer {name}"))?;
        self.invokers.lock().expect("lock").insert(name.to_string(), members.to_vec());
        Ok(())
    }
}

#[async_trait]
impl PubSubApi for FakeCloud {
    async fn create_topic(&self, name: &str) -> Result<(), ApiError> {
        self.record(format!("pubsub.create {name}"))
    }

    async fn delete_topic(&self, name: &str) -> Result<(), ApiError> {
        self.record(format!("pubsub.delete {name}"))
    }
}

#[async_trait]
impl RunApi for FakeCloud {
    async fn get_service(&self, name: &str) -> Result<RunService, ApiError> {
        self.record(format!("run.get {name}"))?;
        let concurrency = self.concurrency.lock().expect("lock").get(name).copied().unwrap_or(1);
        let mut service = RunService::default();
        service.spec.template.spec = RevisionSpec {
            container_concurrency: Some(concurrency),
            other: serde_json::Map::new(),
        };
        Ok(service)
    }

    async fn replace_service(
        &self,
        name: &str,
        service: &RunService,
    ) -> Result<RunService, ApiError> {
        self.record(format!("run.replace {name}"))?;
        if let Some(concurrency) = service.spec.template.spec.container_concurrency {
            self.set_concurrency(name, concurrency);
        }
        Ok(service.clone())
    }
}

#[async_trait]
impl ArtifactCleaner for FakeCloud {
    async fn cleanup(&self, deployed: &[Endpoint], deleted: &[Endpoint]) -> Result<(), ApiError> {
        self.record(format!("artifacts.cleanup {} {}", deployed.len(), deleted.len()))
    }
}
