//! Second generation functions.
//!
//! A v2 function is served by a Cloud Run service. Invokers and container
//! concurrency are set on that service once the function operation is done.

use tracing::debug;

use crate::backend::{function_name, Endpoint, PUBSUB_PUBLISH_EVENT, TOPIC_FILTER};
use crate::cloud::{resolve_invokers, v2_function_from_endpoint, Operation, PollRequest, V2Function};
use crate::error::{ApiError, DeploymentError, OperationKind};

use super::{
    create_invoker, failure, same_members, update_members, Fabricator, DEFAULT_V2_CONCURRENCY,
};

/// Deploys endpoints on the v2 platform.
#[derive(Debug, Clone, Copy)]
pub struct V2Adapter<'a> {
    fabricator: &'a Fabricator,
}

/// What a finished v2 operation tells about the deployed function.
#[derive(Debug, Default)]
struct Deployed {
    uri: Option<String>,
    service: Option<String>,
}

impl<'a> V2Adapter<'a> {
    /// Creates an adapter over a fabricator's collaborators.
    #[must_use]
    pub const fn new(fabricator: &'a Fabricator) -> Self {
        Self { fabricator }
    }

    /// Creates the function, then sets its invoker and concurrency.
    ///
    /// A Pub/Sub triggered function gets its topic created first.
    ///
    /// # Errors
    ///
    /// Returns the first failed call.
    pub async fn create(&self, endpoint: &mut Endpoint) -> Result<(), DeploymentError> {
        if let Some(topic) = pubsub_topic(endpoint) {
            self.create_topic(endpoint, topic).await?;
        }

        let function = self.function(endpoint).map_err(failure(endpoint, OperationKind::Create))?;
        let deployed = self
            .deploy(&function, OperationKind::Create)
            .await
            .map_err(failure(endpoint, OperationKind::Create))?;
        endpoint.uri.clone_from(&deployed.uri);

        if let Some(invoker) = create_invoker(endpoint)
            && let Some(members) = resolve_invokers(&invoker)
        {
            let service = require_service(&deployed, endpoint)
                .map_err(failure(endpoint, OperationKind::SetInvoker))?;
            self.set_invokers(endpoint, service, &members).await?;
        }

        let service = require_service(&deployed, endpoint)
            .map_err(failure(endpoint, OperationKind::SetConcurrency))?;
        let concurrency = endpoint.concurrency.unwrap_or(DEFAULT_V2_CONCURRENCY);
        self.set_concurrency(endpoint, service, concurrency).await
    }

    /// Updates the function. Invoker and concurrency are only touched when declared.
    ///
    /// # Errors
    ///
    /// Returns the first failed call.
    pub async fn update(&self, endpoint: &mut Endpoint) -> Result<(), DeploymentError> {
        let mut function = self
            .function(endpoint)
            .map_err(failure(endpoint, OperationKind::Update))?;
        // The topic of an existing trigger cannot change.
        if let Some(trigger) = function.event_trigger.as_mut() {
            trigger.pubsub_topic = None;
        }

        let deployed = self
            .deploy(&function, OperationKind::Update)
            .await
            .map_err(failure(endpoint, OperationKind::Update))?;
        endpoint.uri.clone_from(&deployed.uri);

        if let Some(invoker) = endpoint.invoker() {
            let service = require_service(&deployed, endpoint)
                .map_err(failure(endpoint, OperationKind::SetInvoker))?;
            let members = update_members(invoker);
            let iam = &self.fabricator.plane.iam;
            let current = self
                .fabricator
                .light
                .run(|| iam.get_service_invokers(service))
                .await
                .map_err(failure(endpoint, OperationKind::SetInvoker))?;
            if same_members(&current, &members) {
                debug!("Invoker of {} is unchanged", endpoint.label());
            } else {
                self.set_invokers(endpoint, service, &members).await?;
            }
        }

        if let Some(concurrency) = endpoint.concurrency {
            let service = require_service(&deployed, endpoint)
                .map_err(failure(endpoint, OperationKind::SetConcurrency))?;
            self.set_concurrency(endpoint, service, concurrency).await?;
        }
        Ok(())
    }

    /// Deletes the function and waits for the operation.
    ///
    /// # Errors
    ///
    /// Returns the failed delete.
    pub async fn delete(&self, endpoint: &Endpoint) -> Result<(), DeploymentError> {
        let api = &self.fabricator.plane.functions_v2;
        let poller = &self.fabricator.plane.poller;
        let options = &self.fabricator.pollers.v2;
        let name = function_name(endpoint);
        let name = name.as_str();

        self.fabricator
            .heavy
            .run(|| async move {
                let op = api.delete_function(name).await?;
                poller
                    .poll(PollRequest {
                        options,
                        operation_name: &op.name,
                        on_poll: None,
                    })
                    .await
            })
            .await
            .map(|_| ())
            .map_err(failure(endpoint, OperationKind::Delete))
    }

    /// Sets the container concurrency of the backing service, unless it
    /// already has that value.
    ///
    /// # Errors
    ///
    /// Returns the failed read or replace.
    pub async fn set_concurrency(
        &self,
        endpoint: &Endpoint,
        service: &str,
        concurrency: u32,
    ) -> Result<(), DeploymentError> {
        let run = &self.fabricator.plane.run;
        self.fabricator
            .heavy
            .run(|| async move {
                let mut live = run.get_service(service).await?;
                if live.spec.template.spec.container_concurrency == Some(concurrency) {
                    debug!("Service {service} already has concurrency {concurrency}");
                    return Ok(());
                }
                live.spec.template.spec.container_concurrency = Some(concurrency);
                run.replace_service(service, &live).await.map(|_| ())
            })
            .await
            .map_err(failure(endpoint, OperationKind::SetConcurrency))
    }

    fn function(&self, endpoint: &Endpoint) -> Result<V2Function, ApiError> {
        let storage = self.fabricator.sources.v2_storage.as_ref().ok_or_else(|| {
            let label = endpoint.label();
            ApiError::precondition(format!("no storage source for v2 function {label}"))
        })?;
        Ok(v2_function_from_endpoint(endpoint, storage))
    }

    async fn create_topic(&self, endpoint: &Endpoint, topic: &str) -> Result<(), DeploymentError> {
        let pubsub = &self.fabricator.plane.pubsub;
        // Conflicts mean the topic exists and must not be retried.
        let created = self
            .fabricator
            .light
            .run_with_codes(&[429], || pubsub.create_topic(topic))
            .await;
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.is_conflict() => {
                debug!("Topic {topic} already exists");
                Ok(())
            }
            Err(e) => Err(failure(endpoint, OperationKind::CreateTopic)(e)),
        }
    }

    async fn deploy(
        &self,
        function: &V2Function,
        kind: OperationKind,
    ) -> Result<Deployed, ApiError> {
        let api = &self.fabricator.plane.functions_v2;
        let poller = &self.fabricator.plane.poller;
        let options = &self.fabricator.pollers.v2;

        let op = self
            .fabricator
            .heavy
            .run(|| async move {
                let op = match kind {
                    OperationKind::Update => api.update_function(function).await?,
                    _ => api.create_function(function).await?,
                };
                poller
                    .poll(PollRequest {
                        options,
                        operation_name: &op.name,
                        on_poll: None,
                    })
                    .await
            })
            .await?;
        Ok(deployed(&op))
    }

    async fn set_invokers(
        &self,
        endpoint: &Endpoint,
        service: &str,
        members: &[String],
    ) -> Result<(), DeploymentError> {
        let iam = &self.fabricator.plane.iam;
        self.fabricator
            .light
            .run(|| iam.set_service_invokers(service, members))
            .await
            .map_err(failure(endpoint, OperationKind::SetInvoker))
    }
}

fn pubsub_topic(endpoint: &Endpoint) -> Option<&str> {
    endpoint
        .event_trigger()
        .filter(|trigger| trigger.event_type == PUBSUB_PUBLISH_EVENT)
        .and_then(|trigger| trigger.event_filters.get(TOPIC_FILTER))
        .map(String::as_str)
}

fn deployed(op: &Operation) -> Deployed {
    op.response_as::<V2Function>()
        .map(|function| Deployed {
            uri: function.service_config.uri,
            service: function.service_config.service,
        })
        .unwrap_or_default()
}

fn require_service<'d>(deployed: &'d Deployed, endpoint: &Endpoint) -> Result<&'d str, ApiError> {
    deployed.service.as_deref().ok_or_else(|| {
        ApiError::precondition(format!("no Cloud Run service reported for {}", endpoint.label()))
    })
}
