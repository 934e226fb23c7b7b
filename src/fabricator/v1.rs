//! First generation functions.

use tracing::debug;

use crate::backend::{function_name, Endpoint};
use crate::cloud::{
    resolve_invokers, v1_function_from_endpoint, OnPoll, Operation, PollRequest, V1Function,
};
use crate::error::{ApiError, DeploymentError, OperationKind};

use super::{create_invoker, failure, same_members, update_members, Fabricator, SourceTokenScraper};

/// Deploys endpoints on the v1 platform.
#[derive(Debug, Clone, Copy)]
pub struct V1Adapter<'a> {
    fabricator: &'a Fabricator,
}

impl<'a> V1Adapter<'a> {
    /// Creates an adapter over a fabricator's collaborators.
    #[must_use]
    pub const fn new(fabricator: &'a Fabricator) -> Self {
        Self { fabricator }
    }

    /// Creates the function, records its uri and sets its invoker.
    ///
    /// # Errors
    ///
    /// Returns the first failed call.
    pub async fn create(
        &self,
        endpoint: &mut Endpoint,
        scraper: &SourceTokenScraper,
    ) -> Result<(), DeploymentError> {
        let op = self
            .deploy(endpoint, scraper, OperationKind::Create)
            .await
            .map_err(failure(endpoint, OperationKind::Create))?;
        endpoint.uri = deployed_uri(&op);

        if let Some(invoker) = create_invoker(endpoint)
            && let Some(members) = resolve_invokers(&invoker)
        {
            self.set_invokers(endpoint, &members).await?;
        }
        Ok(())
    }

    /// Updates the function and converges its invoker when one is declared.
    ///
    /// # Errors
    ///
    /// Returns the first failed call.
    pub async fn update(
        &self,
        endpoint: &mut Endpoint,
        scraper: &SourceTokenScraper,
    ) -> Result<(), DeploymentError> {
        let op = self
            .deploy(endpoint, scraper, OperationKind::Update)
            .await
            .map_err(failure(endpoint, OperationKind::Update))?;
        endpoint.uri = deployed_uri(&op);

        if let Some(invoker) = endpoint.invoker() {
            let members = update_members(invoker);
            let iam = &self.fabricator.plane.iam;
            let name = function_name(endpoint);
            let name = name.as_str();
            let current = self
                .fabricator
                .light
                .run(|| iam.get_function_invokers(name))
                .await
                .map_err(failure(endpoint, OperationKind::SetInvoker))?;
            if same_members(&current, &members) {
                debug!("Invoker of {} is unchanged", endpoint.label());
            } else {
                self.set_invokers(endpoint, &members).await?;
            }
        }
        Ok(())
    }

    /// Deletes the function and waits for the operation.
    ///
    /// # Errors
    ///
    /// Returns the failed delete.
    pub async fn delete(&self, endpoint: &Endpoint) -> Result<(), DeploymentError> {
        let api = &self.fabricator.plane.functions_v1;
        let poller = &self.fabricator.plane.poller;
        let options = &self.fabricator.pollers.v1;
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

    /// Creates or updates the function with the region's source token.
    async fn deploy(
        &self,
        endpoint: &Endpoint,
        scraper: &SourceTokenScraper,
        kind: OperationKind,
    ) -> Result<Operation, ApiError> {
        let token = scraper.token().await;
        let Some(upload_url) = self.fabricator.sources.v1_source_url.as_deref() else {
            scraper.abandon();
            return Err(ApiError::precondition(format!(
                "no source upload URL for v1 function {}",
                endpoint.label()
            )));
        };

        let function = v1_function_from_endpoint(endpoint, upload_url, token);
        let function = &function;
        let api = &self.fabricator.plane.functions_v1;
        let poller = &self.fabricator.plane.poller;
        let options = &self.fabricator.pollers.v1;
        let observe = |op: &Operation| scraper.on_poll(op);
        let on_poll: OnPoll<'_> = &observe;

        let outcome = self
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
                        on_poll: Some(on_poll),
                    })
                    .await
            })
            .await;

        if outcome.is_err() {
            scraper.abandon();
        }
        outcome
    }

    async fn set_invokers(
        &self,
        endpoint: &Endpoint,
        members: &[String],
    ) -> Result<(), DeploymentError> {
        let iam = &self.fabricator.plane.iam;
        let name = function_name(endpoint);
        let name = name.as_str();
        self.fabricator
            .light
            .run(|| iam.set_function_invokers(name, members))
            .await
            .map_err(failure(endpoint, OperationKind::SetInvoker))
    }
}

fn deployed_uri(op: &Operation) -> Option<String> {
    op.response_as::<V1Function>()
        .ok()
        .and_then(|function| function.https_trigger)
        .and_then(|trigger| trigger.url)
}
