//! Plan fabrication.
//!
//! The [`Fabricator`] applies a [`DeploymentPlan`] against the control plane.
//! Regions run as independent tasks. Inside a region, creates and updates
//! run concurrently, and deletes only run once all of them succeeded.
//! Function calls go through the heavy executor and secondary calls
//! (IAM, scheduler, tasks, topics) through the light one.

mod scraper;
mod v1;
mod v2;

use futures::future::join_all;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backend::{managed_labels, Endpoint, Platform, Trigger, HASH_LABEL, PUBLIC_INVOKER};
use crate::cloud::{
    queue_name, resolve_invokers, schedule_job_name, schedule_topic_name, task_queue_from_endpoint,
    v1_schedule_job, v2_schedule_job, ControlPlane, QueueState,
};
use crate::config::{PollersConfig, ReleaseConfig, SourcesConfig};
use crate::error::{ApiError, DeploymentError, OperationKind};
use crate::executor::Executor;
use crate::planner::{DeploymentPlan, RegionalChanges, Update};
use crate::reporter::{DeployResult, DeploySummary};

pub use scraper::SourceTokenScraper;
pub use v1::V1Adapter;
pub use v2::V2Adapter;

/// Container concurrency applied to new v2 functions that set none.
pub const DEFAULT_V2_CONCURRENCY: u32 = 80;

/// Applies deployment plans.
#[derive(Debug)]
pub struct Fabricator {
    plane: ControlPlane,
    heavy: Executor,
    light: Executor,
    sources: SourcesConfig,
    app_engine_location: String,
    pollers: PollersConfig,
}

/// Builds the error mapper for one endpoint and operation.
pub(crate) fn failure(
    endpoint: &Endpoint,
    op: OperationKind,
) -> impl FnOnce(ApiError) -> DeploymentError {
    let key = endpoint.key();
    move |cause| DeploymentError::failed(key, op, cause)
}

/// Invoker a newly created endpoint gets. HTTPS functions default to public.
pub(crate) fn create_invoker(endpoint: &Endpoint) -> Option<Vec<String>> {
    match &endpoint.trigger {
        Trigger::HttpsTrigger(trigger) => Some(
            trigger
                .invoker
                .clone()
                .unwrap_or_else(|| vec![PUBLIC_INVOKER.to_string()]),
        ),
        Trigger::TaskQueueTrigger(trigger) => trigger.invoker.clone(),
        _ => None,
    }
}

/// Members to converge to on update. `private` removes every member.
pub(crate) fn update_members(invoker: &[String]) -> Vec<String> {
    resolve_invokers(invoker).unwrap_or_default()
}

pub(crate) fn same_members(left: &[String], right: &[String]) -> bool {
    left.iter().collect::<BTreeSet<_>>() == right.iter().collect::<BTreeSet<_>>()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

async fn track<F>(op: OperationKind, endpoint: &Endpoint, work: F) -> DeployResult
where
    F: Future<Output = Result<Endpoint, DeploymentError>>,
{
    let started = Instant::now();
    let outcome = work.await;
    let duration_ms = elapsed_ms(started);
    match outcome {
        Ok(deployed) => DeployResult::succeeded(deployed, op, duration_ms),
        Err(error) => {
            error!("{error}");
            DeployResult::failed(endpoint.clone(), op, duration_ms, error)
        }
    }
}

impl Fabricator {
    /// Creates a fabricator with executors sized from the configuration.
    #[must_use]
    pub fn new(plane: ControlPlane, config: &ReleaseConfig) -> Self {
        Self {
            plane,
            heavy: Executor::new("heavy", &config.executors.heavy),
            light: Executor::new("light", &config.executors.light),
            sources: config.sources.clone(),
            app_engine_location: config.app_engine_location.clone(),
            pollers: config.pollers.clone(),
        }
    }

    /// Replaces the executors, e.g. to share them between fabricators.
    #[must_use]
    pub fn with_executors(mut self, heavy: Executor, light: Executor) -> Self {
        self.heavy = heavy;
        self.light = light;
        self
    }

    /// The executor used for function calls.
    #[must_use]
    pub const fn heavy(&self) -> &Executor {
        &self.heavy
    }

    /// The executor used for secondary calls.
    #[must_use]
    pub const fn light(&self) -> &Executor {
        &self.light
    }

    /// Applies a plan, one task per region.
    ///
    /// A region whose task panics is logged and contributes no results.
    pub async fn apply_plan(self: &Arc<Self>, plan: &DeploymentPlan) -> DeploySummary {
        let release_id = uuid::Uuid::new_v4();
        let started_at = chrono::Utc::now();
        let started = Instant::now();
        info!(
            "Starting release {release_id}: {} to create, {} to update, {} to delete",
            plan.total_creates(),
            plan.total_updates(),
            plan.total_deletes()
        );

        let tasks: Vec<_> = plan
            .regions
            .iter()
            .map(|(region, changes)| {
                let fabricator = Arc::clone(self);
                let changes = changes.clone();
                let task =
                    tokio::spawn(async move { fabricator.apply_regional_changes(&changes).await });
                (region.clone(), task)
            })
            .collect();

        let mut results = Vec::new();
        for (region, task) in tasks {
            match task.await {
                Ok(regional) => results.extend(regional),
                Err(e) => error!("Deployment of region {region} did not complete: {e}"),
            }
        }

        let summary = DeploySummary {
            release_id,
            started_at,
            total_time_ms: elapsed_ms(started),
            results,
        };
        debug!(
            "Release {release_id} finished in {}ms (heavy: {:?}, light: {:?})",
            summary.total_time_ms,
            self.heavy.stats(),
            self.light.stats()
        );
        summary
    }

    /// Applies the changes of one region.
    ///
    /// Deletes are aborted if any create or update failed.
    pub async fn apply_regional_changes(&self, changes: &RegionalChanges) -> Vec<DeployResult> {
        let scraper = SourceTokenScraper::new();

        for skipped in &changes.endpoints_to_skip {
            info!("functions[{}] Skipped (No changes detected)", skipped.label());
        }

        let creates = changes.endpoints_to_create.iter().map(|endpoint| {
            track(OperationKind::Create, endpoint, self.create_endpoint(endpoint, &scraper))
        });
        let updates = changes.endpoints_to_update.iter().map(|update| {
            let work = self.update_endpoint(update, &scraper);
            track(OperationKind::Update, &update.endpoint, work)
        });

        let (created, updated) = tokio::join!(join_all(creates), join_all(updates));
        let mut results: Vec<DeployResult> = created.into_iter().chain(updated).collect();

        if results.iter().any(|r| r.error.is_some()) {
            if !changes.endpoints_to_delete.is_empty() {
                warn!(
                    "Aborting {} deletion(s) because other deployments in the region failed",
                    changes.endpoints_to_delete.len()
                );
            }
            results.extend(changes.endpoints_to_delete.iter().cloned().map(DeployResult::aborted));
            return results;
        }

        let deletes = changes.endpoints_to_delete.iter().map(|endpoint| {
            track(OperationKind::Delete, endpoint, async move {
                self.delete_endpoint(endpoint).await.map(|()| endpoint.clone())
            })
        });
        results.extend(join_all(deletes).await);
        results
    }

    /// Creates an endpoint and its trigger. Returns it with `uri` set.
    ///
    /// # Errors
    ///
    /// Returns the first failed call.
    pub async fn create_endpoint(
        &self,
        endpoint: &Endpoint,
        scraper: &SourceTokenScraper,
    ) -> Result<Endpoint, DeploymentError> {
        let mut endpoint = endpoint.clone();
        endpoint.labels.extend(managed_labels());
        if let Some(hash) = &endpoint.hash {
            endpoint.labels.insert(HASH_LABEL.to_string(), hash.clone());
        }

        info!("Creating {} function {}...", endpoint.platform, endpoint.label());
        match endpoint.platform {
            Platform::V1 => V1Adapter::new(self).create(&mut endpoint, scraper).await?,
            Platform::V2 => V2Adapter::new(self).create(&mut endpoint).await?,
        }
        self.set_trigger(&endpoint).await?;
        info!("functions[{}] Successful create operation.", endpoint.label());
        Ok(endpoint)
    }

    /// Updates an endpoint in place, or deletes and recreates it.
    ///
    /// # Errors
    ///
    /// Returns the first failed call.
    pub async fn update_endpoint(
        &self,
        update: &Update,
        scraper: &SourceTokenScraper,
    ) -> Result<Endpoint, DeploymentError> {
        if let Some(previous) = &update.delete_and_recreate {
            info!(
                "Deleting {} function {} to recreate it as {}...",
                previous.platform,
                previous.label(),
                update.endpoint.platform
            );
            self.delete_endpoint(previous).await?;
            return self.create_endpoint(&update.endpoint, scraper).await;
        }

        let mut endpoint = update.endpoint.clone();
        endpoint.labels.extend(managed_labels());
        if let Some(hash) = &endpoint.hash {
            endpoint.labels.insert(HASH_LABEL.to_string(), hash.clone());
        }

        info!("Updating {} function {}...", endpoint.platform, endpoint.label());
        match endpoint.platform {
            Platform::V1 => V1Adapter::new(self).update(&mut endpoint, scraper).await?,
            Platform::V2 => V2Adapter::new(self).update(&mut endpoint).await?,
        }
        self.set_trigger(&endpoint).await?;
        info!("functions[{}] Successful update operation.", endpoint.label());
        Ok(endpoint)
    }

    /// Deletes an endpoint's trigger, then the endpoint.
    ///
    /// # Errors
    ///
    /// Returns the first failed call.
    pub async fn delete_endpoint(&self, endpoint: &Endpoint) -> Result<(), DeploymentError> {
        self.delete_trigger(endpoint).await?;

        info!("Deleting {} function {}...", endpoint.platform, endpoint.label());
        match endpoint.platform {
            Platform::V1 => V1Adapter::new(self).delete(endpoint).await?,
            Platform::V2 => V2Adapter::new(self).delete(endpoint).await?,
        }
        info!("functions[{}] Successful delete operation.", endpoint.label());
        Ok(())
    }

    /// Creates or updates the resources that invoke a scheduled or task
    /// queue endpoint. Other triggers are owned by the function itself.
    ///
    /// # Errors
    ///
    /// Returns the first failed call.
    pub async fn set_trigger(&self, endpoint: &Endpoint) -> Result<(), DeploymentError> {
        match &endpoint.trigger {
            Trigger::ScheduleTrigger(_) => self.upsert_schedule(endpoint).await,
            Trigger::TaskQueueTrigger(_) => self.upsert_task_queue(endpoint).await,
            Trigger::HttpsTrigger(_) | Trigger::EventTrigger(_) => Ok(()),
        }
    }

    /// Removes the resources created by [`Self::set_trigger`]. Task queues
    /// are disabled rather than deleted.
    ///
    /// # Errors
    ///
    /// Returns the first failed call.
    pub async fn delete_trigger(&self, endpoint: &Endpoint) -> Result<(), DeploymentError> {
        match &endpoint.trigger {
            Trigger::ScheduleTrigger(_) => self.delete_schedule(endpoint).await,
            Trigger::TaskQueueTrigger(_) => {
                let queue = queue_name(endpoint);
                let tasks = &self.plane.tasks;
                let queue = queue.as_str();
                self.light
                    .run(|| tasks.update_queue_state(queue, QueueState::Disabled))
                    .await
                    .map_err(failure(endpoint, OperationKind::DisableTaskQueue))
            }
            Trigger::HttpsTrigger(_) | Trigger::EventTrigger(_) => Ok(()),
        }
    }

    async fn upsert_schedule(&self, endpoint: &Endpoint) -> Result<(), DeploymentError> {
        let job = match endpoint.platform {
            Platform::V1 => v1_schedule_job(endpoint, &self.app_engine_location),
            Platform::V2 => v2_schedule_job(endpoint),
        }
        .map_err(failure(endpoint, OperationKind::UpsertSchedule))?;

        let scheduler = &self.plane.scheduler;
        let job = &job;
        self.light
            .run(|| scheduler.upsert_job(job))
            .await
            .map_err(failure(endpoint, OperationKind::UpsertSchedule))
    }

    async fn delete_schedule(&self, endpoint: &Endpoint) -> Result<(), DeploymentError> {
        let location = match endpoint.platform {
            Platform::V1 => self.app_engine_location.as_str(),
            Platform::V2 => endpoint.region.as_str(),
        };
        let job = schedule_job_name(endpoint, location);
        let scheduler = &self.plane.scheduler;
        let job = job.as_str();
        self.light
            .run(|| scheduler.delete_job(job))
            .await
            .map_err(failure(endpoint, OperationKind::DeleteSchedule))?;

        if endpoint.platform == Platform::V1 {
            let topic = schedule_topic_name(endpoint);
            let pubsub = &self.plane.pubsub;
            let topic = topic.as_str();
            self.light
                .run(|| pubsub.delete_topic(topic))
                .await
                .map_err(failure(endpoint, OperationKind::DeleteTopic))?;
        }
        Ok(())
    }

    async fn upsert_task_queue(&self, endpoint: &Endpoint) -> Result<(), DeploymentError> {
        let queue = task_queue_from_endpoint(endpoint);
        let tasks = &self.plane.tasks;
        let queue = &queue;
        self.light
            .run(|| tasks.upsert_queue(queue))
            .await
            .map_err(failure(endpoint, OperationKind::UpsertTaskQueue))?;

        if let Some(invoker) = endpoint.invoker()
            && let Some(members) = resolve_invokers(invoker)
        {
            let name = queue.name.as_str();
            let members = members.as_slice();
            self.light
                .run(|| tasks.set_enqueuer(name, members))
                .await
                .map_err(failure(endpoint, OperationKind::SetInvoker))?;
        }
        Ok(())
    }
}
