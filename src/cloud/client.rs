//! REST client for the control-plane APIs.
//!
//! One client serves every collaborator trait. Calls are made once; retries
//! and throttling belong to the executor that wraps them.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, trace};

use crate::backend::{Endpoint, Platform};
use crate::config::ReleaseConfig;
use crate::error::ApiError;

use super::types::{
    IamPolicy, Operation, QueueState, RunService, SchedulerJob, TaskQueue, V1Function, V2Function,
};
use super::{
    ArtifactCleaner, FunctionsV1Api, FunctionsV2Api, IamApi, PubSubApi, RunApi, SchedulerApi,
    TasksApi,
};

const FUNCTIONS_INVOKER_ROLE: &str = "roles/cloudfunctions.invoker";
const RUN_INVOKER_ROLE: &str = "roles/run.invoker";
const TASKS_ENQUEUER_ROLE: &str = "roles/cloudtasks.enqueuer";
const ARTIFACT_REPOSITORY: &str = "gcf-artifacts";

/// HTTP client for every control-plane API a release touches.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    access_token: String,
    project: String,
    functions_v1_url: String,
    functions_v2_url: String,
    run_url: String,
    scheduler_url: String,
    tasks_url: String,
    pubsub_url: String,
    artifacts_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FunctionPage<T> {
    #[serde(default = "Vec::new")]
    functions: Vec<T>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct SetPolicyRequest<'a> {
    policy: &'a IamPolicy,
}

fn join(base: &str, version: &str) -> String {
    format!("{}/{version}", base.trim_end_matches('/'))
}

/// Splits `parent/{collection}/{id}` into `(parent, id)`.
fn split_resource<'a>(name: &'a str, collection: &str) -> Result<(&'a str, &'a str), ApiError> {
    name.rsplit_once(&format!("/{collection}/")).ok_or_else(|| {
        ApiError::precondition(format!("{name} is not a {collection} resource name"))
    })
}

impl RestClient {
    /// Creates a client authenticated with a bearer token.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(access_token: &str, config: &ReleaseConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.api.request_timeout_secs))
            .build()
            .map_err(|e| ApiError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            access_token: access_token.to_string(),
            project: config.project.clone(),
            functions_v1_url: config.pollers.v1.base_url(),
            functions_v2_url: config.pollers.v2.base_url(),
            run_url: join(&config.api.run_origin, "v1"),
            scheduler_url: join(&config.api.scheduler_origin, "v1"),
            tasks_url: join(&config.api.tasks_origin, "v2"),
            pubsub_url: join(&config.api.pubsub_origin, "v1"),
            artifacts_url: join(&config.api.artifact_registry_origin, "v1"),
        })
    }

    /// Fetches and decodes a resource by absolute URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body cannot be decoded.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let value = self.send(self.client.get(url)).await?;
        decode(value)
    }

    /// Sends one authenticated request and returns the JSON body.
    async fn send(&self, request: RequestBuilder) -> Result<Value, ApiError> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ApiError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        trace!("{} {}", status.as_u16(), response.url());
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            return Err(ApiError::status(status.as_u16(), message));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| ApiError::InvalidResponse {
            message: format!("Failed to parse response: {e}"),
        })
    }

    async fn send_as<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        decode(self.send(request).await?)
    }

    async fn list_pages<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.client.get(url);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: FunctionPage<T> = self.send_as(request).await?;
            items.extend(page.functions);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => return Ok(items),
            }
        }
    }

    async fn get_policy(&self, request: RequestBuilder) -> Result<IamPolicy, ApiError> {
        let value = self.send(request).await?;
        if value.is_null() {
            return Ok(IamPolicy::default());
        }
        decode(value)
    }

    async fn replace_members(
        &self,
        resource_url: &str,
        role: &str,
        members: &[String],
        post_get: bool,
    ) -> Result<(), ApiError> {
        let get_url = format!("{resource_url}:getIamPolicy");
        let get = if post_get {
            self.client.post(&get_url).json(&json!({}))
        } else {
            self.client.get(&get_url)
        };
        let mut policy = self.get_policy(get).await?;
        policy.set_members(role, members);
        debug!("Setting {role} on {resource_url} to {members:?}");
        self.send(
            self.client
                .post(format!("{resource_url}:setIamPolicy"))
                .json(&SetPolicyRequest { policy: &policy }),
        )
        .await?;
        Ok(())
    }

    async fn delete_tolerating_missing(&self, url: &str) -> Result<(), ApiError> {
        match self.send(self.client.delete(url)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("{url} was already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::InvalidResponse {
        message: format!("Unexpected response shape: {e}"),
    })
}

#[async_trait]
impl FunctionsV1Api for RestClient {
    async fn create_function(&self, function: &V1Function) -> Result<Operation, ApiError> {
        let (parent, _) = split_resource(&function.name, "functions")?;
        let url = format!("{}/{parent}/functions", self.functions_v1_url);
        self.send_as(self.client.post(url).json(function)).await
    }

    async fn update_function(&self, function: &V1Function) -> Result<Operation, ApiError> {
        let url = format!("{}/{}", self.functions_v1_url, function.name);
        self.send_as(self.client.patch(url).json(function)).await
    }

    async fn delete_function(&self, name: &str) -> Result<Operation, ApiError> {
        self.send_as(self.client.delete(format!("{}/{name}", self.functions_v1_url))).await
    }

    async fn list_functions(&self, project: &str) -> Result<Vec<V1Function>, ApiError> {
        let url = format!("{}/projects/{project}/locations/-/functions", self.functions_v1_url);
        self.list_pages(&url).await
    }
}

#[async_trait]
impl FunctionsV2Api for RestClient {
    async fn create_function(&self, function: &V2Function) -> Result<Operation, ApiError> {
        let (parent, id) = split_resource(&function.name, "functions")?;
        let url = format!("{}/{parent}/functions", self.functions_v2_url);
        self.send_as(self.client.post(url).query(&[("functionId", id)]).json(function))
            .await
    }

    async fn update_function(&self, function: &V2Function) -> Result<Operation, ApiError> {
        let url = format!("{}/{}", self.functions_v2_url, function.name);
        self.send_as(self.client.patch(url).json(function)).await
    }

    async fn delete_function(&self, name: &str) -> Result<Operation, ApiError> {
        self.send_as(self.client.delete(format!("{}/{name}", self.functions_v2_url))).await
    }

    async fn list_functions(&self, project: &str) -> Result<Vec<V2Function>, ApiError> {
        let url = format!("{}/projects/{project}/locations/-/functions", self.functions_v2_url);
        self.list_pages(&url).await
    }
}

#[async_trait]
impl IamApi for RestClient {
    async fn get_function_invokers(&self, function: &str) -> Result<Vec<String>, ApiError> {
        let url = format!("{}/{function}:getIamPolicy", self.functions_v1_url);
        let policy = self.get_policy(self.client.get(url)).await?;
        Ok(policy.members_of(FUNCTIONS_INVOKER_ROLE))
    }

    async fn set_function_invokers(
        &self,
        function: &str,
        members: &[String],
    ) -> Result<(), ApiError> {
        let url = format!("{}/{function}", self.functions_v1_url);
        self.replace_members(&url, FUNCTIONS_INVOKER_ROLE, members, false).await
    }

    async fn get_service_invokers(&self, service: &str) -> Result<Vec<String>, ApiError> {
        let url = format!("{}/{service}:getIamPolicy", self.run_url);
        let policy = self.get_policy(self.client.get(url)).await?;
        Ok(policy.members_of(RUN_INVOKER_ROLE))
    }

    async fn set_service_invokers(
        &self,
        service: &str,
        members: &[String],
    ) -> Result<(), ApiError> {
        let url = format!("{}/{service}", self.run_url);
        self.replace_members(&url, RUN_INVOKER_ROLE, members, false).await
    }
}

#[async_trait]
impl SchedulerApi for RestClient {
    async fn upsert_job(&self, job: &SchedulerJob) -> Result<(), ApiError> {
        let url = format!("{}/{}", self.scheduler_url, job.name);
        match self.send(self.client.patch(url).json(job)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                let (parent, _) = split_resource(&job.name, "jobs")?;
                debug!("Creating scheduler job {}", job.name);
                let url = format!("{}/{parent}/jobs", self.scheduler_url);
                self.send(self.client.post(url).json(job)).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_job(&self, name: &str) -> Result<(), ApiError> {
        self.delete_tolerating_missing(&format!("{}/{name}", self.scheduler_url)).await
    }
}

#[async_trait]
impl TasksApi for RestClient {
    async fn upsert_queue(&self, queue: &TaskQueue) -> Result<(), ApiError> {
        let url = format!("{}/{}", self.tasks_url, queue.name);
        self.send(self.client.patch(url).json(queue)).await?;
        Ok(())
    }

    async fn update_queue_state(&self, name: &str, state: QueueState) -> Result<(), ApiError> {
        let url = format!("{}/{name}", self.tasks_url);
        let body = json!({ "name": name, "state": state });
        self.send(self.client.patch(url).query(&[("updateMask", "state")]).json(&body))
            .await?;
        Ok(())
    }

    async fn set_enqueuer(&self, name: &str, members: &[String]) -> Result<(), ApiError> {
        let url = format!("{}/{name}", self.tasks_url);
        self.replace_members(&url, TASKS_ENQUEUER_ROLE, members, true).await
    }
}

#[async_trait]
impl PubSubApi for RestClient {
    async fn create_topic(&self, name: &str) -> Result<(), ApiError> {
        let url = format!("{}/{name}", self.pubsub_url);
        self.send(self.client.put(url).json(&json!({}))).await?;
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> Result<(), ApiError> {
        self.delete_tolerating_missing(&format!("{}/{name}", self.pubsub_url)).await
    }
}

#[async_trait]
impl RunApi for RestClient {
    async fn get_service(&self, name: &str) -> Result<RunService, ApiError> {
        self.send_as(self.client.get(format!("{}/{name}", self.run_url))).await
    }

    async fn replace_service(
        &self,
        name: &str,
        service: &RunService,
    ) -> Result<RunService, ApiError> {
        self.send_as(self.client.put(format!("{}/{name}", self.run_url)).json(service))
            .await
    }
}

#[async_trait]
impl ArtifactCleaner for RestClient {
    async fn cleanup(&self, deployed: &[Endpoint], deleted: &[Endpoint]) -> Result<(), ApiError> {
        debug!(
            "Cleaning build artifacts in {} ({} deployed, {} deleted)",
            self.project,
            deployed.len(),
            deleted.len()
        );
        for endpoint in deleted.iter().filter(|e| e.platform == Platform::V2) {
            let url = format!(
                "{}/projects/{}/locations/{}/repositories/{ARTIFACT_REPOSITORY}/packages/{}",
                self.artifacts_url, endpoint.project, endpoint.region, endpoint.id
            );
            self.delete_tolerating_missing(&url).await?;
        }
        Ok(())
    }
}
