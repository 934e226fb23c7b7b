//! Long-running operation poller.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::error::ApiError;

use super::client::RestClient;
use super::types::Operation;
use super::{OperationPoller, PollRequest};

/// Shortest wait between two polls of the same operation.
const MIN_BACKOFF: Duration = Duration::from_millis(10);

/// Polls operations over HTTP with exponential backoff.
#[derive(Debug, Clone)]
pub struct HttpOperationPoller {
    client: RestClient,
}

impl HttpOperationPoller {
    /// Creates a poller using the given client.
    #[must_use]
    pub const fn new(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OperationPoller for HttpOperationPoller {
    async fn poll(&self, request: PollRequest<'_>) -> Result<Operation, ApiError> {
        let options = request.options;
        let url = format!("{}/{}", options.base_url(), request.operation_name);
        let master_timeout = Duration::from_secs(options.master_timeout_secs);
        let max_backoff = Duration::from_millis(options.max_backoff_ms).max(MIN_BACKOFF);
        let mut backoff = Duration::from_millis(options.backoff_ms).clamp(MIN_BACKOFF, max_backoff);
        let started = Instant::now();

        loop {
            let operation: Operation = self.client.get_json(&url).await?;
            trace!("Polled {} (done: {})", operation.name, operation.done);

            if let Some(on_poll) = request.on_poll {
                on_poll(&operation);
            }
            if operation.done {
                debug!(
                    "Operation {} finished after {}ms",
                    request.operation_name,
                    started.elapsed().as_millis()
                );
                return operation.into_result();
            }

            let elapsed = started.elapsed();
            if elapsed >= master_timeout {
                return Err(ApiError::Timeout {
                    operation: request.operation_name.to_string(),
                    waited_secs: elapsed.as_secs(),
                });
            }

            tokio::time::sleep(backoff.min(master_timeout - elapsed)).await;
            backoff = (backoff * 2).min(max_backoff);
        }
    }
}
