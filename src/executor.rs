//! Bounded-concurrency executor with retry and exponential backoff.
//!
//! An [`Executor`] caps how many control-plane calls run at once across every
//! caller that shares it, and retries calls that fail with a transient status
//! (quota exceeded or conflict). Cloning an executor shares its limit.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, trace};

use crate::config::ExecutorConfig;
use crate::error::ApiError;

/// Status codes retried by default: 429 (quota exceeded) and 409 (conflict).
pub const DEFAULT_RETRY_CODES: &[u16] = &[429, 409];

/// Retry schedule of an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub retries: u32,
    /// Delay before the first retry.
    pub backoff: Duration,
    /// Upper bound of any delay.
    pub max_backoff: Duration,
}

/// Shared counters of an executor.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    attempts: AtomicU64,
    retries: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Point-in-time copy of [`ExecutorStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Calls of the wrapped function, retries included.
    pub attempts: u64,
    /// Retries performed.
    pub retries: u64,
    /// Highest number of calls observed running at once.
    pub peak_in_flight: usize,
}

/// Bounded-concurrency executor.
#[derive(Debug, Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    name: String,
    permits: Semaphore,
    concurrency: usize,
    policy: RetryPolicy,
    retry_codes: Vec<u16>,
    stats: ExecutorStats,
}

/// Tracks one running call in the in-flight counters.
struct InFlight<'a>(&'a ExecutorStats);

impl<'a> InFlight<'a> {
    fn enter(stats: &'a ExecutorStats) -> Self {
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        stats.attempts.fetch_add(1, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RetryPolicy {
    /// Returns the delay before the given retry (1-based).
    ///
    /// Delays double from `backoff` and never exceed `max_backoff`.
    #[must_use]
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63);
        let factor = 1u64 << exponent;
        let base = u64::try_from(self.backoff.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max_backoff.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base.saturating_mul(factor).min(max))
    }
}

impl From<&ExecutorConfig> for RetryPolicy {
    fn from(config: &ExecutorConfig) -> Self {
        Self {
            retries: config.retries,
            backoff: Duration::from_millis(config.backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl ExecutorStats {
    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            attempts: self.attempts.load(Ordering::SeqCst),
            retries: self.retries.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}

impl Executor {
    /// Creates an executor from its configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, config: &ExecutorConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                permits: Semaphore::new(concurrency),
                concurrency,
                policy: RetryPolicy::from(config),
                retry_codes: DEFAULT_RETRY_CODES.to_vec(),
                stats: ExecutorStats::default(),
            }),
        }
    }

    /// Returns the executor name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.inner.policy
    }

    /// Returns the shared counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Runs `f` under the concurrency limit, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt when it is not retryable or the
    /// retry budget is exhausted.
    pub async fn run<T, F, Fut>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let codes = self.inner.retry_codes.clone();
        self.run_with_codes(&codes, f).await
    }

    /// Like [`Executor::run`] with a custom set of retryable status codes.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt when it is not retryable or the
    /// retry budget is exhausted.
    pub async fn run_with_codes<T, F, Fut>(
        &self,
        retry_codes: &[u16],
        mut f: F,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let inner = &self.inner;
        let mut retry = 0;

        loop {
            let outcome = {
                let _permit = inner
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| {
                        ApiError::precondition(format!("executor {} is closed", inner.name))
                    })?;
                let _running = InFlight::enter(&inner.stats);
                f().await
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if retry < inner.policy.retries && is_retryable(&err, retry_codes) => {
                    retry += 1;
                    inner.stats.retries.fetch_add(1, Ordering::SeqCst);
                    let delay = inner.policy.backoff_for(retry);
                    debug!(
                        "{} executor: retry {}/{} in {}ms after {}",
                        inner.name,
                        retry,
                        inner.policy.retries,
                        delay.as_millis(),
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    trace!("{} executor: giving up after {retry} retries", inner.name);
                    return Err(err);
                }
            }
        }
    }
}

fn is_retryable(err: &ApiError, retry_codes: &[u16]) -> bool {
    err.status_code().is_some_and(|code| retry_codes.contains(&code))
}
