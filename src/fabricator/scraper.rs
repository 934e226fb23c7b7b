//! Build token sharing between v1 deploys of one region.
//!
//! The first v1 deploy in a region builds its sources from scratch and the
//! control plane reports a source token while that build runs. Later deploys
//! in the region wait for the token and reuse the build.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::debug;

use crate::cloud::Operation;

/// Hands the source token of the first v1 deploy to every later one.
#[derive(Debug)]
pub struct SourceTokenScraper {
    /// `None` until resolved; `Some(None)` when no token will come.
    token: watch::Sender<Option<Option<String>>>,
    claimed: AtomicBool,
}

impl Default for SourceTokenScraper {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceTokenScraper {
    /// Creates an unresolved scraper.
    #[must_use]
    pub fn new() -> Self {
        let (token, _) = watch::channel(None);
        Self {
            token,
            claimed: AtomicBool::new(false),
        }
    }

    /// Returns the token to deploy with.
    ///
    /// The first caller gets `None` and is expected to feed its operation
    /// polls into [`Self::on_poll`]. Every later caller waits for that.
    pub async fn token(&self) -> Option<String> {
        if !self.claimed.swap(true, Ordering::SeqCst) {
            debug!("First v1 deploy of the region builds without a source token");
            return None;
        }

        let mut receiver = self.token.subscribe();
        match receiver.wait_for(Option::is_some).await {
            Ok(resolved) => (*resolved).clone().flatten(),
            Err(_) => None,
        }
    }

    /// Observes a poll of the first deploy's operation.
    ///
    /// Resolves once the operation carries a token or is done. The first
    /// resolution wins.
    pub fn on_poll(&self, operation: &Operation) {
        let token = operation.source_token().map(str::to_string);
        if token.is_none() && !operation.done {
            return;
        }
        self.resolve(token);
    }

    /// Releases waiters with no token. Used when the first deploy fails.
    pub fn abandon(&self) {
        self.resolve(None);
    }

    fn resolve(&self, token: Option<String>) {
        self.token.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            debug!("Source token resolved (present: {})", token.is_some());
            *current = Some(token);
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::OperationMetadata;
    use std::sync::Arc;
    use std::time::Duration;

    fn operation(done: bool, token: Option<&str>) -> Operation {
        Operation {
            name: String::from("operations/1"),
            done,
            metadata: Some(OperationMetadata {
                source_token: token.map(str::to_string),
                target: None,
            }),
            ..Operation::default()
        }
    }

    #[tokio::test]
    async fn test_first_caller_gets_none_and_others_wait() {
        let scraper = Arc::new(SourceTokenScraper::new());
        assert_eq!(scraper.token().await, None);

        let waiter = {
            let scraper = Arc::clone(&scraper);
            tokio::spawn(async move { scraper.token().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        scraper.on_poll(&operation(false, None));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        scraper.on_poll(&operation(false, Some("tok")));
        assert_eq!(waiter.await.expect("join"), Some(String::from("tok")));
    }

    #[tokio::test]
    async fn test_first_resolution_wins() {
        let scraper = SourceTokenScraper::new();
        scraper.token().await;
        scraper.on_poll(&operation(false, Some("first")));
        scraper.on_poll(&operation(true, Some("second")));
        assert_eq!(scraper.token().await, Some(String::from("first")));
    }

    #[tokio::test]
    async fn test_done_without_token_resolves_none() {
        let scraper = SourceTokenScraper::new();
        scraper.token().await;
        scraper.on_poll(&operation(true, None));
        assert_eq!(scraper.token().await, None);
    }

    #[tokio::test]
    async fn test_abandon_releases_waiters() {
        let scraper = SourceTokenScraper::new();
        scraper.token().await;
        scraper.abandon();
        let waited = tokio::time::timeout(Duration::from_secs(1), scraper.token()).await;
        assert_eq!(waited.expect("waiter released"), None);
    }
}
