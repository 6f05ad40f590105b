use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

use crate::rate_limit::MultiServiceRateLimiter;
use crate::retry::RetryPolicy;
use crate::types::{Item, RelayConfig, Result, SourceBinding, SourceKind};

pub mod graphql;
pub mod rss;
pub mod scrape;

pub use graphql::GraphqlSource;
pub use rss::RssSource;
pub use scrape::ScrapeSource;

/// One upstream content provider. Implementations differ only in how the
/// upstream payload becomes normalized [`Item`]s; transport and parse
/// failures are raised so the wrapper can retry them.
#[async_trait]
pub trait SourceFetch: Send + Sync {
    /// Stable key identifying this source in dedup records and logs.
    fn source_key(&self) -> &str;

    fn kind(&self) -> SourceKind;

    async fn fetch(&self) -> Result<Vec<Item>>;
}

/// Uniform wrapper around every fetcher: rate-limit admission first, then
/// the fetch under the retry policy. A source that stays dead after the
/// retry budget yields an empty list so one broken upstream degrades only
/// its own deliveries, never the sweep.
pub struct SourceFetcher {
    limiter: Arc<MultiServiceRateLimiter>,
    retry: RetryPolicy,
}

impl SourceFetcher {
    pub fn new(limiter: Arc<MultiServiceRateLimiter>, retry: RetryPolicy) -> Self {
        Self { limiter, retry }
    }

    pub async fn fetch_with_retry(&self, source: &dyn SourceFetch) -> Vec<Item> {
        self.limiter.acquire(source.kind().service()).await;

        match self.retry.run(source.source_key(), || source.fetch()).await {
            Ok(items) => {
                info!("fetched {} items from {}", items.len(), source.source_key());
                items
            }
            Err(e) => {
                error!("failed to fetch from {}: {}", source.source_key(), e);
                Vec::new()
            }
        }
    }
}

/// Shared HTTP client for fetchers and health probes.
pub fn http_client(config: &RelayConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
        .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
        .gzip(true)
        .deflate(true)
        .brotli(true)
        .build()?;
    Ok(client)
}

/// Builds the concrete fetcher for one binding. API credentials come from
/// the environment, keyed by the binding name (`<NAME>_API_KEY`); a
/// missing credential is an empty-result condition, handled inside the
/// fetcher.
pub fn build_fetcher(
    binding: &SourceBinding,
    client: reqwest::Client,
    config: &RelayConfig,
) -> Box<dyn SourceFetch> {
    let key = binding.source_key();
    match binding.kind {
        SourceKind::Rss => Box::new(RssSource::new(
            key,
            binding.url.clone(),
            client,
            config.max_items_per_source,
        )),
        SourceKind::Scrape => Box::new(ScrapeSource::new(
            key,
            binding.url.clone(),
            client,
            config.max_items_per_source,
        )),
        SourceKind::Api => {
            let env_key = format!(
                "{}_API_KEY",
                binding.name.to_uppercase().replace([' ', '-'], "_")
            );
            Box::new(GraphqlSource::new(
                key,
                binding.url.clone(),
                std::env::var(&env_key).ok(),
                client,
                config.max_items_per_source,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FlakySource {
        key: String,
        calls: AtomicU32,
        fail_times: u32,
    }

    #[async_trait]
    impl SourceFetch for FlakySource {
        fn source_key(&self) -> &str {
            &self.key
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Rss
        }

        async fn fetch(&self) -> Result<Vec<Item>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(crate::types::RelayError::Parse("down".to_string()))
            } else {
                Ok(vec![Item::new("a", "title", "https://x.test/a", &self.key)])
            }
        }
    }

    fn fetcher() -> SourceFetcher {
        SourceFetcher::new(
            Arc::new(MultiServiceRateLimiter::new()),
            RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn dead_source_yields_empty_list() {
        let source = FlakySource {
            key: "dead".to_string(),
            calls: AtomicU32::new(0),
            fail_times: u32::MAX,
        };
        let items = fetcher().fetch_with_retry(&source).await;
        assert!(items.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_recovers_within_budget() {
        let source = FlakySource {
            key: "flaky".to_string(),
            calls: AtomicU32::new(0),
            fail_times: 2,
        };
        let items = fetcher().fetch_with_retry(&source).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "a");
    }
}
