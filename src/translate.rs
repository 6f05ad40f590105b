use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::cache::ContentCache;
use crate::rate_limit::MultiServiceRateLimiter;
use crate::types::Result;

/// Provider character limit; longer inputs are clamped before the call.
const PROVIDER_MAX_CHARS: usize = 4500;

/// External translation collaborator.
#[async_trait]
pub trait Translate: Send + Sync {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String>;
}

/// Cache-first translator. A hit skips the provider (and its rate limit)
/// entirely; a miss acquires the `translate` budget, calls the provider,
/// and persists the result. Provider errors propagate so the pipeline can
/// fall back to the original text without caching anything.
pub struct CachedTranslator {
    cache: Arc<ContentCache>,
    limiter: Arc<MultiServiceRateLimiter>,
    inner: Arc<dyn Translate>,
    target_language: String,
}

impl CachedTranslator {
    pub fn new(
        cache: Arc<ContentCache>,
        limiter: Arc<MultiServiceRateLimiter>,
        inner: Arc<dyn Translate>,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            limiter,
            inner,
            target_language: target_language.into(),
        }
    }

    pub async fn translate(&self, text: &str) -> Result<String> {
        if text.is_empty() {
            return Ok(String::new());
        }

        let clamped: String = if text.chars().count() > PROVIDER_MAX_CHARS {
            text.chars().take(PROVIDER_MAX_CHARS).collect()
        } else {
            text.to_string()
        };

        if let Some(cached) = self.cache.get(&clamped).await? {
            return Ok(cached);
        }

        self.limiter.acquire("translate").await;
        let translated = self.inner.translate(&clamped, &self.target_language).await?;
        self.cache.set(&clamped, &translated).await?;

        debug!(
            "translated {} -> {} chars",
            clamped.len(),
            translated.len()
        );
        Ok(translated)
    }
}
