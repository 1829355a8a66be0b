//! Cache-first generation: look up, otherwise generate with retry and store.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::cache::{CachePool, ContentCategory, HitKind};
use crate::resilience::{OnRetry, RetryExecutor};
use crate::{Error, Result};

/// Where a returned artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Origin {
    ExactHit,
    SimilarHit { score: f64 },
    Generated,
}

impl Origin {
    pub fn is_cached(&self) -> bool {
        !matches!(self, Origin::Generated)
    }
}

impl From<HitKind> for Origin {
    fn from(hit: HitKind) -> Self {
        match hit {
            HitKind::Exact => Origin::ExactHit,
            HitKind::Similar { score } => Origin::SimilarHit { score },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generated<T> {
    pub value: T,
    pub origin: Origin,
    /// ETag of the request, usable for conditional responses.
    pub etag: String,
}

/// Wires a shared [`CachePool`] to a [`RetryExecutor`].
#[derive(Clone)]
pub struct CachedGenerator {
    pool: Arc<CachePool>,
    retry: RetryExecutor,
}

impl CachedGenerator {
    pub fn new(pool: Arc<CachePool>, retry: RetryExecutor) -> Self {
        Self { pool, retry }
    }

    pub fn pool(&self) -> &Arc<CachePool> {
        &self.pool
    }

    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    pub async fn get_or_generate<T, F, Fut>(
        &self,
        category: ContentCategory,
        content: &str,
        prompt: &str,
        operation: F,
    ) -> Result<Generated<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.get_or_generate_with(category, content, prompt, operation, None)
            .await
    }

    /// Serve from cache when possible; otherwise run `operation` through the
    /// retry executor and cache the result. Storing is best effort: a value
    /// that cannot be cached is still returned.
    pub async fn get_or_generate_with<T, F, Fut>(
        &self,
        category: ContentCategory,
        content: &str,
        prompt: &str,
        operation: F,
        on_retry: Option<&mut OnRetry<'_, Error>>,
    ) -> Result<Generated<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let etag = self.pool.generate_etag(category, content, prompt);
        if let Some(hit) = self.pool.lookup_as::<T>(category, content, prompt) {
            return Ok(Generated {
                value: hit.value,
                origin: hit.hit.into(),
                etag,
            });
        }

        let started = Instant::now();
        let value = self.retry.execute_with(operation, on_retry).await?;
        info!(
            category = category.as_str(),
            duration_ms = started.elapsed().as_millis() as u64,
            "artifact generated"
        );

        if let Err(e) = self
            .pool
            .set_cached_content(category, content, prompt, &value)
        {
            warn!(category = category.as_str(), error = %e, "generated artifact not cached");
        }

        Ok(Generated {
            value,
            origin: Origin::Generated,
            etag,
        })
    }
}
