//! One bounded cache per content category behind a uniform API.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::bounded::{BoundedCache, CacheMetrics, CacheStats, Lookup};
use super::clock::{Clock, SystemClock};
use super::config::{ContentCategory, PoolConfig};
use super::key::{CacheKey, KeyDeriver};
use crate::Result;

struct Slot {
    deriver: KeyDeriver,
    cache: Mutex<BoundedCache>,
}

/// Aggregated view over every category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolMetrics {
    pub categories: BTreeMap<ContentCategory, CacheStats>,
    pub total: CacheMetrics,
    pub total_size: usize,
    pub hit_rate: f64,
}

/// Process-wide cache manager. Construct once and share via `Arc`.
///
/// Every operation locks only the cache of the category it touches, and holds
/// that lock for the whole operation including the similarity scan. Internal
/// faults never surface: a lock poisoned by a panicking caller is recovered
/// and the category keeps serving.
pub struct CachePool {
    slots: BTreeMap<ContentCategory, Slot>,
    sweep_interval: Duration,
    sweeping: AtomicBool,
}

impl CachePool {
    pub fn new(config: PoolConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: PoolConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let mut slots = BTreeMap::new();
        for category in ContentCategory::ALL {
            let cfg = config.category(category);
            let slot = Slot {
                deriver: KeyDeriver::new().with_sample_size(cfg.hash_sample_size),
                cache: Mutex::new(BoundedCache::with_clock(cfg, clock.clone())?),
            };
            slots.insert(category, slot);
        }
        Ok(Self {
            slots,
            sweep_interval: config.sweep_interval,
            sweeping: AtomicBool::new(false),
        })
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    pub fn key_for(&self, category: ContentCategory, content: &str, prompt: &str) -> CacheKey {
        self.deriver(category)
            .derive(content, category.as_str(), prompt)
    }

    /// Strong ETag for a request. Identical requests always get identical tags,
    /// and computing one never touches the cache.
    pub fn generate_etag(&self, category: ContentCategory, content: &str, prompt: &str) -> String {
        self.key_for(category, content, prompt).etag()
    }

    /// Exact-then-similar lookup returning the raw JSON copy and how it was found.
    pub fn lookup(
        &self,
        category: ContentCategory,
        content: &str,
        prompt: &str,
    ) -> Option<Lookup<Value>> {
        self.with_cache(category, |cache| {
            cache.get_by_content(content, category.as_str(), prompt)
        })
        .flatten()
    }

    /// Typed variant of [`lookup`](Self::lookup). Stored values that do not
    /// deserialize into `T` are dropped as corrupt.
    pub fn lookup_as<T: DeserializeOwned>(
        &self,
        category: ContentCategory,
        content: &str,
        prompt: &str,
    ) -> Option<Lookup<T>> {
        self.with_cache(category, |cache| {
            cache.get_by_content_as::<T>(content, category.as_str(), prompt)
        })
        .flatten()
    }

    pub fn get_cached_content<T: DeserializeOwned>(
        &self,
        category: ContentCategory,
        content: &str,
        prompt: &str,
    ) -> Option<T> {
        self.lookup_as(category, content, prompt).map(|l| l.value)
    }

    pub fn get_cached_value(
        &self,
        category: ContentCategory,
        content: &str,
        prompt: &str,
    ) -> Option<Value> {
        self.lookup(category, content, prompt).map(|l| l.value)
    }

    /// Store a generated artifact. Fails only if `data` cannot be represented
    /// as JSON.
    pub fn set_cached_content<T: Serialize + ?Sized>(
        &self,
        category: ContentCategory,
        content: &str,
        prompt: &str,
        data: &T,
    ) -> Result<()> {
        self.store(category, content, prompt, data, None)
    }

    pub fn set_cached_content_with_ttl<T: Serialize + ?Sized>(
        &self,
        category: ContentCategory,
        content: &str,
        prompt: &str,
        data: &T,
        ttl: Duration,
    ) -> Result<()> {
        self.store(category, content, prompt, data, Some(ttl))
    }

    fn store<T: Serialize + ?Sized>(
        &self,
        category: ContentCategory,
        content: &str,
        prompt: &str,
        data: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let value = serde_json::to_value(data)?;
        let key = self.key_for(category, content, prompt);
        debug!(category = category.as_str(), key = key.as_str(), "cache store");
        self.with_cache(category, |cache| {
            cache.set(key, value, content, category.as_str(), ttl)
        });
        Ok(())
    }

    pub fn invalidate(&self, category: ContentCategory, content: &str, prompt: &str) -> bool {
        let key = self.key_for(category, content, prompt);
        self.with_cache(category, |cache| cache.invalidate(&key))
            .unwrap_or(false)
    }

    pub fn clear_all(&self) {
        for category in self.slots.keys() {
            self.with_cache(*category, |cache| cache.clear());
        }
    }

    /// Run one expiry pass over every category.
    ///
    /// Returns `None` without doing anything if another pass is in flight.
    pub fn sweep_now(&self) -> Option<usize> {
        let _guard = SweepGuard::acquire(&self.sweeping)?;
        let mut removed = 0;
        for category in self.slots.keys() {
            removed += self
                .with_cache(*category, |cache| cache.sweep_expired())
                .unwrap_or(0);
        }
        if removed > 0 {
            info!(removed, "cache sweep removed expired entries");
        } else {
            debug!("cache sweep found nothing to remove");
        }
        Some(removed)
    }

    pub fn metrics(&self) -> PoolMetrics {
        let mut categories = BTreeMap::new();
        let mut total = CacheMetrics::default();
        let mut total_size = 0;
        for category in self.slots.keys() {
            if let Some(stats) = self.with_cache(*category, |cache| cache.metrics()) {
                total.absorb(&stats.metrics);
                total_size += stats.size;
                categories.insert(*category, stats);
            }
        }
        PoolMetrics {
            categories,
            hit_rate: total.hit_rate(),
            total,
            total_size,
        }
    }

    pub fn category_metrics(&self, category: ContentCategory) -> Option<CacheStats> {
        self.with_cache(category, |cache| cache.metrics())
    }

    pub(crate) fn is_sweeping(&self) -> bool {
        self.sweeping.load(Ordering::Acquire)
    }

    fn deriver(&self, category: ContentCategory) -> KeyDeriver {
        self.slots
            .get(&category)
            .map(|slot| slot.deriver)
            .unwrap_or_default()
    }

    fn with_cache<R>(
        &self,
        category: ContentCategory,
        f: impl FnOnce(&mut BoundedCache) -> R,
    ) -> Option<R> {
        let slot = self.slots.get(&category)?;
        let mut cache = slot.cache.lock().unwrap_or_else(|poisoned| {
            warn!(category = category.as_str(), "recovering poisoned cache lock");
            poisoned.into_inner()
        });
        Some(f(&mut cache))
    }
}

/// Holds the "sweep in flight" flag for the duration of one pass.
struct SweepGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SweepGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
