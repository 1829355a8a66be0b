//! Single LRU + TTL cache with exact and near-duplicate lookup.
//!
//! Entry lifecycle: created by [`BoundedCache::set`], refreshed by successful
//! reads, and removed only by explicit invalidation (including [`BoundedCache::clear`]),
//! LRU eviction, lazy expiry on access, a sweep, or corruption self-heal.

use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::config::{CacheConfig, MAX_TTL};
use super::key::{prefix_chars, CacheKey, KeyDeriver};
use super::similarity::{comparison_sample, jaccard, SimilarityMatcher};
use crate::Result;

/// Smallest TTL accepted by `set`; keeps `expires_at > created_at`.
const MIN_TTL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    data: Value,
    /// Normalized, size-bounded input kept for similarity scans.
    pub input_sample: String,
    pub category: String,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
    pub expires_at: Instant,
    pub access_count: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Counters owned by one cache. Only the owning cache mutates them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub exact_hits: u64,
    pub similarity_hits: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Generation calls avoided (one per hit of either kind).
    pub total_saved: u64,
    pub sets: u64,
    /// Entries removed by `invalidate` or `clear`.
    pub invalidations: u64,
    pub corruptions: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Add another set of counters into this one.
    pub fn absorb(&mut self, other: &CacheMetrics) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.exact_hits += other.exact_hits;
        self.similarity_hits += other.similarity_hits;
        self.evictions += other.evictions;
        self.expirations += other.expirations;
        self.total_saved += other.total_saved;
        self.sets += other.sets;
        self.invalidations += other.invalidations;
        self.corruptions += other.corruptions;
    }
}

/// Point-in-time view of a cache for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub metrics: CacheMetrics,
    pub size: usize,
    pub max_size: usize,
    pub hit_rate: f64,
}

/// Monitoring view of a single entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub key: String,
    pub category: String,
    pub age_ms: u64,
    pub idle_ms: u64,
    pub expires_in_ms: u64,
    pub access_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum HitKind {
    Exact,
    Similar { score: f64 },
}

/// A successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup<T> {
    pub value: T,
    pub key: CacheKey,
    pub hit: HitKind,
}

/// Result of a similarity scan.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarMatch {
    pub key: CacheKey,
    pub score: f64,
}

pub struct BoundedCache {
    config: CacheConfig,
    deriver: KeyDeriver,
    matcher: SimilarityMatcher,
    entries: LruCache<CacheKey, CacheEntry>,
    metrics: CacheMetrics,
    clock: Arc<dyn Clock>,
}

impl BoundedCache {
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build a cache on the given clock. Fails if `config` does not validate.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate("")?;
        let deriver = KeyDeriver::new().with_sample_size(config.hash_sample_size);
        let matcher = SimilarityMatcher::new()
            .with_gram_size(config.min_gram_size)
            .with_threshold(config.similarity_threshold);
        Ok(Self {
            config,
            deriver,
            matcher,
            // Capacity is enforced by `set` so evictions can be counted.
            entries: LruCache::unbounded(),
            metrics: CacheMetrics::default(),
            clock,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn derive_key(&self, content: &str, category: &str, prompt: &str) -> CacheKey {
        self.deriver.derive(content, category, prompt)
    }

    /// Copy of the stored value, or `None` on miss or expiry.
    pub fn get(&mut self, key: &CacheKey) -> Option<Value> {
        self.get_with(key, &|v: &Value| Ok(v.clone()))
    }

    /// Typed copy of the stored value. A value that no longer converts to `T`
    /// is treated as corrupt: the entry is dropped and the read misses.
    pub fn get_as<T: DeserializeOwned>(&mut self, key: &CacheKey) -> Option<T> {
        self.get_with(key, &|v: &Value| T::deserialize(v))
    }

    pub fn get_by_content(
        &mut self,
        content: &str,
        category: &str,
        prompt: &str,
    ) -> Option<Lookup<Value>> {
        self.get_by_content_with(content, category, prompt, &|v: &Value| Ok(v.clone()))
    }

    pub fn get_by_content_as<T: DeserializeOwned>(
        &mut self,
        content: &str,
        category: &str,
        prompt: &str,
    ) -> Option<Lookup<T>> {
        self.get_by_content_with(content, category, prompt, &|v: &Value| T::deserialize(v))
    }

    fn get_with<T, F>(&mut self, key: &CacheKey, convert: &F) -> Option<T>
    where
        F: Fn(&Value) -> serde_json::Result<T>,
    {
        if !self.config.enabled {
            return None;
        }
        match self.lookup_exact(key, convert) {
            Some(value) => {
                self.record_hit(HitKind::Exact);
                Some(value)
            }
            None => {
                self.metrics.misses += 1;
                None
            }
        }
    }

    fn get_by_content_with<T, F>(
        &mut self,
        content: &str,
        category: &str,
        prompt: &str,
        convert: &F,
    ) -> Option<Lookup<T>>
    where
        F: Fn(&Value) -> serde_json::Result<T>,
    {
        if !self.config.enabled {
            return None;
        }
        let key = self.derive_key(content, category, prompt);
        if let Some(value) = self.lookup_exact(&key, convert) {
            self.record_hit(HitKind::Exact);
            debug!(category, key = %short(&key), "cache exact hit");
            return Some(Lookup {
                value,
                key,
                hit: HitKind::Exact,
            });
        }

        if self.config.enable_similarity {
            if let Some(found) = self.find_similar(content, category) {
                let now = self.clock.now();
                if let Some(value) = self.read_entry(&found.key, now, convert) {
                    let hit = HitKind::Similar { score: found.score };
                    self.record_hit(hit);
                    debug!(
                        category,
                        key = %short(&found.key),
                        score = found.score,
                        "cache similarity hit"
                    );
                    return Some(Lookup {
                        value,
                        key: found.key,
                        hit,
                    });
                }
            }
        }

        self.metrics.misses += 1;
        debug!(category, key = %short(&key), "cache miss");
        None
    }

    /// First live entry of `category` whose input is at least
    /// `similarity_threshold` similar to `content`. Entries are scanned from
    /// most to least recently used. Does not touch recency or metrics.
    pub fn find_similar(&self, content: &str, category: &str) -> Option<SimilarMatch> {
        let query = self.matcher.grams(content);
        if query.is_empty() {
            return None;
        }
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|(_, e)| e.category == category && !e.is_expired(now))
            .find_map(|(key, e)| {
                let score = jaccard(&query, &self.matcher.sample_grams(&e.input_sample));
                (score >= self.matcher.threshold()).then(|| SimilarMatch {
                    key: key.clone(),
                    score,
                })
            })
    }

    /// Store `data` under `key`. `input` is the raw content the data was
    /// generated from; `ttl` falls back to the configured TTL and is clamped
    /// to `[1ms, MAX_TTL]`.
    pub fn set(
        &mut self,
        key: CacheKey,
        data: Value,
        input: &str,
        category: &str,
        ttl: Option<Duration>,
    ) {
        if !self.config.enabled {
            return;
        }
        let now = self.clock.now();
        let ttl = ttl.unwrap_or(self.config.ttl).clamp(MIN_TTL, MAX_TTL);
        let Some(expires_at) = now.checked_add(ttl) else {
            warn!(category, ttl_secs = ttl.as_secs(), "cache ttl out of clock range; not stored");
            return;
        };

        if !self.entries.contains(&key) {
            while self.entries.len() >= self.config.max_size {
                match self.entries.pop_lru() {
                    Some((evicted, _)) => {
                        self.metrics.evictions += 1;
                        debug!(category, key = %short(&evicted), "cache evicted lru entry");
                    }
                    None => break,
                }
            }
        }

        let input_sample = if self.config.enable_similarity {
            comparison_sample(input)
        } else {
            String::new()
        };
        let entry = CacheEntry {
            key: key.clone(),
            data,
            input_sample,
            category: category.to_string(),
            created_at: now,
            last_accessed_at: now,
            expires_at,
            access_count: 0,
        };
        self.entries.put(key, entry);
        self.metrics.sets += 1;
    }

    pub fn invalidate(&mut self, key: &CacheKey) -> bool {
        let removed = self.entries.pop(key).is_some();
        if removed {
            self.metrics.invalidations += 1;
        }
        removed
    }

    /// Remove every expired entry in one pass. Returns the number removed.
    pub fn sweep_expired(&mut self) -> usize {
        let now = self.clock.now();
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key);
        }
        self.metrics.expirations += expired.len() as u64;
        expired.len()
    }

    pub fn metrics(&self) -> CacheStats {
        CacheStats {
            metrics: self.metrics,
            size: self.entries.len(),
            max_size: self.config.max_size,
            hit_rate: self.metrics.hit_rate(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry. Counted as invalidations.
    pub fn clear(&mut self) {
        self.metrics.invalidations += self.entries.len() as u64;
        self.entries.clear();
    }

    /// Whether a live entry exists. Does not affect recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = self.clock.now();
        self.entries
            .peek(key)
            .map(|e| !e.is_expired(now))
            .unwrap_or(false)
    }

    /// Entries from most to least recently used.
    pub fn entries(&self) -> Vec<EntryInfo> {
        let now = self.clock.now();
        self.entries
            .iter()
            .map(|(key, e)| EntryInfo {
                key: key.to_string(),
                category: e.category.clone(),
                age_ms: millis(now.saturating_duration_since(e.created_at)),
                idle_ms: millis(now.saturating_duration_since(e.last_accessed_at)),
                expires_in_ms: millis(e.expires_at.saturating_duration_since(now)),
                access_count: e.access_count,
            })
            .collect()
    }

    /// Exact lookup with lazy expiry. Does not record hits or misses.
    fn lookup_exact<T, F>(&mut self, key: &CacheKey, convert: &F) -> Option<T>
    where
        F: Fn(&Value) -> serde_json::Result<T>,
    {
        let now = self.clock.now();
        let expired = self.entries.peek(key)?.is_expired(now);
        if expired {
            self.entries.pop(key);
            self.metrics.expirations += 1;
            debug!(key = %short(key), "cache entry expired on access");
            return None;
        }
        self.read_entry(key, now, convert)
    }

    /// Promote, copy out and touch a live entry; self-heal if the copy fails.
    fn read_entry<T, F>(&mut self, key: &CacheKey, now: Instant, convert: &F) -> Option<T>
    where
        F: Fn(&Value) -> serde_json::Result<T>,
    {
        let copied = {
            let entry = self.entries.get_mut(key)?;
            let copied = convert(&entry.data);
            if copied.is_ok() {
                entry.last_accessed_at = now;
                entry.access_count += 1;
            }
            copied
        };
        match copied {
            Ok(value) => Some(value),
            Err(e) => {
                self.entries.pop(key);
                self.metrics.corruptions += 1;
                warn!(key = %short(key), error = %e, "dropping cache entry that failed to copy");
                None
            }
        }
    }

    fn record_hit(&mut self, hit: HitKind) {
        self.metrics.hits += 1;
        self.metrics.total_saved += 1;
        match hit {
            HitKind::Exact => self.metrics.exact_hits += 1,
            HitKind::Similar { .. } => self.metrics.similarity_hits += 1,
        }
    }
}

fn short(key: &CacheKey) -> &str {
    prefix_chars(key.as_str(), 12)
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use serde_json::json;

    fn cache(max_size: usize) -> (BoundedCache, ManualClock) {
        let clock = ManualClock::new();
        let config = CacheConfig::new()
            .with_max_size(max_size)
            .with_ttl(Duration::from_secs(60));
        (
            BoundedCache::with_clock(config, Arc::new(clock.clone())).unwrap(),
            clock,
        )
    }

    fn key(n: usize) -> CacheKey {
        CacheKey::new(format!("{:064x}", n))
    }

    #[test]
    fn test_get_returns_independent_copies() {
        let (mut c, _) = cache(4);
        let v = json!({"tasks": [{"name": "design", "weeks": 2}]});
        c.set(key(1), v.clone(), "doc", "chart", None);

        let mut a = c.get(&key(1)).unwrap();
        let b = c.get(&key(1)).unwrap();
        assert_eq!(a, v);
        assert_eq!(b, v);

        a["tasks"][0]["weeks"] = json!(99);
        assert_eq!(c.get(&key(1)).unwrap(), v);
        assert_eq!(b, v);
    }

    #[test]
    fn test_capacity_holds_after_every_set() {
        let (mut c, _) = cache(3);
        for i in 0..20 {
            c.set(key(i), json!(i), "doc", "chart", None);
            assert!(c.len() <= 3);
        }
        assert_eq!(c.metrics().metrics.evictions, 17);
    }

    #[test]
    fn test_eviction_follows_insertion_order_without_reads() {
        let (mut c, _) = cache(3);
        for i in 0..4 {
            c.set(key(i), json!(i), "doc", "chart", None);
        }
        assert!(!c.contains(&key(0)));
        for i in 1..4 {
            assert!(c.contains(&key(i)));
        }
    }

    #[test]
    fn test_read_refreshes_recency() {
        let (mut c, _) = cache(3);
        for i in 0..3 {
            c.set(key(i), json!(i), "doc", "chart", None);
        }
        assert!(c.get(&key(0)).is_some());
        c.set(key(3), json!(3), "doc", "chart", None);
        assert!(c.contains(&key(0)));
        assert!(!c.contains(&key(1)));
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let (mut c, _) = cache(2);
        c.set(key(1), json!(1), "doc", "chart", None);
        c.set(key(2), json!(2), "doc", "chart", None);
        c.set(key(1), json!("updated"), "doc", "chart", None);
        assert_eq!(c.len(), 2);
        assert_eq!(c.metrics().metrics.evictions, 0);
        assert_eq!(c.get(&key(1)), Some(json!("updated")));
    }

    #[test]
    fn test_ttl_boundary() {
        let (mut c, clock) = cache(4);
        c.set(key(1), json!("x"), "doc", "chart", Some(Duration::from_secs(10)));

        clock.advance(Duration::from_millis(9_999));
        assert!(c.get(&key(1)).is_some());

        clock.advance(Duration::from_millis(1));
        assert!(c.get(&key(1)).is_none());

        let m = c.metrics().metrics;
        assert_eq!(m.expirations, 1);
        assert_eq!(m.misses, 1);
        assert_eq!(m.exact_hits, 1);
        assert!(c.is_empty());
    }

    #[test]
    fn test_zero_ttl_is_clamped() {
        let (mut c, _) = cache(4);
        c.set(key(1), json!(1), "doc", "chart", Some(Duration::ZERO));
        assert!(c.get(&key(1)).is_some());
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (mut c, clock) = cache(10);
        c.set(key(1), json!(1), "doc", "chart", Some(Duration::from_secs(5)));
        c.set(key(2), json!(2), "doc", "chart", Some(Duration::from_secs(5)));
        c.set(key(3), json!(3), "doc", "chart", Some(Duration::from_secs(50)));
        clock.advance(Duration::from_secs(6));

        assert_eq!(c.sweep_expired(), 2);
        assert_eq!(c.len(), 1);
        assert!(c.contains(&key(3)));
        assert_eq!(c.metrics().metrics.expirations, 2);
        assert_eq!(c.sweep_expired(), 0);
    }

    #[test]
    fn test_invalidate() {
        let (mut c, _) = cache(4);
        c.set(key(1), json!(1), "doc", "chart", None);
        assert!(c.invalidate(&key(1)));
        assert!(!c.invalidate(&key(1)));
        assert!(c.get(&key(1)).is_none());
        assert_eq!(c.metrics().metrics.invalidations, 1);
    }

    #[test]
    fn test_clear_counts_removed_entries() {
        let (mut c, _) = cache(4);
        for i in 0..3 {
            c.set(key(i), json!(i), "doc", "chart", None);
        }
        c.clear();
        assert!(c.is_empty());
        assert_eq!(c.metrics().metrics.invalidations, 3);
        c.clear();
        assert_eq!(c.metrics().metrics.invalidations, 3);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(BoundedCache::new(CacheConfig::new().with_max_size(0)).is_err());
        assert!(BoundedCache::new(CacheConfig::new().with_ttl(Duration::ZERO)).is_err());
    }

    #[test]
    fn test_huge_ttl_is_clamped_to_maximum() {
        let (mut c, clock) = cache(4);
        c.set(key(1), json!(1), "doc", "chart", Some(Duration::MAX));
        assert!(c.get(&key(1)).is_some());
        assert_eq!(c.entries()[0].expires_in_ms, MAX_TTL.as_millis() as u64);

        clock.advance(MAX_TTL);
        assert!(c.get(&key(1)).is_none());
        c.set(key(2), json!(2), "doc", "chart", None);
        assert!(c.get(&key(2)).is_some());
    }

    #[test]
    fn test_non_ascii_keys_are_logged_safely() {
        let (mut c, _) = cache(1);
        let wide = CacheKey::new("é".repeat(20));
        c.set(wide.clone(), json!(1), "doc", "chart", None);
        c.set(CacheKey::new("ß".repeat(20)), json!(2), "doc", "chart", None);
        assert!(c.get(&wide).is_none());
        assert_eq!(short(&wide), "é".repeat(12));
    }

    #[test]
    fn test_get_by_content_exact_then_similar() {
        let (mut c, _) = cache(4);
        let doc = "Milestones: vendor selection in March, pilot rollout in May, production \
                   cutover by the end of September, followed by a two week stabilisation window.";
        let k = c.derive_key(doc, "chart", "gantt");
        c.set(k, json!({"ok": true}), doc, "chart", None);

        let exact = c.get_by_content(doc, "chart", "gantt").unwrap();
        assert_eq!(exact.hit, HitKind::Exact);

        let edited = doc.replace("March", "April");
        let similar = c.get_by_content(&edited, "chart", "gantt").unwrap();
        assert!(matches!(similar.hit, HitKind::Similar { score } if score >= 0.9));
        assert_eq!(similar.value, json!({"ok": true}));

        assert!(c.get_by_content(&edited, "summary", "gantt").is_none());

        let m = c.metrics().metrics;
        assert_eq!(m.exact_hits, 1);
        assert_eq!(m.similarity_hits, 1);
        assert_eq!(m.hits, 2);
        assert_eq!(m.total_saved, 2);
        assert_eq!(m.misses, 1);
    }

    #[test]
    fn test_similarity_disabled_only_exact() {
        let clock = ManualClock::new();
        let config = CacheConfig::new().with_similarity(false);
        let mut c = BoundedCache::with_clock(config, Arc::new(clock)).unwrap();
        let doc = "a fairly long document about warehouse migration timelines and risks";
        let k = c.derive_key(doc, "chart", "");
        c.set(k, json!(1), doc, "chart", None);
        assert!(c.get_by_content(&doc.replace("risks", "risk"), "chart", "").is_none());
        assert!(c.get_by_content(doc, "chart", "").is_some());
    }

    #[test]
    fn test_similarity_skips_expired_entries() {
        let (mut c, clock) = cache(4);
        let doc = "quarterly roadmap with design, build, test and launch phases across teams";
        c.set(key(1), json!(1), doc, "chart", Some(Duration::from_secs(1)));
        clock.advance(Duration::from_secs(2));
        assert!(c.find_similar(doc, "chart").is_none());
    }

    #[test]
    fn test_corrupt_typed_read_self_heals() {
        #[derive(Debug, Deserialize)]
        struct Chart {
            #[allow(dead_code)]
            tasks: Vec<String>,
        }

        let (mut c, _) = cache(4);
        c.set(key(1), json!({"tasks": "not a list"}), "doc", "chart", None);
        assert!(c.get_as::<Chart>(&key(1)).is_none());
        assert!(c.is_empty());
        let m = c.metrics().metrics;
        assert_eq!(m.corruptions, 1);
        assert_eq!(m.misses, 1);
        assert_eq!(m.hits, 0);
    }

    #[test]
    fn test_disabled_cache_never_stores() {
        let mut c = BoundedCache::new(CacheConfig::new().with_enabled(false)).unwrap();
        c.set(key(1), json!(1), "doc", "chart", None);
        assert!(c.is_empty());
        assert!(c.get(&key(1)).is_none());
    }

    #[test]
    fn test_entries_report_access_counts() {
        let (mut c, clock) = cache(4);
        c.set(key(1), json!(1), "doc", "chart", None);
        clock.advance(Duration::from_secs(3));
        c.get(&key(1));
        c.get(&key(1));
        let info = c.entries();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].access_count, 2);
        assert_eq!(info[0].age_ms, 3_000);
        assert_eq!(info[0].idle_ms, 0);
        assert_eq!(info[0].expires_in_ms, 57_000);
    }

    #[test]
    fn test_hit_rate() {
        let (mut c, _) = cache(4);
        c.set(key(1), json!(1), "doc", "chart", None);
        c.get(&key(1));
        c.get(&key(2));
        assert_eq!(c.metrics().hit_rate, 0.5);
        assert_eq!(CacheMetrics::default().hit_rate(), 0.0);
    }
}
