//! # Artifact Cache
//!
//! In-process, memory-only caching of generated artifacts so that repeated and
//! near-identical requests do not pay for another generation call.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CachePool`] | One bounded cache per [`ContentCategory`], uniform get/set/ETag API |
//! | [`BoundedCache`] | LRU + TTL cache with exact and similarity lookup |
//! | [`KeyDeriver`] | Size-bounded SHA-256 key derivation |
//! | [`SimilarityMatcher`] | Character n-gram Jaccard near-duplicate detection |
//! | [`SweepHandle`] | Stoppable background expiry sweep |
//! | [`Clock`] | Injectable time source ([`ManualClock`] for tests) |
//!
//! ## Example
//!
//! ```rust
//! use artifact_guard::cache::{CachePool, ContentCategory, PoolConfig};
//! use serde_json::json;
//!
//! let pool = CachePool::new(PoolConfig::default()).unwrap();
//! let doc = "Phase 1: discovery. Phase 2: build. Phase 3: launch.";
//!
//! assert!(pool.get_cached_value(ContentCategory::Chart, doc, "gantt").is_none());
//! pool.set_cached_content(ContentCategory::Chart, doc, "gantt", &json!({"rows": 3})).unwrap();
//! assert_eq!(
//!     pool.get_cached_value(ContentCategory::Chart, doc, "gantt"),
//!     Some(json!({"rows": 3}))
//! );
//! ```
//!
//! ## Lookup Order
//!
//! 1. Exact: the request digest (category, prompt head, content sample).
//! 2. Similar: the first live entry of the same category whose input has a
//!    trigram Jaccard similarity at or above the configured threshold.
//!
//! The similarity scan is linear in the number of entries of one category,
//! which is bounded by that category's `max_size`.
//!
//! Every returned value is an independent copy. A miss is always a safe
//! answer: the caller can fall back to the real generation call.

mod bounded;
mod clock;
mod config;
mod key;
mod pool;
pub mod similarity;
mod sweeper;

pub use bounded::{
    BoundedCache, CacheEntry, CacheMetrics, CacheStats, EntryInfo, HitKind, Lookup, SimilarMatch,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, ContentCategory, PoolConfig, DEFAULT_SWEEP_INTERVAL, MAX_TTL};
pub use key::{CacheKey, KeyDeriver, DEFAULT_SAMPLE_SIZE, PROMPT_PREFIX_CHARS};
pub use pool::{CachePool, PoolMetrics};
pub use similarity::SimilarityMatcher;
pub use sweeper::SweepHandle;
