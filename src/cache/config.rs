//! Per-category cache configuration and YAML loading.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::key::DEFAULT_SAMPLE_SIZE;
use super::similarity::{DEFAULT_GRAM_SIZE, DEFAULT_THRESHOLD};
use crate::{Error, ErrorContext, Result};

const HOUR: u64 = 3600;

/// Longest TTL a cache accepts. Longer per-call TTLs are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * HOUR);

/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Kind of generated artifact. Each kind gets its own bounded cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    /// Schedule / Gantt chart data
    Chart,
    /// Executive summary
    Summary,
    /// Presentation slides
    Presentation,
    /// Free-form research analysis
    Analysis,
}

impl ContentCategory {
    pub const ALL: [ContentCategory; 4] = [
        ContentCategory::Chart,
        ContentCategory::Summary,
        ContentCategory::Presentation,
        ContentCategory::Analysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chart => "chart",
            Self::Summary => "summary",
            Self::Presentation => "presentation",
            Self::Analysis => "analysis",
        }
    }

    /// Default sizing: charts 50 / 24h, summaries 100 / 12h, slides 30 / 24h,
    /// analyses 100 / 12h.
    pub fn default_config(&self) -> CacheConfig {
        let (max_size, ttl_hours) = match self {
            Self::Chart => (50, 24),
            Self::Summary => (100, 12),
            Self::Presentation => (30, 24),
            Self::Analysis => (100, 12),
        };
        CacheConfig::new()
            .with_max_size(max_size)
            .with_ttl(Duration::from_secs(ttl_hours * HOUR))
    }
}

impl std::fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chart" | "gantt" | "schedule" => Ok(Self::Chart),
            "summary" | "executive_summary" => Ok(Self::Summary),
            "presentation" | "slides" => Ok(Self::Presentation),
            "analysis" => Ok(Self::Analysis),
            other => Err(Error::validation_with_context(
                format!("unknown content category '{}'", other),
                ErrorContext::new().with_source("content_category"),
            )),
        }
    }
}

/// Options for a single bounded cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub max_size: usize,
    pub ttl: Duration,
    pub hash_sample_size: usize,
    pub similarity_threshold: f64,
    pub min_gram_size: usize,
    pub enable_similarity: bool,
    /// A disabled cache never stores and always misses.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 50,
            ttl: Duration::from_secs(24 * HOUR),
            hash_sample_size: DEFAULT_SAMPLE_SIZE,
            similarity_threshold: DEFAULT_THRESHOLD,
            min_gram_size: DEFAULT_GRAM_SIZE,
            enable_similarity: true,
            enabled: true,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_hash_sample_size(mut self, size: usize) -> Self {
        self.hash_sample_size = size;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_min_gram_size(mut self, n: usize) -> Self {
        self.min_gram_size = n;
        self
    }

    pub fn with_similarity(mut self, enabled: bool) -> Self {
        self.enable_similarity = enabled;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check invariants. `prefix` is prepended to field paths in errors.
    pub fn validate(&self, prefix: &str) -> Result<()> {
        let invalid = |field: &str, msg: &str| {
            Err(Error::configuration_with_context(
                msg.to_string(),
                ErrorContext::new()
                    .with_field_path(format!("{}{}", prefix, field))
                    .with_source("cache_config"),
            ))
        };
        if self.max_size == 0 {
            return invalid("max_size", "max_size must be at least 1");
        }
        if self.ttl.is_zero() {
            return invalid("ttl_secs", "ttl must be greater than zero");
        }
        if self.ttl > MAX_TTL {
            return invalid("ttl_secs", "ttl must not exceed 365 days");
        }
        if self.hash_sample_size == 0 {
            return invalid("hash_sample_size", "hash_sample_size must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return invalid(
                "similarity_threshold",
                "similarity_threshold must be within [0, 1]",
            );
        }
        if self.min_gram_size == 0 {
            return invalid("min_gram_size", "min_gram_size must be at least 1");
        }
        Ok(())
    }
}

/// Configuration for the whole pool. Every category always has an entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub categories: BTreeMap<ContentCategory, CacheConfig>,
    pub sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            categories: ContentCategory::ALL
                .iter()
                .map(|c| (*c, c.default_config()))
                .collect(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, category: ContentCategory, config: CacheConfig) -> Self {
        self.categories.insert(category, config);
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn category(&self, category: ContentCategory) -> CacheConfig {
        self.categories
            .get(&category)
            .cloned()
            .unwrap_or_else(|| category.default_config())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval.is_zero() {
            return Err(Error::configuration_with_context(
                "sweep interval must be greater than zero",
                ErrorContext::new()
                    .with_field_path("sweep_interval_secs")
                    .with_source("pool_config"),
            ));
        }
        for (category, config) in &self.categories {
            config.validate(&format!("categories.{}.", category))?;
        }
        Ok(())
    }

    /// Parse a YAML document. Omitted categories and fields keep their defaults.
    ///
    /// ```rust
    /// use artifact_guard::cache::{ContentCategory, PoolConfig};
    ///
    /// let cfg = PoolConfig::from_yaml_str(
    ///     "sweep_interval_secs: 60\ncategories:\n  chart:\n    max_size: 10\n",
    /// ).unwrap();
    /// assert_eq!(cfg.category(ContentCategory::Chart).max_size, 10);
    /// ```
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: PoolConfigFile = serde_yaml::from_str(yaml)?;
        let config = file.into_config();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot read cache config: {}", e),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("pool_config"),
            )
        })?;
        Self::from_yaml_str(&text)
    }
}

/// On-disk form: every field optional, durations in seconds.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PoolConfigFile {
    sweep_interval_secs: Option<u64>,
    #[serde(default)]
    categories: HashMap<ContentCategory, CacheConfigOverrides>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheConfigOverrides {
    max_size: Option<usize>,
    ttl_secs: Option<u64>,
    hash_sample_size: Option<usize>,
    similarity_threshold: Option<f64>,
    min_gram_size: Option<usize>,
    enable_similarity: Option<bool>,
    enabled: Option<bool>,
}

impl CacheConfigOverrides {
    fn apply(self, mut base: CacheConfig) -> CacheConfig {
        if let Some(v) = self.max_size {
            base.max_size = v;
        }
        if let Some(v) = self.ttl_secs {
            base.ttl = Duration::from_secs(v);
        }
        if let Some(v) = self.hash_sample_size {
            base.hash_sample_size = v;
        }
        if let Some(v) = self.similarity_threshold {
            base.similarity_threshold = v;
        }
        if let Some(v) = self.min_gram_size {
            base.min_gram_size = v;
        }
        if let Some(v) = self.enable_similarity {
            base.enable_similarity = v;
        }
        if let Some(v) = self.enabled {
            base.enabled = v;
        }
        base
    }
}

impl PoolConfigFile {
    fn into_config(self) -> PoolConfig {
        let mut config = PoolConfig::default();
        if let Some(secs) = self.sweep_interval_secs {
            config.sweep_interval = Duration::from_secs(secs);
        }
        for (category, overrides) in self.categories {
            let merged = overrides.apply(category.default_config());
            config.categories.insert(category, merged);
        }
        config
    }
}
