//! # artifact-guard
//!
//! Resilience and caching layer for expensive, rate-limited, non-deterministic
//! artifact generation (schedule charts, executive summaries, slides).
//!
//! ## Overview
//!
//! Generation calls are slow, cost money, and fail in ways that need different
//! handling. This crate keeps them affordable and tolerable:
//!
//! - **Caching**: a bounded in-memory cache per content category that
//!   recognizes both exact and near-duplicate inputs ([`cache`])
//! - **Retry**: a backoff executor that fails fast on quota exhaustion and backs
//!   off differently for throttling and other transient failures ([`resilience`])
//! - **Orchestration**: cache-first generation with ETags ([`generation`])
//!
//! Routing, document extraction, prompt building, rendering and durable storage
//! live elsewhere; this crate only sees opaque JSON payloads and typed errors.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use artifact_guard::cache::{CachePool, ContentCategory, PoolConfig};
//! use artifact_guard::generation::CachedGenerator;
//! use artifact_guard::resilience::{RetryConfig, RetryExecutor};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> artifact_guard::Result<()> {
//!     let pool = Arc::new(CachePool::new(PoolConfig::default())?);
//!     let sweeper = pool.spawn_sweeper();
//!     let generator = CachedGenerator::new(pool.clone(), RetryExecutor::new(RetryConfig::new()));
//!
//!     let out = generator
//!         .get_or_generate(ContentCategory::Summary, "research text", "summarize", || async {
//!             Ok(serde_json::json!({"headline": "On track"}))
//!         })
//!         .await?;
//!     println!("{:?} {}", out.origin, out.etag);
//!
//!     sweeper.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Key derivation, similarity matching, bounded caches, the category pool |
//! | [`resilience`] | Retry executor and failure classification |
//! | [`generation`] | Cache-first generation flow |
//! | [`error_code`] | Typed upstream failure codes |

pub mod cache;
pub mod error_code;
pub mod generation;
pub mod resilience;

pub use cache::{CachePool, ContentCategory, PoolConfig};
pub use error_code::UpstreamErrorCode;
pub use generation::{CachedGenerator, Generated, Origin};
pub use resilience::{RetryConfig, RetryExecutor};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
