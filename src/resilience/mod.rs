//! Resilience primitives for calls to the generation service.
//!
//! ## Retry
//!
//! [`RetryExecutor`] wraps any fallible async operation and picks a backoff
//! per failure class. Quota exhaustion fails fast with the original error,
//! so the caller can show an actionable message instead of an apparent hang.
//!
//! ```rust,no_run
//! use artifact_guard::resilience::{RetryConfig, RetryExecutor};
//! use artifact_guard::Result;
//! use std::time::Duration;
//!
//! # async fn call_service() -> Result<String> { Ok(String::new()) }
//! # async fn run() -> Result<()> {
//! let retry = RetryExecutor::new(
//!     RetryConfig::new()
//!         .with_max_attempts(3)
//!         .with_base_delay(Duration::from_secs(1)),
//! );
//! let text: String = retry.execute(|| call_service()).await?;
//! # Ok(())
//! # }
//! ```

pub mod retry;

pub use retry::{Classify, FailureClass, OnRetry, RetryAttempt, RetryConfig, RetryExecutor};
