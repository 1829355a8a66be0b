//! Retry with failure classification.
//!
//! Each failed attempt is classified before deciding what to do next:
//!
//! | Class            | Action                                   |
//! |------------------|------------------------------------------|
//! | `QuotaExhausted` | re-raise immediately, no sleep           |
//! | `Fatal`          | re-raise immediately, no sleep           |
//! | `RateLimited`    | retry after `base * 2^(attempt + 1)`     |
//! | `Transient`      | retry after `base * (attempt + 1)`       |
//!
//! `attempt` is the zero-based index of the attempt that just failed. The last
//! allowed attempt always re-raises, whatever its class.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tracing::{info, warn};

use crate::error_code::UpstreamErrorCode;
use crate::Error;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// The caller's allotment is used up; retrying cannot succeed until the window resets.
    QuotaExhausted,
    /// Throttled, not exhausted.
    RateLimited,
    /// Anything else that may succeed on a later attempt.
    Transient,
    /// Explicitly flagged as not retryable by the layer that produced it.
    Fatal,
}

impl FailureClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuotaExhausted => "quota_exhausted",
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
        }
    }
}

/// Errors that can tell the executor how to treat them.
pub trait Classify {
    fn failure_class(&self) -> FailureClass;
}

impl Classify for Error {
    fn failure_class(&self) -> FailureClass {
        if self.is_quota_exhausted() {
            return FailureClass::QuotaExhausted;
        }
        if let Some(false) = self.context().and_then(|c| c.retryable) {
            return FailureClass::Fatal;
        }
        match self {
            Error::Upstream {
                code: UpstreamErrorCode::RateLimited,
                ..
            } => FailureClass::RateLimited,
            _ => FailureClass::Transient,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }
}

/// Passed to the `on_retry` callback before each sleep.
#[derive(Debug)]
pub struct RetryAttempt<'a, E> {
    /// One-based number of the attempt that failed.
    pub attempt_number: u32,
    pub error: &'a E,
    pub class: FailureClass,
    pub planned_delay: Duration,
}

/// Progress callback. Returning `Err` (or panicking) is logged and ignored.
pub type OnRetry<'a, E> =
    dyn FnMut(&RetryAttempt<'_, E>) -> std::result::Result<(), String> + Send + 'a;

#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Backoff before the attempt following failed attempt `attempt` (zero-based).
    pub fn delay_for(&self, class: FailureClass, attempt: u32) -> Duration {
        let base = self.config.base_delay;
        match class {
            FailureClass::RateLimited => {
                let factor = 1u32.checked_shl(attempt.saturating_add(1)).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
            FailureClass::Transient => base.saturating_mul(attempt.saturating_add(1)),
            FailureClass::QuotaExhausted | FailureClass::Fatal => Duration::ZERO,
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable class, or
    /// runs out of attempts. The most recent error is returned unchanged.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        self.execute_with(operation, None).await
    }

    pub async fn execute_with<T, E, F, Fut>(
        &self,
        mut operation: F,
        mut on_retry: Option<&mut OnRetry<'_, E>>,
    ) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0u32;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let class = err.failure_class();
            let attempt_number = attempt + 1;
            if !class.is_retryable() {
                warn!(
                    attempt = attempt_number,
                    failure_class = class.as_str(),
                    error = %err,
                    "not retrying"
                );
                return Err(err);
            }
            if attempt_number >= max_attempts {
                warn!(
                    attempts = attempt_number,
                    failure_class = class.as_str(),
                    error = %err,
                    "retries exhausted"
                );
                return Err(err);
            }

            let delay = self.delay_for(class, attempt);
            info!(
                attempt = attempt_number,
                max_attempts,
                failure_class = class.as_str(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after failure"
            );
            if let Some(callback) = on_retry.as_deref_mut() {
                notify(
                    callback,
                    &RetryAttempt {
                        attempt_number,
                        error: &err,
                        class,
                        planned_delay: delay,
                    },
                );
            }

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn notify<E>(callback: &mut OnRetry<'_, E>, attempt: &RetryAttempt<'_, E>) {
    match catch_unwind(AssertUnwindSafe(|| callback(attempt))) {
        Ok(Ok(())) => {}
        Ok(Err(message)) => {
            warn!(attempt = attempt.attempt_number, error = %message, "on_retry callback failed");
        }
        Err(_) => {
            warn!(attempt = attempt.attempt_number, "on_retry callback panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorContext;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn executor() -> RetryExecutor {
        RetryExecutor::new(
            RetryConfig::new()
                .with_max_attempts(3)
                .with_base_delay(Duration::from_millis(1)),
        )
    }

    #[test]
    fn test_delay_schedule() {
        let ex = RetryExecutor::new(RetryConfig::new().with_base_delay(Duration::from_secs(1)));
        assert_eq!(ex.delay_for(FailureClass::Transient, 0), Duration::from_secs(1));
        assert_eq!(ex.delay_for(FailureClass::Transient, 1), Duration::from_secs(2));
        assert_eq!(ex.delay_for(FailureClass::RateLimited, 0), Duration::from_secs(2));
        assert_eq!(ex.delay_for(FailureClass::RateLimited, 1), Duration::from_secs(4));
        assert_eq!(ex.delay_for(FailureClass::RateLimited, 2), Duration::from_secs(8));
        assert_eq!(ex.delay_for(FailureClass::QuotaExhausted, 0), Duration::ZERO);
    }

    #[test]
    fn test_delay_saturates() {
        let ex = executor();
        let d = ex.delay_for(FailureClass::RateLimited, 64);
        assert_eq!(d, Duration::from_millis(1).saturating_mul(u32::MAX));
    }

    #[test]
    fn test_classification() {
        let quota = Error::upstream(UpstreamErrorCode::QuotaExhausted, "used up");
        let throttled = Error::from_status(429, "slow down");
        let server = Error::from_status(500, "boom");
        let flagged = Error::from_status(500, "bad schema")
            .with_context(ErrorContext::new().with_retryable(false));
        assert_eq!(quota.failure_class(), FailureClass::QuotaExhausted);
        assert_eq!(throttled.failure_class(), FailureClass::RateLimited);
        assert_eq!(server.failure_class(), FailureClass::Transient);
        assert_eq!(flagged.failure_class(), FailureClass::Fatal);
        assert_eq!(
            Error::validation("output did not match schema").failure_class(),
            FailureClass::Transient
        );
        let auth = Error::from_status(401, "bad key");
        assert!(!UpstreamErrorCode::Authentication.retryable());
        assert_eq!(auth.failure_class(), FailureClass::Transient);
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<&str, Error> = executor()
            .execute(move || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::from_status(503, "busy"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_quota_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let mut retries = 0;
        let mut on_retry = |_: &RetryAttempt<'_, Error>| {
            retries += 1;
            Ok(())
        };
        let result: Result<(), Error> = executor()
            .execute_with(
                move || {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Err(Error::upstream(UpstreamErrorCode::QuotaExhausted, "quota"))
                    }
                },
                Some(&mut on_retry),
            )
            .await;
        assert!(result.unwrap_err().is_quota_exhausted());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(retries, 0);
    }

    #[tokio::test]
    async fn test_callback_failures_do_not_abort() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let mut seen = 0;
        let mut on_retry = |a: &RetryAttempt<'_, Error>| {
            seen += 1;
            if a.attempt_number == 1 {
                panic!("progress sink exploded");
            }
            Err("progress sink unavailable".to_string())
        };
        let result: Result<(), Error> = executor()
            .execute_with(
                move || {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Err(Error::from_status(500, "boom"))
                    }
                },
                Some(&mut on_retry),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), Error> = executor()
            .execute(move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(Error::validation("model output did not match schema"))
                }
            })
            .await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let ex = RetryExecutor::new(RetryConfig::new().with_max_attempts(0));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), Error> = ex
            .execute(move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(Error::from_status(500, "boom"))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
