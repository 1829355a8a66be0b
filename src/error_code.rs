//! Typed failure codes for the upstream generation service.
//!
//! The layer that talks to the generation service maps provider responses onto
//! one of these codes. The retry executor reads `QuotaExhausted` and `RateLimited`
//! from the code and the explicit `retryable` flag from
//! [`ErrorContext`](crate::ErrorContext), never the message text. Every other
//! code is retried with linear backoff.
//!
//! | Category    | Codes                                                   |
//! |-------------|---------------------------------------------------------|
//! | `client`    | `invalid_request`, `authentication`, `request_too_large` |
//! | `rate`      | `rate_limited`, `quota_exhausted`                       |
//! | `server`    | `server_error`, `overloaded`, `timeout`                 |
//! | `operational` | `cancelled`                                           |
//! | `unknown`   | `unknown`                                               |
//!
//! ```rust
//! use artifact_guard::error_code::UpstreamErrorCode;
//!
//! let code = UpstreamErrorCode::from_provider_code("insufficient_quota").unwrap();
//! assert_eq!(code, UpstreamErrorCode::QuotaExhausted);
//! assert!(!code.retryable());
//! assert_eq!(code.category(), "rate");
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamErrorCode {
    /// Malformed prompt or schema rejected by the service
    InvalidRequest,
    /// Missing or invalid credentials
    Authentication,
    /// Document plus prompt exceeds the model context window
    RequestTooLarge,
    /// Short-term throttling; the window will open again soon
    RateLimited,
    /// The caller's allotment for the current window is fully consumed
    QuotaExhausted,
    /// Internal failure on the service side
    ServerError,
    /// Service temporarily overloaded
    Overloaded,
    /// No response before the deadline
    Timeout,
    /// Request cancelled by the caller
    Cancelled,
    /// Could not be classified
    Unknown,
}

impl UpstreamErrorCode {
    /// Short code string (e.g., `"U2002"`) used in logs.
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "U1001",
            Self::Authentication => "U1002",
            Self::RequestTooLarge => "U1003",
            Self::RateLimited => "U2001",
            Self::QuotaExhausted => "U2002",
            Self::ServerError => "U3001",
            Self::Overloaded => "U3002",
            Self::Timeout => "U3003",
            Self::Cancelled => "U4001",
            Self::Unknown => "U9999",
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::Authentication => "authentication",
            Self::RequestTooLarge => "request_too_large",
            Self::RateLimited => "rate_limited",
            Self::QuotaExhausted => "quota_exhausted",
            Self::ServerError => "server_error",
            Self::Overloaded => "overloaded",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the service itself considers this failure worth repeating.
    ///
    /// Informational, for producers deciding whether to set
    /// `ErrorContext::with_retryable(false)`. The retry executor does not consult it.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError | Self::Overloaded | Self::Timeout | Self::Unknown
        )
    }

    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidRequest | Self::Authentication | Self::RequestTooLarge => "client",
            Self::RateLimited | Self::QuotaExhausted => "rate",
            Self::ServerError | Self::Overloaded | Self::Timeout => "server",
            Self::Cancelled => "operational",
            Self::Unknown => "unknown",
        }
    }

    /// Maps a provider error code/type string onto a code.
    ///
    /// Accepts the canonical names plus common provider spellings
    /// (`"insufficient_quota"`, `"rate_limit_exceeded"`, `"overloaded_error"`, ...).
    pub fn from_provider_code(provider_code: &str) -> Option<Self> {
        let normalized = provider_code.trim().to_ascii_lowercase();
        let code = match normalized.as_str() {
            "invalid_request" | "invalid_request_error" | "invalid_argument" => {
                Self::InvalidRequest
            }
            "authentication" | "authentication_error" | "invalid_api_key" | "unauthenticated" => {
                Self::Authentication
            }
            "request_too_large" | "context_length_exceeded" => Self::RequestTooLarge,
            "rate_limited" | "rate_limit_exceeded" | "rate_limit_error" => Self::RateLimited,
            "quota_exhausted" | "insufficient_quota" | "billing_hard_limit_reached" => {
                Self::QuotaExhausted
            }
            "server_error" | "internal" | "api_error" => Self::ServerError,
            "overloaded" | "overloaded_error" | "unavailable" => Self::Overloaded,
            "timeout" | "deadline_exceeded" => Self::Timeout,
            "cancelled" => Self::Cancelled,
            _ => return None,
        };
        Some(code)
    }

    /// Maps an HTTP status to the most likely code.
    ///
    /// 429 maps to `RateLimited`; only a provider code can tell quota
    /// exhaustion apart from throttling.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => Self::InvalidRequest,
            401 | 403 => Self::Authentication,
            408 | 504 => Self::Timeout,
            413 => Self::RequestTooLarge,
            429 => Self::RateLimited,
            499 => Self::Cancelled,
            500 | 502 => Self::ServerError,
            503 | 529 => Self::Overloaded,
            _ => Self::Unknown,
        }
    }

    /// Resolve a code from both signals, preferring the provider code.
    pub fn resolve(status: Option<u16>, provider_code: Option<&str>) -> Self {
        provider_code
            .and_then(Self::from_provider_code)
            .or_else(|| status.map(Self::from_http_status))
            .unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for UpstreamErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
