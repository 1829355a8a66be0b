use crate::error_code::UpstreamErrorCode;
use thiserror::Error;

/// Structured error context carried by configuration, validation and upstream errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Configuration key or field that caused the error (e.g., "categories.chart.max_size")
    pub field_path: Option<String>,
    /// Additional human-readable detail
    pub details: Option<String>,
    /// Component that produced the error (e.g., "pool_config", "generator")
    pub source: Option<String>,
    /// Upstream HTTP status, when the failure came from the generation service
    pub status_code: Option<u16>,
    /// Explicit retry verdict set by the producing layer; `Some(false)` stops retries
    pub retryable: Option<bool>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }
}

/// Unified error type for the resilience and caching layer.
///
/// Cache misses are not errors; they are `None` results. Cache-internal faults
/// (corrupt entries, poisoned locks) never surface here either.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("Upstream error ({code}/{}): {message}", .code.name())]
    Upstream {
        code: UpstreamErrorCode,
        message: String,
        retry_after_ms: Option<u64>,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::configuration_with_context(msg, ErrorContext::new())
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::validation_with_context(msg, ErrorContext::new())
    }

    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Build an upstream failure. The generation collaborator is expected to
    /// populate `code` consistently so the retry classifier never has to read
    /// the message text.
    pub fn upstream(code: UpstreamErrorCode, msg: impl Into<String>) -> Self {
        Error::Upstream {
            code,
            message: msg.into(),
            retry_after_ms: None,
            context: ErrorContext::new(),
        }
    }

    /// Build an upstream failure from an HTTP status.
    pub fn from_status(status: u16, msg: impl Into<String>) -> Self {
        Error::Upstream {
            code: UpstreamErrorCode::from_http_status(status),
            message: msg.into(),
            retry_after_ms: None,
            context: ErrorContext::new().with_status_code(status),
        }
    }

    /// Attach a provider-suggested wait. Only meaningful for upstream errors.
    pub fn with_retry_after_ms(mut self, ms: u64) -> Self {
        if let Error::Upstream {
            ref mut retry_after_ms,
            ..
        } = self
        {
            *retry_after_ms = Some(ms);
        }
        self
    }

    /// Replace the context on variants that carry one.
    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        match self {
            Error::Configuration {
                ref mut context, ..
            }
            | Error::Validation {
                ref mut context, ..
            }
            | Error::Runtime {
                ref mut context, ..
            }
            | Error::Upstream {
                ref mut context, ..
            } => *context = ctx,
            _ => {}
        }
        self
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. }
            | Error::Upstream { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Upstream code, if this error came from the generation service.
    pub fn upstream_code(&self) -> Option<UpstreamErrorCode> {
        match self {
            Error::Upstream { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_quota_exhausted(&self) -> bool {
        self.upstream_code() == Some(UpstreamErrorCode::QuotaExhausted)
    }

    /// Message suitable for showing to an end user.
    ///
    /// Quota exhaustion gets one actionable sentence with a wait estimate
    /// instead of the raw provider text.
    pub fn user_message(&self) -> String {
        match self {
            Error::Upstream {
                code: UpstreamErrorCode::QuotaExhausted,
                retry_after_ms,
                ..
            } => format!(
                "The generation service quota is used up. Please wait {} before trying again.",
                describe_wait(*retry_after_ms)
            ),
            Error::Upstream {
                code: UpstreamErrorCode::RateLimited,
                ..
            } => "The generation service is busy right now. Please try again shortly.".to_string(),
            other => other.to_string(),
        }
    }
}

fn describe_wait(retry_after_ms: Option<u64>) -> String {
    match retry_after_ms {
        None => "a few minutes".to_string(),
        Some(ms) => {
            let secs = ms.div_ceil(1000);
            if secs < 60 {
                format!("about {} second{}", secs, if secs == 1 { "" } else { "s" })
            } else {
                let mins = secs.div_ceil(60);
                format!("about {} minute{}", mins, if mins == 1 { "" } else { "s" })
            }
        }
    }
}
