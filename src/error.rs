use crate::error_code::ErrorKind;
use std::time::Duration;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "request.query", "cache.max_entries")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_loader", "request_validator")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
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
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the gateway.
///
/// Errors are `Clone` so that a single upstream failure can be handed to every
/// caller waiting on the same coalesced request.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Rate limited: retry after {:.3}s", .retry_after.as_secs_f64())]
    RateLimited { retry_after: Duration },

    #[error("Upstream unavailable: {message}")]
    UpstreamUnavailable { message: String },

    #[error("Upstream timed out after {}ms", .timeout.as_millis())]
    UpstreamTimeout { timeout: Duration },

    #[error("Upstream rate limited{}", format_retry_after(.retry_after))]
    UpstreamRateLimited { retry_after: Option<Duration> },

    #[error("Upstream rejected request: HTTP {status}: {message}")]
    UpstreamRejected { status: u16, message: String },

    #[error("Response parse error: {detail}")]
    ResponseParse { detail: String },

    #[error("Internal coalescing error: {message}")]
    InternalCoalescing { message: String },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Storage error: {message}{}", format_context(.context))]
    Storage {
        message: String,
        context: ErrorContext,
    },
}

fn format_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}ms)", d.as_millis()),
        None => String::new(),
    }
}

// Helper function to format error context for display
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
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Error::UpstreamUnavailable {
            message: msg.into(),
        }
    }

    pub fn parse(detail: impl Into<String>) -> Self {
        Error::ResponseParse {
            detail: detail.into(),
        }
    }

    pub fn coalescing(msg: impl Into<String>) -> Self {
        Error::InternalCoalescing {
            message: msg.into(),
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Create a new storage error with structured context
    pub fn storage_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Storage {
            message: msg.into(),
            context,
        }
    }

    /// Machine-readable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            Error::UpstreamTimeout { .. } => ErrorKind::UpstreamTimeout,
            Error::UpstreamRateLimited { .. } => ErrorKind::UpstreamRateLimited,
            Error::UpstreamRejected { .. } => ErrorKind::UpstreamRejected,
            Error::ResponseParse { .. } => ErrorKind::ResponseParse,
            Error::InternalCoalescing { .. } => ErrorKind::InternalCoalescing,
            Error::Validation { .. } => ErrorKind::InvalidRequest,
            Error::Configuration { .. } => ErrorKind::Configuration,
            Error::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// Retry hint carried by rate-limit errors, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after } => Some(*retry_after),
            Error::UpstreamRateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Validation { context, .. }
            | Error::Configuration { context, .. }
            | Error::Storage { context, .. } => Some(context),
            _ => None,
        }
    }
}
