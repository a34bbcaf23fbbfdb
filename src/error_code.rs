//! Machine-readable error kinds.
//!
//! Every [`crate::Error`] maps onto exactly one [`ErrorKind`]. The kind carries a
//! stable code string and name that HTTP callers can branch on without parsing
//! human-readable messages.
//!
//! ## Error Code Categories
//!
//! | Prefix | Category | Description                               |
//! |--------|----------|-------------------------------------------|
//! | E1xxx  | client   | Caller-side problems (validation, quota)  |
//! | E2xxx  | rate     | Upstream rate limiting                    |
//! | E3xxx  | upstream | Upstream transport and contract failures  |
//! | E9xxx  | internal | Gateway configuration and broken invariants |
//!
//! ## Example
//!
//! ```rust
//! use agent_gateway::error_code::ErrorKind;
//!
//! let kind = ErrorKind::UpstreamTimeout;
//! assert_eq!(kind.code(), "E3002");
//! assert!(kind.retryable());
//! assert_eq!(kind.category(), "upstream");
//! ```

use std::fmt;

/// Canonical gateway error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// E1001: Request failed validation before reaching any backend
    InvalidRequest,
    /// E1002: Caller exceeded its token bucket
    RateLimited,
    /// E2001: Upstream signalled throttling
    UpstreamRateLimited,
    /// E3001: Upstream unreachable or returned a server error
    UpstreamUnavailable,
    /// E3002: Upstream did not answer within the invocation timeout
    UpstreamTimeout,
    /// E3003: Upstream refused the request (non-throttling 4xx)
    UpstreamRejected,
    /// E3004: Upstream payload did not match the expected envelope
    ResponseParse,
    /// E9001: Gateway misconfiguration
    Configuration,
    /// E9002: Cache or bucket storage failure
    Storage,
    /// E9003: Coalescing invariant violated
    InternalCoalescing,
}

impl ErrorKind {
    /// Returns the canonical code string (e.g., `"E1002"`).
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "E1001",
            Self::RateLimited => "E1002",
            Self::UpstreamRateLimited => "E2001",
            Self::UpstreamUnavailable => "E3001",
            Self::UpstreamTimeout => "E3002",
            Self::UpstreamRejected => "E3003",
            Self::ResponseParse => "E3004",
            Self::Configuration => "E9001",
            Self::Storage => "E9002",
            Self::InternalCoalescing => "E9003",
        }
    }

    /// Returns the snake_case name used in API error bodies.
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::RateLimited => "rate_limited",
            Self::UpstreamRateLimited => "upstream_rate_limited",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::UpstreamTimeout => "upstream_timeout",
            Self::UpstreamRejected => "upstream_rejected",
            Self::ResponseParse => "response_parse_error",
            Self::Configuration => "configuration",
            Self::Storage => "storage",
            Self::InternalCoalescing => "internal_coalescing_error",
        }
    }

    /// Whether the gateway's retry policy may re-invoke the upstream.
    ///
    /// `RateLimited` is the caller's own budget and is never retried by the
    /// gateway; the caller decides using the `retry_after` hint.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamRateLimited | Self::UpstreamUnavailable | Self::UpstreamTimeout
        )
    }

    /// Returns the category: `"client"`, `"rate"`, `"upstream"` or `"internal"`.
    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidRequest | Self::RateLimited => "client",
            Self::UpstreamRateLimited => "rate",
            Self::UpstreamUnavailable
            | Self::UpstreamTimeout
            | Self::UpstreamRejected
            | Self::ResponseParse => "upstream",
            Self::Configuration | Self::Storage | Self::InternalCoalescing => "internal",
        }
    }

    /// Maps an upstream HTTP status to the kind the invokers report.
    ///
    /// Returns `None` for success statuses.
    pub fn from_http_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            408 | 504 => Some(Self::UpstreamTimeout),
            429 => Some(Self::UpstreamRateLimited),
            400..=499 => Some(Self::UpstreamRejected),
            _ => Some(Self::UpstreamUnavailable),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
