//! Error types surfaced by the transport and stored in request state.
//!
//! Every failure a caller can observe is an [`ApiError`]. The transport maps
//! whatever went wrong into exactly one [`ApiErrorKind`], so consumers never
//! see an unrecognized error shape.

use serde::Serialize;
use thiserror::Error;

/// Status code carried by timeout errors.
pub const TIMEOUT_STATUS: u16 = 408;

/// Classification of an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    /// The call did not settle within the configured timeout
    Timeout,
    /// The underlying transport could not complete the call
    Network,
    /// The server answered with a non-2xx status
    Http,
    /// A 2xx response whose body could not be read as JSON or text
    InvalidResponse,
    /// Anything else
    Unknown,
}

impl ApiErrorKind {
    /// Stable label, used for metrics and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Http => "http",
            Self::InvalidResponse => "invalid_response",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error returned by the transport.
///
/// # Examples
///
/// ```
/// use observable_request_core::error::{ApiError, ApiErrorKind};
///
/// let err = ApiError::timeout();
/// assert_eq!(err.kind, ApiErrorKind::Timeout);
/// assert_eq!(err.status, Some(408));
/// assert_eq!(err.to_string(), "Request timeout");
/// ```
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{message}")]
pub struct ApiError {
    /// Error classification
    pub kind: ApiErrorKind,
    /// Human readable message
    pub message: String,
    /// HTTP status, when one is known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Application error code from the response body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Extra details from the response body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create an error of the given kind with no status, code or details.
    #[must_use]
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            code: None,
            details: None,
        }
    }

    /// The call was aborted by the transport timer.
    #[must_use]
    pub fn timeout() -> Self {
        Self::new(ApiErrorKind::Timeout, "Request timeout").with_status(TIMEOUT_STATUS)
    }

    /// The underlying transport failed (DNS, connection refused, reset).
    #[must_use]
    pub fn network(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(ApiErrorKind::Network, format!("Network error: {reason}"))
    }

    /// A non-2xx response with the generic `HTTP Error: <status>` message.
    #[must_use]
    pub fn http(status: u16) -> Self {
        Self::new(ApiErrorKind::Http, format!("HTTP Error: {status}")).with_status(status)
    }

    /// A 2xx response whose body could not be read.
    #[must_use]
    pub fn invalid_response(status: u16) -> Self {
        Self::new(ApiErrorKind::InvalidResponse, "Invalid response").with_status(status)
    }

    /// Catch-all for failures that match no other kind.
    #[must_use]
    pub fn unknown() -> Self {
        Self::new(ApiErrorKind::Unknown, "Unknown error occurred")
    }

    /// Builder: Set status
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Builder: Set application error code
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Builder: Set details
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Builder: Replace the message
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Check if the call timed out
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ApiErrorKind::Timeout)
    }

    /// Check if the transport failed before a response arrived
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self.kind, ApiErrorKind::Network)
    }

    /// Check if the server answered with a non-2xx status
    #[must_use]
    pub const fn is_http(&self) -> bool {
        matches!(self.kind, ApiErrorKind::Http)
    }
}

/// Failure reported by a [`Fetch`](crate::transport::Fetch) implementation.
///
/// Timeouts are not part of this type: the transport owns the timer and
/// cancels the fetch future itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection-level failure (DNS, refused, reset, TLS)
    #[error("Network failure: {0}")]
    Network(String),

    /// Any other failure inside the fetch implementation
    #[error("Fetch failed: {0}")]
    Other(String),
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Network(reason) => Self::network(reason),
            FetchError::Other(reason) => {
                Self::unknown().with_details(serde_json::Value::String(reason))
            },
        }
    }
}
