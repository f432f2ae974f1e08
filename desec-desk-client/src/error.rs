//! Wire-level error and rate-limit types.
//!
//! A 429 response is deliberately *not* an [`ApiError`] variant: the queue
//! treats it as scheduling input, so classification surfaces it as the
//! dedicated [`RateLimit`] value instead.

use serde::{Deserialize, Serialize};

/// Unified error type for deSEC API operations.
///
/// Every variant is serializable so queue history and frontends can report
/// errors in a structured form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "code")]
pub enum ApiError {
    /// A network-level error occurred (DNS resolution failure, connection
    /// refused, etc.).
    NetworkError {
        /// Error details.
        detail: String,
    },

    /// The HTTP request timed out.
    ///
    /// Timeouts are not retried automatically; only rate limits are.
    Timeout {
        /// Error details.
        detail: String,
    },

    /// The API token was rejected (HTTP 401). The caller should prompt for a
    /// new token and drop the current one from memory.
    Unauthenticated,

    /// The operation is not permitted (HTTP 403): a server-managed record
    /// type, or a token lacking the required permission.
    Forbidden {
        /// Human-readable reason from the server.
        message: String,
    },

    /// Any other 4xx response. `message` carries the parsed server message
    /// (`non_field_errors[0]` when present) verbatim.
    ClientError {
        /// HTTP status code.
        status: u16,
        /// Parsed server message.
        message: String,
        /// Parsed response body, if it was JSON.
        raw: Option<serde_json::Value>,
    },

    /// A 5xx response. Transient; may be retried manually.
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Server message or body text.
        message: String,
    },

    /// The response body could not be parsed.
    ParseError {
        /// Details about the parse failure.
        detail: String,
    },
}

impl ApiError {
    /// Whether this error is expected behaviour (user input, permissions)
    /// rather than a fault. Expected errors are logged at `warn`, the rest
    /// at `error`. Keep this method updated when adding new variants.
    #[must_use]
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated | Self::Forbidden { .. } | Self::ClientError { .. }
        )
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NetworkError { detail } => write!(f, "Network error: {detail}"),
            Self::Timeout { detail } => write!(f, "Request timeout: {detail}"),
            Self::Unauthenticated => write!(f, "Authentication failed: token rejected"),
            Self::Forbidden { message } => write!(f, "Forbidden: {message}"),
            Self::ClientError { message, .. } => write!(f, "{message}"),
            Self::ServerError { status, message } => {
                write!(f, "Server error {status}: {message}")
            }
            Self::ParseError { detail } => write!(f, "Parse error: {detail}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// Convenience alias for `Result<T, ApiError>`.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Structured form of an HTTP 429 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimit {
    /// Seconds to wait before retrying, from the `Retry-After` header or the
    /// response body; defaults to [`DEFAULT_RETRY_AFTER`].
    pub retry_after: f64,
    /// Human-readable message from the server.
    pub message: String,
    /// Parsed response body, if it was JSON.
    pub raw: Option<serde_json::Value>,
}

/// Fallback wait time when a 429 response carries no `Retry-After` hint.
pub const DEFAULT_RETRY_AFTER: f64 = 30.0;
