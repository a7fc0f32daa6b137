//! Error taxonomy for the A2UI content-generator adapter.

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// The exception taxonomy consumed by the retry policy, circuit breaker,
/// and handler. Each variant is self-describing about whether it should
/// be retried and what upstream status code (if any) produced it.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport failure (connection reset, DNS failure, etc).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Deadline exceeded waiting for a response or for stream activity.
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Server throttling (HTTP 429). Carries the parsed `retry-after` delay.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimit {
        retry_after: Option<std::time::Duration>,
    },

    /// Upstream fault (5xx).
    #[error("server error (status {status_code})")]
    Server { status_code: u16 },

    /// Bad or missing credentials (401/403).
    #[error("authentication failed (status {status_code})")]
    Authentication { status_code: u16 },

    /// Malformed request (400/422).
    #[error("validation error (status {status_code}): {message}")]
    Validation { status_code: u16, message: String },

    /// Protocol violation mid-stream: malformed server event, JSON that
    /// never closes, or a message whose shape does not match its tool name.
    #[error("stream protocol error: {0}")]
    Stream(String),

    /// Local refusal because the circuit breaker is open.
    #[error("circuit breaker open, recovery at {recovery_time:?}")]
    CircuitBreakerOpen { recovery_time: std::time::Duration },

    /// Another request is already in flight on this facade.
    #[error("a request is already in progress")]
    RequestAlreadyInProgress,

    /// JSON (de)serialization error outside the stream's tolerant parsing path.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration detected at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether the retry policy should consider this error retryable,
    /// per the exception taxonomy table.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Timeout(_) => true,
            Error::RateLimit { .. } => true,
            Error::Server { .. } => true,
            Error::CircuitBreakerOpen { .. } => true,
            Error::Authentication { .. } => false,
            Error::Validation { .. } => false,
            Error::Stream(_) => false,
            Error::RequestAlreadyInProgress => false,
            Error::Json(_) => false,
            Error::Config(_) => false,
        }
    }

    /// The HTTP status code associated with this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::RateLimit { .. } => Some(429),
            Error::Server { status_code } => Some(*status_code),
            Error::Authentication { status_code } => Some(*status_code),
            Error::Validation { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    pub fn server(status_code: u16) -> Self {
        Error::Server { status_code }
    }

    pub fn authentication(status_code: u16) -> Self {
        Error::Authentication { status_code }
    }

    pub fn validation(status_code: u16, message: impl Into<String>) -> Self {
        Error::Validation {
            status_code,
            message: message.into(),
        }
    }

    pub fn rate_limit(retry_after: Option<std::time::Duration>) -> Self {
        Error::RateLimit { retry_after }
    }

    pub fn circuit_breaker_open(recovery_time: std::time::Duration) -> Self {
        Error::CircuitBreakerOpen { recovery_time }
    }

    pub fn timeout(d: std::time::Duration) -> Self {
        Error::Timeout(d)
    }

    /// Classify a raw HTTP status code into the taxonomy, used by the
    /// handler when it receives a non-2xx response.
    pub fn from_status(status_code: u16, retry_after: Option<std::time::Duration>) -> Self {
        match status_code {
            429 => Error::rate_limit(retry_after),
            401 | 403 => Error::authentication(status_code),
            400 | 422 => Error::validation(status_code, "request rejected by upstream"),
            500..=599 => Error::server(status_code),
            _ => Error::Stream(format!("unexpected status code {status_code}")),
        }
    }
}

/// Wraps a terminal error for delivery on the facade's error stream,
/// per §3's `ContentGeneratorError`.
#[derive(Debug, Clone)]
pub struct ContentGeneratorError {
    pub error: String,
    pub stack_trace: Option<String>,
}

impl ContentGeneratorError {
    pub fn new(error: &Error) -> Self {
        ContentGeneratorError {
            error: error.to_string(),
            stack_trace: None,
        }
    }
}
