use std::fmt;
use thiserror::Error;
use tokio::time::Duration;

/// Main error type for the drover proxy
#[derive(Error, Debug, Clone)]
pub enum DroverError {
    /// Configuration related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Upstream transport errors (connect failure, reset, malformed response)
    #[error("Network error: {message}")]
    Network { message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}: {operation}")]
    Timeout {
        duration: Duration,
        operation: String,
    },

    /// Upstream answered with a server error status
    #[error("Upstream {target} returned status {status}")]
    UpstreamStatus { target: String, status: u16 },

    /// Admission denied by a circuit breaker
    #[error("Circuit breaker open for {target}")]
    CircuitBreakerOpen { target: String },

    /// Routing found no alive + admitted backend
    #[error("No eligible backend: {message}")]
    NoEligibleBackend { message: String },

    /// Global or per-IP quota exceeded
    #[error("Rate limit exceeded: {message}")]
    RateLimit { message: String },

    /// IO related errors
    #[error("IO error: {message}")]
    Io { message: String },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DroverError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(duration: Duration, operation: S) -> Self {
        Self::Timeout {
            duration,
            operation: operation.into(),
        }
    }

    /// Create an upstream status error
    pub fn upstream_status<S: Into<String>>(target: S, status: u16) -> Self {
        Self::UpstreamStatus {
            target: target.into(),
            status,
        }
    }

    /// Create a circuit breaker error
    pub fn circuit_breaker_open<S: Into<String>>(target: S) -> Self {
        Self::CircuitBreakerOpen {
            target: target.into(),
        }
    }

    /// Create a no-eligible-backend error
    pub fn no_eligible_backend<S: Into<String>>(message: S) -> Self {
        Self::NoEligibleBackend {
            message: message.into(),
        }
    }

    /// Create a rate limit error
    pub fn rate_limit<S: Into<String>>(message: S) -> Self {
        Self::RateLimit {
            message: message.into(),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if the error is worth retrying on a different backend
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DroverError::Network { .. }
                | DroverError::Timeout { .. }
                | DroverError::UpstreamStatus { .. }
                | DroverError::CircuitBreakerOpen { .. }
        )
    }

    /// Check if the error should be recorded as a breaker failure.
    ///
    /// `CircuitBreakerOpen` is deliberately excluded: a denied admission is an
    /// attempt failure for the retry loop but must not feed back into the same
    /// breaker as a new failure.
    pub fn should_trigger_circuit_breaker(&self) -> bool {
        matches!(
            self,
            DroverError::Network { .. }
                | DroverError::Timeout { .. }
                | DroverError::UpstreamStatus { .. }
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            DroverError::Config { .. } => ErrorSeverity::Critical,
            DroverError::NoEligibleBackend { .. } => ErrorSeverity::High,
            DroverError::Internal { .. } => ErrorSeverity::High,
            DroverError::CircuitBreakerOpen { .. } => ErrorSeverity::Medium,
            DroverError::Network { .. } => ErrorSeverity::Medium,
            DroverError::Timeout { .. } => ErrorSeverity::Medium,
            DroverError::UpstreamStatus { .. } => ErrorSeverity::Medium,
            DroverError::Io { .. } => ErrorSeverity::Medium,
            DroverError::RateLimit { .. } => ErrorSeverity::Low,
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Low => write!(f, "LOW"),
            ErrorSeverity::Medium => write!(f, "MEDIUM"),
            ErrorSeverity::High => write!(f, "HIGH"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Result type alias for drover operations
pub type DroverResult<T> = Result<T, DroverError>;

/// Convert from std::io::Error to DroverError
impl From<std::io::Error> for DroverError {
    fn from(err: std::io::Error) -> Self {
        DroverError::io(format!("IO error: {}", err))
    }
}

/// Convert from hyper::Error to DroverError
impl From<hyper::Error> for DroverError {
    fn from(err: hyper::Error) -> Self {
        if err.is_timeout() {
            DroverError::timeout(Duration::from_secs(30), "HTTP request")
        } else if err.is_connect() {
            DroverError::network(format!("Connection error: {}", err))
        } else {
            DroverError::network(format!("HTTP error: {}", err))
        }
    }
}

/// Convert from serde_json::Error to DroverError
impl From<serde_json::Error> for DroverError {
    fn from(err: serde_json::Error) -> Self {
        DroverError::config(format!("JSON error: {}", err))
    }
}

/// Convert from hyper::http::uri::InvalidUri to DroverError
impl From<hyper::http::uri::InvalidUri> for DroverError {
    fn from(err: hyper::http::uri::InvalidUri) -> Self {
        DroverError::config(format!("Invalid URI: {}", err))
    }
}

/// Convert from hyper::http::Error to DroverError
impl From<hyper::http::Error> for DroverError {
    fn from(err: hyper::http::Error) -> Self {
        DroverError::network(format!("HTTP error: {}", err))
    }
}

/// Convert from tokio::time::Elapsed to DroverError
impl From<tokio::time::error::Elapsed> for DroverError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        DroverError::timeout(Duration::from_secs(30), "operation")
    }
}
