//! Error taxonomy for the dual-path health check coordinator.
//!
//! Probe clients classify every failure into one of these kinds at the
//! boundary (never propagate a bare panic or exception out of a probe), the
//! orchestrator reads `is_recoverable` to drive retries, and the registry
//! reads `category` to bucket error counts for operators.

use thiserror::Error;

/// The error taxonomy shared by every component.
#[derive(Error, Debug, Clone)]
pub enum HealthError {
    /// DNS, TCP, TLS, connection reset, or other transport-layer failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Deadline exceeded waiting on I/O.
    #[error("timeout: {0}")]
    Timeout(String),

    /// HTTP 5xx or 429 response.
    #[error("server error: {0}")]
    HttpServer(String),

    /// HTTP 4xx response other than 429.
    #[error("client error: {0}")]
    HttpClient(String),

    /// Credential refresh failure, or a 401/403 from the probed server.
    #[error("auth error: {0}")]
    Auth(String),

    /// Malformed JSON body.
    #[error("parse error: {0}")]
    Parse(String),

    /// Schema, envelope, missing-tool, or status-value validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// An `error` object present in a JSON-RPC response.
    #[error("MCP protocol error {code}: {message}")]
    McpProtocol { code: i32, message: String },

    /// The cycle was cancelled externally; never recorded to the registry.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Invalid configuration rejected at the validation boundary.
    #[error("config error: {0}")]
    Config(String),

    /// Internal invariant violation; should not normally occur.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias used throughout the crate.
pub type HealthResult<T> = Result<T, HealthError>;

impl HealthError {
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout(message.into())
    }

    pub fn http_server<S: Into<String>>(message: S) -> Self {
        Self::HttpServer(message.into())
    }

    pub fn http_client<S: Into<String>>(message: S) -> Self {
        Self::HttpClient(message.into())
    }

    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Auth(message.into())
    }

    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse(message.into())
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Classify an HTTP status code into the taxonomy (spec §7).
    pub fn from_status(status: u16, body_snippet: impl Into<String>) -> Self {
        let body = body_snippet.into();
        if status == 429 || (500..600).contains(&status) {
            Self::HttpServer(format!("HTTP {status}: {body}"))
        } else {
            Self::HttpClient(format!("HTTP {status}: {body}"))
        }
    }

    /// Whether the orchestrator's retry policy should retry this error
    /// (spec §4.3 step 4 / §7 table).
    pub fn is_recoverable(&self) -> bool {
        match self {
            HealthError::Transport(_) => true,
            HealthError::Timeout(_) => true,
            HealthError::HttpServer(_) => true,
            HealthError::HttpClient(_) => false,
            HealthError::Auth(_) => false,
            HealthError::Parse(_) => true,
            HealthError::Validation(_) => false,
            HealthError::McpProtocol { .. } => false,
            HealthError::Cancelled(_) => false,
            HealthError::Config(_) => false,
            HealthError::Internal(_) => false,
        }
    }

    /// Whether a circuit breaker sub-breaker should count this as a failure.
    /// Every kind except `Cancelled` counts (spec §7 table, "Circuit impact").
    pub fn counts_as_circuit_failure(&self) -> bool {
        !matches!(self, HealthError::Cancelled(_))
    }

    /// Stable bucket name for metrics and the read API's error counts.
    pub fn category(&self) -> &'static str {
        match self {
            HealthError::Transport(_) => "transport",
            HealthError::Timeout(_) => "timeout",
            HealthError::HttpServer(_) => "http_server",
            HealthError::HttpClient(_) => "http_client",
            HealthError::Auth(_) => "auth",
            HealthError::Parse(_) => "parse",
            HealthError::Validation(_) => "validation",
            HealthError::McpProtocol { .. } => "mcp_protocol",
            HealthError::Cancelled(_) => "cancelled",
            HealthError::Config(_) => "config",
            HealthError::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for HealthError {
    fn from(err: serde_json::Error) -> Self {
        HealthError::Parse(err.to_string())
    }
}

impl From<url::ParseError> for HealthError {
    fn from(err: url::ParseError) -> Self {
        HealthError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for HealthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HealthError::Timeout(err.to_string())
        } else if err.is_connect() {
            HealthError::Transport(err.to_string())
        } else if let Some(status) = err.status() {
            HealthError::from_status(status.as_u16(), err.to_string())
        } else {
            HealthError::Transport(err.to_string())
        }
    }
}
