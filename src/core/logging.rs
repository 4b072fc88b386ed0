//! Structured logging for the dual-path health check coordinator.
//!
//! Mirrors the structured error-logging design the coordinator's ambient
//! stack is built on: an `ErrorContext` attached to every logged event, a
//! severity derived from the error kind, and metrics recorded alongside
//! every log line so operators get both a trace and a counter from one call.

use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{Level, error, info, span, warn};

use crate::core::error::HealthError;
use crate::core::metrics::global_metrics;

/// Log level for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLogLevel {
    /// Critical errors that require immediate attention.
    Critical,
    /// Errors that affect functionality but the coordinator can continue.
    Error,
    /// Warnings about retries and circuit transitions.
    Warning,
    /// Informational error context (client-side validation, cancellation).
    Info,
}

impl From<&HealthError> for ErrorLogLevel {
    fn from(error: &HealthError) -> Self {
        match error {
            HealthError::Internal(_) => ErrorLogLevel::Critical,

            HealthError::Transport(_) | HealthError::HttpServer(_) | HealthError::Auth(_) => {
                ErrorLogLevel::Error
            }

            HealthError::Timeout(_) | HealthError::McpProtocol { .. } => ErrorLogLevel::Warning,

            HealthError::HttpClient(_)
            | HealthError::Parse(_)
            | HealthError::Validation(_)
            | HealthError::Config(_)
            | HealthError::Cancelled(_) => ErrorLogLevel::Info,
        }
    }
}

/// Context attached to a logged probe/orchestration event.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Operation being performed when the event occurred (e.g. "probe_mcp").
    pub operation: String,
    /// Probe path ("mcp" or "rest") if applicable.
    pub path: Option<String>,
    /// Server name this event pertains to.
    pub server: Option<String>,
    /// Request id, if one was assigned for this attempt.
    pub request_id: Option<String>,
    /// Additional context data.
    pub extra: HashMap<String, Value>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            operation: "unknown".to_string(),
            path: None,
            server: None,
            request_id: None,
            extra: HashMap::new(),
        }
    }
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Structured error logging with metrics integration.
pub struct ErrorLogger;

impl ErrorLogger {
    /// Log an error with full context and record it in the ambient metrics.
    pub async fn log_error(error: &HealthError, context: ErrorContext) {
        let category = error.category();
        let recoverable = error.is_recoverable();
        let log_level = ErrorLogLevel::from(error);

        let metrics = global_metrics();
        metrics.record_error(error, &context.operation).await;

        let log_data = json!({
            "error_category": category,
            "error_recoverable": recoverable,
            "error_message": error.to_string(),
            "operation": context.operation,
            "path": context.path,
            "server": context.server,
            "request_id": context.request_id,
            "extra_context": context.extra,
        });

        match log_level {
            ErrorLogLevel::Critical => {
                error!(
                    target: "health_errors",
                    error_category = category,
                    error_recoverable = recoverable,
                    operation = context.operation.as_str(),
                    "Critical health check error: {} - {}",
                    error,
                    serde_json::to_string(&log_data).unwrap_or_default()
                );
            }
            ErrorLogLevel::Error => {
                error!(
                    target: "health_errors",
                    error_category = category,
                    error_recoverable = recoverable,
                    operation = context.operation.as_str(),
                    "Health check error: {} - {}",
                    error,
                    serde_json::to_string(&log_data).unwrap_or_default()
                );
            }
            ErrorLogLevel::Warning => {
                warn!(
                    target: "health_errors",
                    error_category = category,
                    error_recoverable = recoverable,
                    operation = context.operation.as_str(),
                    "Health check warning: {} - {}",
                    error,
                    serde_json::to_string(&log_data).unwrap_or_default()
                );
            }
            ErrorLogLevel::Info => {
                info!(
                    target: "health_errors",
                    error_category = category,
                    error_recoverable = recoverable,
                    operation = context.operation.as_str(),
                    "Health check info: {} - {}",
                    error,
                    serde_json::to_string(&log_data).unwrap_or_default()
                );
            }
        }
    }

    /// Log a retry attempt with context.
    pub async fn log_retry_attempt(
        error: &HealthError,
        attempt: u32,
        max_attempts: u32,
        will_retry: bool,
        context: ErrorContext,
    ) {
        let category = error.category();

        let metrics = global_metrics();
        metrics
            .record_retry_attempt(&context.operation, attempt, category, will_retry)
            .await;

        if will_retry {
            warn!(
                target: "health_retries",
                error_category = category,
                retry_attempt = attempt,
                max_attempts = max_attempts,
                operation = context.operation.as_str(),
                server = context.server.as_deref(),
                "retry {}/{} for {}: {}",
                attempt,
                max_attempts,
                context.operation,
                error
            );
        } else {
            error!(
                target: "health_retries",
                error_category = category,
                retry_attempt = attempt,
                max_attempts = max_attempts,
                operation = context.operation.as_str(),
                server = context.server.as_deref(),
                "retries exhausted for {}: {}",
                context.operation,
                error
            );
        }
    }

    /// Log a circuit breaker state transition.
    pub fn log_circuit_transition(server: &str, path: &str, from: &str, to: &str) {
        warn!(
            target: "health_circuit",
            server = server,
            path = path,
            from_state = from,
            to_state = to,
            "circuit breaker transition"
        );
    }

    /// Create a logging span for a probe cycle.
    pub fn create_operation_span(operation: &str, context: &ErrorContext) -> tracing::Span {
        span!(
            Level::INFO,
            "health_operation",
            operation = operation,
            path = context.path.as_deref(),
            server = context.server.as_deref(),
            request_id = context.request_id.as_deref(),
        )
    }
}

impl HealthError {
    /// Log this error with structured context.
    pub async fn log_with_context(&self, context: ErrorContext) {
        ErrorLogger::log_error(self, context).await;
    }

    /// Log this error with basic context.
    pub async fn log_error(&self, operation: &str) {
        let context = ErrorContext::new(operation);
        ErrorLogger::log_error(self, context).await;
    }
}
