//! Core cross-cutting types: errors, structured logging, ambient metrics.

pub mod backoff;
pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{HealthError, HealthResult};
pub use logging::ErrorContext;
