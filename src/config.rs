//! Configuration document and global sections (spec §6 "Configuration
//! format"; SPEC_FULL.md A.3).
//!
//! The document is a keyed `serde` structure round-tripped through
//! `serde_yaml`. Loading the file from disk and watching it for reload
//! signals is out of scope (spec §1); this module provides the shape and
//! the validation function a caller must run before publishing a reload.

use serde::{Deserialize, Serialize};

use crate::core::error::{HealthError, HealthResult};
use crate::model::ServerConfig;

/// Aggregation mode selectable per spec §4.3 "Alternative calculation modes".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    WeightedAverage,
    Minimum,
    Maximum,
}

impl Default for AggregationMode {
    fn default() -> Self {
        AggregationMode::WeightedAverage
    }
}

/// Global aggregation thresholds (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
    #[serde(default = "default_degraded_threshold")]
    pub degraded_threshold: f64,
    #[serde(default)]
    pub mode: AggregationMode,
}

fn default_failure_threshold() -> f64 {
    0.5
}

fn default_degraded_threshold() -> f64 {
    0.7
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            degraded_threshold: default_degraded_threshold(),
            mode: AggregationMode::default(),
        }
    }
}

impl AggregationConfig {
    pub fn validate(&self) -> HealthResult<()> {
        if !(0.0..=1.0).contains(&self.failure_threshold)
            || !(0.0..=1.0).contains(&self.degraded_threshold)
        {
            return Err(HealthError::config("thresholds must be in [0,1]"));
        }
        if self.failure_threshold > self.degraded_threshold {
            return Err(HealthError::config(
                "failure_threshold must be <= degraded_threshold",
            ));
        }
        Ok(())
    }
}

/// Global circuit breaker defaults (spec §4.4), applied to every server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_count_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_open_duration_secs")]
    pub open_duration_secs: u64,
}

fn default_failure_count_threshold() -> u32 {
    5
}

fn default_open_duration_secs() -> u64 {
    30
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_count_threshold(),
            open_duration_secs: default_open_duration_secs(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> HealthResult<()> {
        if self.failure_threshold == 0 {
            return Err(HealthError::config("failure_threshold must be >= 1"));
        }
        if self.open_duration_secs == 0 {
            return Err(HealthError::config("open_duration_secs must be >= 1"));
        }
        Ok(())
    }
}

/// Global scheduler / bounded-concurrency config (spec §4.3 "Bounded
/// concurrency", §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_concurrent_servers")]
    pub max_concurrent_servers: usize,
    #[serde(default = "default_max_concurrent_probes_per_server")]
    pub max_concurrent_probes_per_server: usize,
    #[serde(default = "default_cycle_grace_ms")]
    pub cycle_grace_ms: u64,
}

fn default_max_concurrent_servers() -> usize {
    10
}

fn default_max_concurrent_probes_per_server() -> usize {
    2
}

fn default_cycle_grace_ms() -> u64 {
    500
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_servers: default_max_concurrent_servers(),
            max_concurrent_probes_per_server: default_max_concurrent_probes_per_server(),
            cycle_grace_ms: default_cycle_grace_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> HealthResult<()> {
        if self.max_concurrent_servers == 0 || self.max_concurrent_probes_per_server == 0 {
            return Err(HealthError::config(
                "scheduler concurrency caps must be >= 1",
            ));
        }
        Ok(())
    }
}

/// Global retention config for the registry's rolling windows (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

fn default_window_capacity() -> usize {
    100
}

fn default_retention_hours() -> u64 {
    24
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window_capacity: default_window_capacity(),
            retention_hours: default_retention_hours(),
        }
    }
}

impl RetentionConfig {
    pub fn validate(&self) -> HealthResult<()> {
        if self.window_capacity == 0 {
            return Err(HealthError::config("window_capacity must be >= 1"));
        }
        if self.retention_hours == 0 {
            return Err(HealthError::config("retention_hours must be >= 1"));
        }
        Ok(())
    }
}

/// The full configuration document (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GlobalConfig {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl GlobalConfig {
    /// Validate every section and every server; on failure the caller
    /// retains the previously active config (spec §6).
    pub fn validate(&self) -> HealthResult<()> {
        self.aggregation.validate()?;
        self.circuit_breaker.validate()?;
        self.scheduler.validate()?;
        self.retention.validate()?;

        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            server.validate()?;
            if !seen.insert(server.name.clone()) {
                return Err(HealthError::config(format!(
                    "duplicate server name '{}'",
                    server.name
                )));
            }
        }
        Ok(())
    }
}
