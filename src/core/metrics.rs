//! Ambient, process-wide metrics counters.
//!
//! Distinct from the per-server rolling windows in `registry.rs` that back
//! the read API (spec §4.5): this module is the cross-cutting "is the
//! coordinator itself healthy" signal — probe attempts, retries, circuit
//! transitions — independent of any single server's history.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::core::error::HealthError;

/// Metrics collector for coordinator-wide operations.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    error_counters: Arc<RwLock<HashMap<String, AtomicU64>>>,
    probe_counters: Arc<RwLock<HashMap<String, AtomicU64>>>,
    circuit_counters: Arc<RwLock<HashMap<String, AtomicU64>>>,
    retry_counters: Arc<RwLock<HashMap<String, AtomicU64>>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            error_counters: Arc::new(RwLock::new(HashMap::new())),
            probe_counters: Arc::new(RwLock::new(HashMap::new())),
            circuit_counters: Arc::new(RwLock::new(HashMap::new())),
            retry_counters: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record an error occurrence.
    pub async fn record_error(&self, error: &HealthError, context: &str) {
        let category = error.category();
        let recoverable = error.is_recoverable();

        let key =
            format!("health_errors_total:category={category}:recoverable={recoverable}:context={context}");
        self.increment_counter(&self.error_counters, &key).await;

        let category_key = format!("health_errors_by_category:{category}");
        self.increment_counter(&self.error_counters, &category_key)
            .await;

        info!(
            target: "health_metrics",
            error_category = category,
            error_recoverable = recoverable,
            error_context = context,
            "error recorded in metrics"
        );
    }

    /// Record a probe attempt against a server over one path ("mcp"/"rest").
    pub async fn record_probe(&self, server: &str, path: &str, success: bool) {
        let key = format!("health_probes_total:server={server}:path={path}:success={success}");
        self.increment_counter(&self.probe_counters, &key).await;

        info!(
            target: "health_metrics",
            server = server,
            path = path,
            success = success,
            "probe recorded in metrics"
        );
    }

    /// Record a circuit breaker state transition.
    pub async fn record_circuit_transition(&self, server: &str, path: &str, to_state: &str) {
        let key = format!("health_circuit_transitions_total:server={server}:path={path}:to={to_state}");
        self.increment_counter(&self.circuit_counters, &key).await;

        info!(
            target: "health_metrics",
            server = server,
            path = path,
            to_state = to_state,
            "circuit transition recorded in metrics"
        );
    }

    /// Record a retry attempt.
    pub async fn record_retry_attempt(
        &self,
        operation: &str,
        attempt: u32,
        error_category: &str,
        will_retry: bool,
    ) {
        let key = format!(
            "health_retries_total:operation={operation}:attempt={attempt}:error_category={error_category}:will_retry={will_retry}"
        );
        self.increment_counter(&self.retry_counters, &key).await;

        info!(
            target: "health_metrics",
            retry_operation = operation,
            retry_attempt = attempt,
            error_category = error_category,
            will_retry_again = will_retry,
            "retry attempt recorded in metrics"
        );
    }

    pub async fn get_error_metrics(&self) -> HashMap<String, u64> {
        snapshot(&self.error_counters).await
    }

    pub async fn get_probe_metrics(&self) -> HashMap<String, u64> {
        snapshot(&self.probe_counters).await
    }

    pub async fn get_circuit_metrics(&self) -> HashMap<String, u64> {
        snapshot(&self.circuit_counters).await
    }

    pub async fn get_retry_metrics(&self) -> HashMap<String, u64> {
        snapshot(&self.retry_counters).await
    }

    pub async fn get_all_metrics(&self) -> MetricsSummary {
        MetricsSummary {
            errors: self.get_error_metrics().await,
            probes: self.get_probe_metrics().await,
            circuits: self.get_circuit_metrics().await,
            retries: self.get_retry_metrics().await,
        }
    }

    /// Reset all metrics; useful for tests.
    pub async fn reset(&self) {
        self.error_counters.write().await.clear();
        self.probe_counters.write().await.clear();
        self.circuit_counters.write().await.clear();
        self.retry_counters.write().await.clear();

        warn!(target: "health_metrics", "metrics collector reset");
    }

    async fn increment_counter(&self, counters: &Arc<RwLock<HashMap<String, AtomicU64>>>, key: &str) {
        let mut guard = counters.write().await;
        let counter = guard.entry(key.to_string()).or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

async fn snapshot(counters: &Arc<RwLock<HashMap<String, AtomicU64>>>) -> HashMap<String, u64> {
    let guard = counters.read().await;
    guard
        .iter()
        .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
        .collect()
}

/// Snapshot of all ambient counters.
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub errors: HashMap<String, u64>,
    pub probes: HashMap<String, u64>,
    pub circuits: HashMap<String, u64>,
    pub retries: HashMap<String, u64>,
}

static GLOBAL_METRICS: once_cell::sync::Lazy<MetricsCollector> =
    once_cell::sync::Lazy::new(MetricsCollector::new);

/// Access the process-wide metrics collector.
pub fn global_metrics() -> &'static MetricsCollector {
    &GLOBAL_METRICS
}
