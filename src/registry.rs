//! Health Registry & Metrics (C5): holds the latest dual result per server,
//! rolling per-path windows for percentile/rate queries, and answers the
//! read contracts the external HTTP surface would call (spec §4.5).
//!
//! Distinct from [`crate::core::metrics`], which tracks ambient
//! coordinator-wide counters (probe attempts, retries, circuit transitions)
//! rather than per-server windowed history.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;
use tracing::debug;

use crate::model::{DualHealthResult, MetricSample, OverallStatus};
use crate::probe::{mcp as mcp_probe, rest as rest_probe};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Per-server state held by the registry: the latest verdict plus two
/// fixed-capacity ring windows (spec §3 "MetricsWindow"), one per path.
struct ServerEntry {
    latest: DualHealthResult,
    mcp_window: VecDeque<MetricSample>,
    rest_window: VecDeque<MetricSample>,
}

impl ServerEntry {
    fn new(result: DualHealthResult, capacity: usize) -> Self {
        let mut entry = Self {
            latest: result.clone(),
            mcp_window: VecDeque::with_capacity(capacity.min(256)),
            rest_window: VecDeque::with_capacity(capacity.min(256)),
        };
        entry.push_samples(&result, capacity);
        entry.latest = result;
        entry
    }

    fn push_samples(&mut self, result: &DualHealthResult, capacity: usize) {
        if let Some(mcp) = &result.mcp_result {
            let error_kind = if mcp.success {
                None
            } else {
                mcp_probe::classify_failure(mcp).map(|e| e.category().to_string())
            };
            push_bounded(
                &mut self.mcp_window,
                MetricSample {
                    timestamp: result.timestamp,
                    success: mcp.success,
                    latency_ms: mcp.latency_ms,
                    error_kind,
                },
                capacity,
            );
        }
        if let Some(rest) = &result.rest_result {
            let error_kind = if rest.success {
                None
            } else {
                rest_probe::classify_failure(rest).map(|e| e.category().to_string())
            };
            push_bounded(
                &mut self.rest_window,
                MetricSample {
                    timestamp: result.timestamp,
                    success: rest.success,
                    latency_ms: rest.latency_ms,
                    error_kind,
                },
                capacity,
            );
        }
    }
}

fn push_bounded(window: &mut VecDeque<MetricSample>, sample: MetricSample, capacity: usize) {
    if window.len() >= capacity.max(1) {
        window.pop_front();
    }
    window.push_back(sample);
}

/// Success rate, latency percentiles, and error counts for one server
/// (spec §4.5 `MetricsByServer`).
#[derive(Debug, Clone)]
pub struct ServerMetrics {
    pub mcp_success_rate: f64,
    pub rest_success_rate: f64,
    pub combined_success_rate: f64,
    pub mcp_latency_p50_ms: Option<u64>,
    pub mcp_latency_p95_ms: Option<u64>,
    pub mcp_latency_p99_ms: Option<u64>,
    pub rest_latency_p50_ms: Option<u64>,
    pub rest_latency_p95_ms: Option<u64>,
    pub rest_latency_p99_ms: Option<u64>,
    pub error_counts: HashMap<String, u64>,
    pub samples_count: usize,
}

/// Fleet-wide rollup (spec §4.5 `SystemSummary`).
#[derive(Debug, Clone)]
pub struct SystemSummary {
    pub total_servers: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub unknown: usize,
    pub timestamp: u64,
}

/// Percentile over a bounded latency sample using the nearest-rank method.
/// O(N log N) by sorting; N is bounded by the window capacity (spec §4.5).
fn percentile(mut values: Vec<u64>, p: f64) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let rank = ((p * values.len() as f64).ceil() as usize).clamp(1, values.len());
    Some(values[rank - 1])
}

/// Read-mostly registry of per-server health state (spec §4.5).
///
/// Writes are a single lock acquisition per server (`record`), atomically
/// replacing the latest pointer and appending to both rolling windows —
/// a reader never observes a half-updated result. Reads clone out of the
/// lock, so percentile computation never blocks a concurrent writer.
pub struct HealthRegistry {
    servers: RwLock<HashMap<String, ServerEntry>>,
    window_capacity: usize,
    retention: Duration,
}

impl HealthRegistry {
    pub fn new(window_capacity: usize, retention_hours: u64) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            window_capacity: window_capacity.max(1),
            retention: Duration::from_secs(retention_hours.max(1) * 3600),
        }
    }

    /// Record one cycle's result, atomically replacing the latest pointer
    /// and appending samples to both path windows (spec §4.5 `Record`).
    /// Never called for a cancelled cycle (testable property 7).
    pub async fn record(&self, result: DualHealthResult) {
        let mut servers = self.servers.write().await;
        match servers.get_mut(&result.server_name) {
            Some(entry) => {
                entry.push_samples(&result, self.window_capacity);
                entry.latest = result;
            }
            None => {
                let name = result.server_name.clone();
                servers.insert(name, ServerEntry::new(result, self.window_capacity));
            }
        }
    }

    /// Remove a server entirely, e.g. on config removal (spec §3 lifecycle).
    pub async fn remove(&self, server: &str) {
        self.servers.write().await.remove(server);
    }

    /// `LatestByServer` (spec §4.5).
    pub async fn latest_by_server(&self, server: &str) -> Option<DualHealthResult> {
        self.servers.read().await.get(server).map(|e| e.latest.clone())
    }

    /// `AllLatest` (spec §4.5).
    pub async fn all_latest(&self) -> HashMap<String, DualHealthResult> {
        self.servers
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), entry.latest.clone()))
            .collect()
    }

    /// `MetricsByServer` (spec §4.5): success rates, percentile latencies,
    /// and error counts by kind over the retained window, optionally
    /// filtered to samples at or after `since` (ms since epoch).
    pub async fn metrics_by_server(&self, server: &str, since: Option<u64>) -> Option<ServerMetrics> {
        let servers = self.servers.read().await;
        let entry = servers.get(server)?;

        let mcp_samples: Vec<&MetricSample> = entry
            .mcp_window
            .iter()
            .filter(|s| since.map(|floor| s.timestamp >= floor).unwrap_or(true))
            .collect();
        let rest_samples: Vec<&MetricSample> = entry
            .rest_window
            .iter()
            .filter(|s| since.map(|floor| s.timestamp >= floor).unwrap_or(true))
            .collect();

        let mcp_success_rate = success_rate(&mcp_samples);
        let rest_success_rate = success_rate(&rest_samples);
        let total_samples = mcp_samples.len() + rest_samples.len();
        let total_successes = mcp_samples.iter().filter(|s| s.success).count()
            + rest_samples.iter().filter(|s| s.success).count();
        let combined_success_rate = if total_samples == 0 {
            0.0
        } else {
            total_successes as f64 / total_samples as f64
        };

        let mcp_latencies: Vec<u64> = mcp_samples.iter().map(|s| s.latency_ms).collect();
        let rest_latencies: Vec<u64> = rest_samples.iter().map(|s| s.latency_ms).collect();

        let mut error_counts = HashMap::new();
        for sample in mcp_samples.iter().chain(rest_samples.iter()) {
            if let Some(kind) = &sample.error_kind {
                *error_counts.entry(kind.clone()).or_insert(0u64) += 1;
            }
        }

        Some(ServerMetrics {
            mcp_success_rate,
            rest_success_rate,
            combined_success_rate,
            mcp_latency_p50_ms: percentile(mcp_latencies.clone(), 0.50),
            mcp_latency_p95_ms: percentile(mcp_latencies.clone(), 0.95),
            mcp_latency_p99_ms: percentile(mcp_latencies, 0.99),
            rest_latency_p50_ms: percentile(rest_latencies.clone(), 0.50),
            rest_latency_p95_ms: percentile(rest_latencies.clone(), 0.95),
            rest_latency_p99_ms: percentile(rest_latencies, 0.99),
            error_counts,
            samples_count: total_samples,
        })
    }

    /// `SystemSummary` (spec §4.5).
    pub async fn system_summary(&self) -> SystemSummary {
        let servers = self.servers.read().await;
        let mut summary = SystemSummary {
            total_servers: servers.len(),
            healthy: 0,
            degraded: 0,
            unhealthy: 0,
            unknown: 0,
            timestamp: now_millis(),
        };
        for entry in servers.values() {
            match entry.latest.overall_status {
                OverallStatus::Healthy => summary.healthy += 1,
                OverallStatus::Degraded => summary.degraded += 1,
                OverallStatus::Unhealthy => summary.unhealthy += 1,
                OverallStatus::Unknown => summary.unknown += 1,
            }
        }
        summary
    }

    /// Evict samples older than the configured retention, even when a
    /// window is not yet full (spec §4.5 "periodic cleanup"). Intended to
    /// be called from a periodic task; see [`HealthRegistry::spawn_retention_loop`].
    pub async fn run_retention_sweep(&self) {
        let floor = now_millis().saturating_sub(self.retention.as_millis() as u64);
        let mut servers = self.servers.write().await;
        let mut evicted = 0usize;
        for entry in servers.values_mut() {
            let before = entry.mcp_window.len() + entry.rest_window.len();
            entry.mcp_window.retain(|s| s.timestamp >= floor);
            entry.rest_window.retain(|s| s.timestamp >= floor);
            evicted += before - (entry.mcp_window.len() + entry.rest_window.len());
        }
        if evicted > 0 {
            debug!(target: "health_registry", evicted, "retention sweep evicted stale samples");
        }
    }

    /// Spawn a background task that runs [`Self::run_retention_sweep`] on
    /// `interval` until the returned handle is dropped or aborted.
    pub fn spawn_retention_loop(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.run_retention_sweep().await;
            }
        })
    }
}

fn success_rate(samples: &[&MetricSample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let successes = samples.iter().filter(|s| s.success).count();
    successes as f64 / samples.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OverallStatus;

    fn result(server: &str, status: OverallStatus, timestamp: u64, latency: u64) -> DualHealthResult {
        DualHealthResult {
            server_name: server.to_string(),
            timestamp,
            mcp_result: None,
            rest_result: None,
            mcp_success: status == OverallStatus::Healthy,
            rest_success: status == OverallStatus::Healthy,
            overall_status: status,
            overall_success: matches!(status, OverallStatus::Healthy | OverallStatus::Degraded),
            combined_latency_ms: latency,
            health_score: if status == OverallStatus::Healthy { 1.0 } else { 0.0 },
            available_paths: vec!["none".to_string()],
            skipped_reason: None,
        }
    }

    #[tokio::test]
    async fn latest_by_server_reflects_last_record() {
        let registry = HealthRegistry::new(100, 24);
        registry.record(result("svc-a", OverallStatus::Healthy, 1, 10)).await;
        registry.record(result("svc-a", OverallStatus::Degraded, 2, 20)).await;

        let latest = registry.latest_by_server("svc-a").await.unwrap();
        assert_eq!(latest.overall_status, OverallStatus::Degraded);
    }

    #[tokio::test]
    async fn idempotent_reads_without_intervening_record() {
        let registry = HealthRegistry::new(100, 24);
        registry.record(result("svc-a", OverallStatus::Healthy, 1, 10)).await;

        let first = registry.latest_by_server("svc-a").await.unwrap();
        let second = registry.latest_by_server("svc-a").await.unwrap();
        assert_eq!(first.timestamp, second.timestamp);
        assert_eq!(first.overall_status, second.overall_status);
    }

    #[tokio::test]
    async fn system_summary_counts_by_status() {
        let registry = HealthRegistry::new(100, 24);
        registry.record(result("svc-a", OverallStatus::Healthy, 1, 10)).await;
        registry.record(result("svc-b", OverallStatus::Unhealthy, 1, 10)).await;
        registry.record(result("svc-c", OverallStatus::Degraded, 1, 10)).await;

        let summary = registry.system_summary().await;
        assert_eq!(summary.total_servers, 3);
        assert_eq!(summary.healthy, 1);
        assert_eq!(summary.unhealthy, 1);
        assert_eq!(summary.degraded, 1);
    }

    #[tokio::test]
    async fn window_never_exceeds_capacity() {
        let registry = HealthRegistry::new(3, 24);
        for i in 0..10u64 {
            let mut r = result("svc-a", OverallStatus::Healthy, i, i);
            r.mcp_result = Some(crate::model::MCPProbeResult {
                server_name: "svc-a".to_string(),
                timestamp: i,
                success: true,
                latency_ms: i,
                request_id: format!("req-{i}"),
                jsonrpc_version: "2.0".to_string(),
                tools_count: Some(1),
                expected_tools_found: vec![],
                missing_tools: vec![],
                mcp_error: None,
                connection_error: None,
                validation: None,
            });
            registry.record(r).await;
        }
        let servers = registry.servers.read().await;
        assert_eq!(servers.get("svc-a").unwrap().mcp_window.len(), 3);
    }

    #[tokio::test]
    async fn percentiles_computed_over_window() {
        let registry = HealthRegistry::new(100, 24);
        for i in 1..=10u64 {
            let mut r = result("svc-a", OverallStatus::Healthy, i, i * 10);
            r.mcp_result = Some(crate::model::MCPProbeResult {
                server_name: "svc-a".to_string(),
                timestamp: i,
                success: true,
                latency_ms: i * 10,
                request_id: format!("req-{i}"),
                jsonrpc_version: "2.0".to_string(),
                tools_count: Some(1),
                expected_tools_found: vec![],
                missing_tools: vec![],
                mcp_error: None,
                connection_error: None,
                validation: None,
            });
            registry.record(r).await;
        }
        let metrics = registry.metrics_by_server("svc-a", None).await.unwrap();
        assert_eq!(metrics.mcp_latency_p50_ms, Some(50));
        assert_eq!(metrics.mcp_latency_p99_ms, Some(100));
    }

    #[tokio::test]
    async fn retention_sweep_evicts_stale_samples() {
        let registry = HealthRegistry::new(100, 24);
        let stale_ts = now_millis().saturating_sub(Duration::from_secs(25 * 3600).as_millis() as u64);
        let mut r = result("svc-a", OverallStatus::Healthy, stale_ts, 5);
        r.mcp_result = Some(crate::model::MCPProbeResult {
            server_name: "svc-a".to_string(),
            timestamp: stale_ts,
            success: true,
            latency_ms: 5,
            request_id: "req-stale".to_string(),
            jsonrpc_version: "2.0".to_string(),
            tools_count: Some(1),
            expected_tools_found: vec![],
            missing_tools: vec![],
            mcp_error: None,
            connection_error: None,
            validation: None,
        });
        registry.record(r).await;
        registry.run_retention_sweep().await;

        let metrics = registry.metrics_by_server("svc-a", None).await.unwrap();
        assert_eq!(metrics.samples_count, 0);
    }
}
