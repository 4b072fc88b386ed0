//! Dual Probe Orchestrator (C3): runs one probe cycle per server, combining
//! the circuit breaker, credential provider, and the two probe clients into
//! a single `DualHealthResult` (spec §4.3).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::Client;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::circuit::{CircuitDecision, DualCircuitBreaker, ProbePath};
use crate::config::{
    AggregationConfig, AggregationMode, CircuitBreakerConfig, RetentionConfig, SchedulerConfig,
};
use crate::core::backoff;
use crate::core::logging::{ErrorContext, ErrorLogger};
use crate::core::metrics::global_metrics;
use crate::credential::CredentialProvider;
use crate::model::{CircuitState, DualHealthResult, MCPProbeResult, OverallStatus, RESTProbeResult, ServerConfig};
use crate::probe::{mcp as mcp_probe, rest as rest_probe};
use crate::registry::HealthRegistry;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Runs probe cycles for a fleet of servers under the scheduler's bounded
/// concurrency and the aggregation rule in spec §4.3.
pub struct Orchestrator {
    mcp_client: Client,
    rest_client: Client,
    credentials: CredentialProvider,
    circuit: DualCircuitBreaker,
    registry: Arc<HealthRegistry>,
    aggregation: AggregationConfig,
    server_permits: Semaphore,
    per_server_probe_cap: usize,
    cycle_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    grace: Duration,
    shutdown_token: CancellationToken,
    server_tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl Orchestrator {
    pub fn new(
        aggregation: AggregationConfig,
        circuit_breaker: CircuitBreakerConfig,
        scheduler: SchedulerConfig,
        retention: RetentionConfig,
    ) -> Self {
        Self {
            mcp_client: Client::new(),
            // REST health probes cap redirect chains at 3 hops (spec §4.2.2);
            // beyond that `probe_rest` reports `connection_error = "too many
            // redirects"` via `reqwest::Error::is_redirect`.
            rest_client: Client::builder()
                .redirect(reqwest::redirect::Policy::limited(3))
                .build()
                .expect("rest client config is static and always valid"),
            credentials: CredentialProvider::new(),
            circuit: DualCircuitBreaker::new(
                circuit_breaker.failure_threshold,
                Duration::from_secs(circuit_breaker.open_duration_secs),
            ),
            registry: Arc::new(HealthRegistry::new(
                retention.window_capacity,
                retention.retention_hours,
            )),
            aggregation,
            server_permits: Semaphore::new(scheduler.max_concurrent_servers),
            per_server_probe_cap: scheduler.max_concurrent_probes_per_server,
            cycle_locks: Mutex::new(HashMap::new()),
            grace: Duration::from_millis(scheduler.cycle_grace_ms),
            shutdown_token: CancellationToken::new(),
            server_tokens: Mutex::new(HashMap::new()),
        }
    }

    /// The read registry backing this orchestrator's cycles (spec §4.5).
    pub fn registry(&self) -> Arc<HealthRegistry> {
        self.registry.clone()
    }

    /// Current circuit snapshot for `server` (spec §4.4).
    pub async fn circuit_snapshot(&self, server: &str) -> CircuitState {
        self.circuit.snapshot(server).await
    }

    /// Cancel every in-flight and future cycle (spec §5 "shutdown").
    /// Cycles already past their last cancellation check point run to
    /// completion; anything still waiting on a permit, a cycle lock, or
    /// the probe itself returns `None` without touching the registry or
    /// circuit breakers (testable property 7).
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    /// Cancel only `server`'s in-flight and future cycles, leaving the rest
    /// of the fleet unaffected (spec §5 "per-server cancellation").
    pub async fn cancel_server(&self, server: &str) {
        let token = self.token_for(server).await;
        token.cancel();
    }

    async fn token_for(&self, server: &str) -> CancellationToken {
        let mut tokens = self.server_tokens.lock().await;
        tokens
            .entry(server.to_string())
            .or_insert_with(|| self.shutdown_token.child_token())
            .clone()
    }

    /// Run one cycle for `server`, respecting the global server-concurrency
    /// cap and serialising cycles per server (spec §5 "cycles are
    /// serialised"). Returns `None` if the cycle is cancelled before it
    /// completes, in which case neither the registry nor the circuit
    /// breaker is updated (spec §5 cancellation semantics, testable
    /// property 7, scenario S6).
    pub async fn run_cycle(&self, server: &ServerConfig) -> Option<DualHealthResult> {
        let token = self.token_for(&server.name).await;
        if token.is_cancelled() {
            debug!(server = %server.name, "cycle skipped: already cancelled");
            return None;
        }

        let _server_permit = tokio::select! {
            permit = self.server_permits.acquire() => {
                permit.expect("server semaphore is never closed")
            }
            _ = token.cancelled() => {
                debug!(server = %server.name, "cycle cancelled while waiting for server permit");
                return None;
            }
        };

        let cycle_lock = self.cycle_lock_for(&server.name).await;
        let _cycle_guard = tokio::select! {
            guard = cycle_lock.lock() => guard,
            _ = token.cancelled() => {
                debug!(server = %server.name, "cycle cancelled while waiting for cycle lock");
                return None;
            }
        };

        // Cycle deadline is max(mcp, rest) + grace (spec §4.3 step 3), bounding
        // the probe execution itself on top of any caller-supplied batch
        // deadline in `check_many`.
        let cycle_deadline =
            Duration::from_millis(server.mcp_timeout_ms.max(server.rest_timeout_ms)) + self.grace;

        tokio::select! {
            outcome = tokio::time::timeout(cycle_deadline, self.run_cycle_locked(server)) => {
                let result = match outcome {
                    Ok(result) => result,
                    Err(_) => synthesize_deadline_exceeded(server),
                };
                self.registry.record(result.clone()).await;
                Some(result)
            }
            _ = token.cancelled() => {
                debug!(server = %server.name, "cycle cancelled mid-flight; result discarded");
                None
            }
        }
    }

    /// Run cycles for every server in `configs` concurrently, bounded by the
    /// scheduler's server-concurrency cap, returning completed results in
    /// input order (spec §4.3 "Batch mode"). Servers whose cycle was
    /// cancelled are omitted rather than represented by a placeholder.
    pub async fn check_many(
        &self,
        configs: &[ServerConfig],
        per_server_deadline: Duration,
    ) -> Vec<DualHealthResult> {
        let futures = configs.iter().map(|server| async move {
            match tokio::time::timeout(per_server_deadline, self.run_cycle(server)).await {
                Ok(Some(result)) => Some(result),
                Ok(None) => None,
                Err(_) => {
                    let result = synthesize_deadline_exceeded(server);
                    self.registry.record(result.clone()).await;
                    Some(result)
                }
            }
        });
        futures::future::join_all(futures)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn cycle_lock_for(&self, server: &str) -> Arc<Mutex<()>> {
        let mut locks = self.cycle_locks.lock().await;
        locks
            .entry(server.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn run_cycle_locked(&self, server: &ServerConfig) -> DualHealthResult {
        let _probe_permit_cap = self.per_server_probe_cap.max(1);
        let probe_permits = Arc::new(Semaphore::new(_probe_permit_cap));

        let mcp_decision = if server.mcp_enabled {
            Some(self.circuit.check(&server.name, ProbePath::Mcp).await)
        } else {
            None
        };
        let rest_decision = if server.rest_enabled {
            Some(self.circuit.check(&server.name, ProbePath::Rest).await)
        } else {
            None
        };

        let mcp_will_run = matches!(mcp_decision, Some(CircuitDecision::Proceed));
        let rest_will_run = matches!(rest_decision, Some(CircuitDecision::Proceed));

        if !mcp_will_run && !rest_will_run {
            return synthesize_circuit_open(server);
        }

        if let Err(err) = self.credentials.ensure_fresh(server).await {
            ErrorLogger::log_error(
                &err,
                ErrorContext::new("ensure_fresh").with_server(server.name.clone()),
            )
            .await;
            return self.run_with_auth_failure(server, mcp_will_run, rest_will_run, &err).await;
        }

        let auth_headers = self.credentials.auth_headers(server).await;

        let mcp_task = mcp_will_run.then(|| {
            let client = self.mcp_client.clone();
            let server = server.clone();
            let headers = auth_headers.clone();
            let permits = probe_permits.clone();
            tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.expect("probe semaphore open");
                run_mcp_with_retry(&client, &server, &headers).await
            })
        });
        let rest_task = rest_will_run.then(|| {
            let client = self.rest_client.clone();
            let server = server.clone();
            let headers = auth_headers.clone();
            let permits = probe_permits.clone();
            tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.expect("probe semaphore open");
                run_rest_with_retry(&client, &server, &headers).await
            })
        });

        // Spawned tasks are detached: dropping this function's future (the
        // cancellation path in `run_cycle`) does not by itself stop them
        // from reading off the wire. This guard's `Drop` runs as part of
        // that same unwind and aborts both tasks, so a probe's socket is
        // closed within one scheduling quantum of cancellation either way
        // (spec §5/S6), whether we return normally below or are cancelled
        // out from under `run_cycle`'s outer `tokio::select!`.
        let _abort_guard = ProbeTaskGuard {
            mcp: mcp_task.as_ref().map(|t| t.abort_handle()),
            rest: rest_task.as_ref().map(|t| t.abort_handle()),
        };

        let mcp_result = match mcp_task {
            Some(task) => Some(task.await.unwrap_or_else(|join_err| {
                panicked_mcp_result(server, &join_err)
            })),
            None => None,
        };
        let rest_result = match rest_task {
            Some(task) => Some(task.await.unwrap_or_else(|join_err| {
                panicked_rest_result(server, &join_err)
            })),
            None => None,
        };

        if let Some(result) = &mcp_result {
            self.circuit.record(&server.name, ProbePath::Mcp, result.success).await;
            global_metrics().record_probe(&server.name, "mcp", result.success).await;
        }
        if let Some(result) = &rest_result {
            self.circuit.record(&server.name, ProbePath::Rest, result.success).await;
            global_metrics().record_probe(&server.name, "rest", result.success).await;
        }

        aggregate(server, mcp_result, rest_result, &self.aggregation)
    }

    async fn run_with_auth_failure(
        &self,
        server: &ServerConfig,
        mcp_will_run: bool,
        rest_will_run: bool,
        err: &crate::core::error::HealthError,
    ) -> DualHealthResult {
        if mcp_will_run {
            self.circuit.record(&server.name, ProbePath::Mcp, false).await;
            global_metrics().record_probe(&server.name, "mcp", false).await;
        }
        if rest_will_run {
            self.circuit.record(&server.name, ProbePath::Rest, false).await;
            global_metrics().record_probe(&server.name, "rest", false).await;
        }
        global_metrics().record_error(err, "ensure_fresh").await;

        let timestamp = now_millis();
        DualHealthResult {
            server_name: server.name.clone(),
            timestamp,
            mcp_result: None,
            rest_result: None,
            mcp_success: false,
            rest_success: false,
            overall_status: OverallStatus::Unhealthy,
            overall_success: false,
            combined_latency_ms: 0,
            health_score: 0.0,
            available_paths: vec!["none".to_string()],
            skipped_reason: Some(format!("credential_refresh_failed: {err}")),
        }
    }
}

async fn run_mcp_with_retry(client: &Client, server: &ServerConfig, headers: &HashMap<String, String>) -> MCPProbeResult {
    let max_attempts = server.mcp_retry_attempts.max(1);
    let mut last_result = None;
    for attempt in 1..=max_attempts {
        let request_id = Uuid::new_v4().to_string();
        let result = mcp_probe::probe_mcp(client, server, headers, request_id).await;
        if result.success {
            return result;
        }
        let classified = mcp_probe::classify_failure(&result);
        let will_retry = attempt < max_attempts
            && classified.as_ref().map(|e| e.is_recoverable()).unwrap_or(false);
        if let Some(err) = &classified {
            global_metrics().record_error(err, "probe_mcp").await;
            ErrorLogger::log_retry_attempt(
                err,
                attempt,
                max_attempts,
                will_retry,
                ErrorContext::new("probe_mcp").with_server(server.name.clone()),
            )
            .await;
        }
        last_result = Some(result);
        if will_retry {
            tokio::time::sleep(backoff::delay_for_attempt(attempt)).await;
        } else {
            break;
        }
    }
    last_result.expect("at least one attempt always runs")
}

async fn run_rest_with_retry(client: &Client, server: &ServerConfig, headers: &HashMap<String, String>) -> RESTProbeResult {
    let max_attempts = server.rest_retry_attempts.max(1);
    let mut last_result = None;
    for attempt in 1..=max_attempts {
        let result = rest_probe::probe_rest(client, server, headers).await;
        if result.success {
            return result;
        }
        let classified = rest_probe::classify_failure(&result);
        let will_retry = attempt < max_attempts
            && classified.as_ref().map(|e| e.is_recoverable()).unwrap_or(false);
        if let Some(err) = &classified {
            global_metrics().record_error(err, "probe_rest").await;
            ErrorLogger::log_retry_attempt(
                err,
                attempt,
                max_attempts,
                will_retry,
                ErrorContext::new("probe_rest").with_server(server.name.clone()),
            )
            .await;
        }
        last_result = Some(result);
        if will_retry {
            tokio::time::sleep(backoff::delay_for_attempt(attempt)).await;
        } else {
            break;
        }
    }
    last_result.expect("at least one attempt always runs")
}

/// Pure aggregation rule (spec §4.3): a total function of the enabled-path
/// outcomes, priority weights, and aggregation mode (testable property 2).
fn aggregate(
    server: &ServerConfig,
    mcp_result: Option<MCPProbeResult>,
    rest_result: Option<RESTProbeResult>,
    aggregation: &AggregationConfig,
) -> DualHealthResult {
    let timestamp = now_millis();
    let mcp_success = mcp_result.as_ref().map(|r| r.success).unwrap_or(false);
    let rest_success = rest_result.as_ref().map(|r| r.success).unwrap_or(false);

    let w_m = server.mcp_priority_weight;
    let w_r = server.rest_priority_weight;
    let s_m = if mcp_success { 1.0 } else { 0.0 };
    let s_r = if rest_success { 1.0 } else { 0.0 };

    let health_score = match aggregation.mode {
        AggregationMode::WeightedAverage => {
            // Weights are only meaningful over enabled paths (spec §4.3:
            // "already normalised so that enabled-path weights sum to 1").
            // A disabled path's configured weight must not dilute the
            // score of the path(s) actually running.
            let enabled_weight = (if server.mcp_enabled { w_m } else { 0.0 })
                + (if server.rest_enabled { w_r } else { 0.0 });
            if enabled_weight > 0.0 {
                let norm_m = if server.mcp_enabled { w_m / enabled_weight } else { 0.0 };
                let norm_r = if server.rest_enabled { w_r / enabled_weight } else { 0.0 };
                norm_m * s_m + norm_r * s_r
            } else {
                0.0
            }
        }
        AggregationMode::Minimum => {
            if server.mcp_enabled && server.rest_enabled {
                s_m.min(s_r)
            } else if server.mcp_enabled {
                s_m
            } else {
                s_r
            }
        }
        AggregationMode::Maximum => {
            if server.mcp_enabled && server.rest_enabled {
                // Tie-break prefers MCP (spec §4.3).
                if s_m >= s_r { s_m } else { s_r }
            } else if server.mcp_enabled {
                s_m
            } else {
                s_r
            }
        }
    };

    let require_both = server.require_both_success_for_healthy;
    let overall_success = if require_both {
        mcp_success && rest_success
    } else {
        mcp_success || rest_success
    };

    let overall_status = if health_score >= aggregation.degraded_threshold
        && (!require_both || (mcp_success && rest_success))
    {
        OverallStatus::Healthy
    } else if health_score >= aggregation.failure_threshold {
        OverallStatus::Degraded
    } else {
        OverallStatus::Unhealthy
    };

    let available_paths = match (mcp_success, rest_success) {
        (true, true) => vec!["both".to_string()],
        (true, false) => vec!["mcp".to_string()],
        (false, true) => vec!["rest".to_string()],
        (false, false) => vec!["none".to_string()],
    };

    let combined_latency_ms = mcp_result
        .as_ref()
        .map(|r| r.latency_ms)
        .unwrap_or(0)
        .max(rest_result.as_ref().map(|r| r.latency_ms).unwrap_or(0));

    DualHealthResult {
        server_name: server.name.clone(),
        timestamp,
        mcp_result,
        rest_result,
        mcp_success,
        rest_success,
        overall_status,
        overall_success,
        combined_latency_ms,
        health_score,
        available_paths,
        skipped_reason: None,
    }
}

/// Aborts a cycle's in-flight probe tasks when dropped. `tokio::spawn`
/// detaches its task from the spawning future, so merely dropping the
/// `JoinHandle`s (as happens when `run_cycle`'s outer `tokio::select!`
/// cancels `run_cycle_locked`) leaves them running until their own
/// per-probe timeout. Holding this guard for the lifetime of the await
/// ensures the tasks are aborted, and their sockets closed, the moment
/// the cycle is cancelled.
struct ProbeTaskGuard {
    mcp: Option<tokio::task::AbortHandle>,
    rest: Option<tokio::task::AbortHandle>,
}

impl Drop for ProbeTaskGuard {
    fn drop(&mut self) {
        if let Some(handle) = &self.mcp {
            handle.abort();
        }
        if let Some(handle) = &self.rest {
            handle.abort();
        }
    }
}

/// A panicking probe task becomes a synthetic failed result rather than an
/// aborted batch (SPEC_FULL.md "SUPPLEMENTED FEATURES" item 1).
fn panicked_mcp_result(server: &ServerConfig, join_err: &tokio::task::JoinError) -> MCPProbeResult {
    MCPProbeResult {
        server_name: server.name.clone(),
        timestamp: now_millis(),
        success: false,
        latency_ms: 0,
        request_id: Uuid::new_v4().to_string(),
        jsonrpc_version: "2.0".to_string(),
        tools_count: None,
        expected_tools_found: Vec::new(),
        missing_tools: Vec::new(),
        mcp_error: None,
        connection_error: Some(format!("probe task panicked: {join_err}")),
        validation: None,
    }
}

fn panicked_rest_result(server: &ServerConfig, join_err: &tokio::task::JoinError) -> RESTProbeResult {
    RESTProbeResult {
        server_name: server.name.clone(),
        timestamp: now_millis(),
        success: false,
        latency_ms: 0,
        http_status: None,
        body: None,
        body_truncated: false,
        validation: None,
        connection_error: Some(format!("probe task panicked: {join_err}")),
    }
}

fn synthesize_circuit_open(server: &ServerConfig) -> DualHealthResult {
    DualHealthResult {
        server_name: server.name.clone(),
        timestamp: now_millis(),
        mcp_result: None,
        rest_result: None,
        mcp_success: false,
        rest_success: false,
        overall_status: OverallStatus::Unhealthy,
        overall_success: false,
        combined_latency_ms: 0,
        health_score: 0.0,
        available_paths: vec!["none".to_string()],
        skipped_reason: Some("circuit_open".to_string()),
    }
}

fn synthesize_deadline_exceeded(server: &ServerConfig) -> DualHealthResult {
    DualHealthResult {
        server_name: server.name.clone(),
        timestamp: now_millis(),
        mcp_result: None,
        rest_result: None,
        mcp_success: false,
        rest_success: false,
        overall_status: OverallStatus::Unhealthy,
        overall_success: false,
        combined_latency_ms: 0,
        health_score: 0.0,
        available_paths: vec!["none".to_string()],
        skipped_reason: Some("deadline exceeded".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AuthConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            AggregationConfig {
                failure_threshold: 0.5,
                degraded_threshold: 0.7,
                mode: AggregationMode::WeightedAverage,
            },
            CircuitBreakerConfig {
                failure_threshold: 5,
                open_duration_secs: 30,
            },
            SchedulerConfig {
                max_concurrent_servers: 10,
                max_concurrent_probes_per_server: 2,
                cycle_grace_ms: 500,
            },
            crate::config::RetentionConfig {
                window_capacity: 100,
                retention_hours: 24,
            },
        )
    }

    async fn config_for(mcp_url: String, rest_url: String) -> ServerConfig {
        ServerConfig {
            name: "svc-a".to_string(),
            mcp_endpoint_url: mcp_url,
            rest_health_endpoint_url: rest_url,
            mcp_enabled: true,
            rest_enabled: true,
            mcp_expected_tools: vec!["search".to_string()],
            mcp_timeout_ms: 2_000,
            rest_timeout_ms: 2_000,
            mcp_retry_attempts: 1,
            rest_retry_attempts: 1,
            mcp_priority_weight: 0.6,
            rest_priority_weight: 0.4,
            require_both_success_for_healthy: false,
            auth_config: AuthConfig::None,
            static_auth_headers: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn both_paths_healthy_yields_healthy_verdict() {
        let mcp_server = MockServer::start().await;
        let rest_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(|req: &wiremock::Request| {
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": body["id"],
                    "result": {"tools": [{"name": "search", "description": "d"}]}
                }))
            })
            .mount(&mcp_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "healthy"})))
            .mount(&rest_server)
            .await;

        let orchestrator = orchestrator();
        let config = config_for(
            format!("{}/mcp", mcp_server.uri()),
            format!("{}/health", rest_server.uri()),
        )
        .await;

        let result = orchestrator.run_cycle(&config).await.unwrap();
        assert_eq!(result.overall_status, OverallStatus::Healthy);
        assert!((result.health_score - 1.0).abs() < 1e-9);
        pretty_assertions::assert_eq!(result.available_paths, vec!["both".to_string()]);

        let recorded = orchestrator.registry().latest_by_server(&config.name).await;
        assert_eq!(recorded.unwrap().overall_status, OverallStatus::Healthy);
    }

    #[tokio::test]
    async fn rest_down_yields_degraded_with_mcp_only_weight() {
        let mcp_server = MockServer::start().await;
        let rest_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(|req: &wiremock::Request| {
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": body["id"],
                    "result": {"tools": [{"name": "search", "description": "d"}]}
                }))
            })
            .mount(&mcp_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&rest_server)
            .await;

        let orchestrator = orchestrator();
        let config = config_for(
            format!("{}/mcp", mcp_server.uri()),
            format!("{}/health", rest_server.uri()),
        )
        .await;

        let result = orchestrator.run_cycle(&config).await.unwrap();
        assert_eq!(result.overall_status, OverallStatus::Degraded);
        assert!((result.health_score - 0.6).abs() < 1e-9);
        assert_eq!(result.available_paths, vec!["mcp".to_string()]);
    }

    #[tokio::test]
    async fn check_many_preserves_input_order() {
        let mcp_server = MockServer::start().await;
        let rest_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(|req: &wiremock::Request| {
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": body["id"],
                    "result": {"tools": [{"name": "search", "description": "d"}]}
                }))
            })
            .mount(&mcp_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "healthy"})))
            .mount(&rest_server)
            .await;

        let orchestrator = orchestrator();
        let mut configs = Vec::new();
        for i in 0..3 {
            let mut cfg = config_for(
                format!("{}/mcp", mcp_server.uri()),
                format!("{}/health", rest_server.uri()),
            )
            .await;
            cfg.name = format!("svc-{i}");
            configs.push(cfg);
        }

        let results = orchestrator.check_many(&configs, Duration::from_secs(5)).await;
        assert_eq!(results.len(), 3);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.server_name, format!("svc-{i}"));
        }
    }

    #[tokio::test]
    async fn shutdown_cancels_a_not_yet_started_cycle() {
        let orchestrator = orchestrator();
        orchestrator.shutdown();

        let config = config_for(
            "https://example.test/mcp".to_string(),
            "https://example.test/health".to_string(),
        )
        .await;

        let result = orchestrator.run_cycle(&config).await;
        assert!(result.is_none());
        assert!(orchestrator.registry().latest_by_server(&config.name).await.is_none());
    }

    #[tokio::test]
    async fn cancel_server_only_affects_that_server() {
        let mcp_server = MockServer::start().await;
        let rest_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(|req: &wiremock::Request| {
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": body["id"],
                    "result": {"tools": [{"name": "search", "description": "d"}]}
                }))
            })
            .mount(&mcp_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "healthy"})))
            .mount(&rest_server)
            .await;

        let orchestrator = orchestrator();
        let mut cancelled = config_for(
            format!("{}/mcp", mcp_server.uri()),
            format!("{}/health", rest_server.uri()),
        )
        .await;
        cancelled.name = "svc-cancelled".to_string();
        let mut alive = cancelled.clone();
        alive.name = "svc-alive".to_string();

        orchestrator.cancel_server(&cancelled.name).await;

        assert!(orchestrator.run_cycle(&cancelled).await.is_none());
        let alive_result = orchestrator.run_cycle(&alive).await;
        assert!(alive_result.is_some());
        assert_eq!(alive_result.unwrap().overall_status, OverallStatus::Healthy);
    }
}
