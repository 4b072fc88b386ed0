//! Dual Circuit Breaker (C4): two independent per-path breakers (MCP, REST)
//! per server, with a derived overall state (spec §4.4).
//!
//! Half-open behaves as a coalescing gate rather than a reject-the-rest
//! gate: the first caller after the open duration elapses is let through as
//! the trial; any other caller that arrives while that trial is in flight
//! waits for it to resolve instead of being short-circuited or issuing a
//! second, redundant trial probe.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

use crate::core::logging::ErrorLogger;
use crate::model::{CircuitOverallState, CircuitState, PathCircuitState};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Which probe path a circuit-breaker call concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePath {
    Mcp,
    Rest,
}

impl ProbePath {
    fn label(self) -> &'static str {
        match self {
            ProbePath::Mcp => "mcp",
            ProbePath::Rest => "rest",
        }
    }
}

/// What the caller should do for this cycle's probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDecision {
    /// Run the probe. If the breaker was half-open, this call is the trial
    /// and its outcome decides whether the breaker closes or re-opens.
    Proceed,
    /// Skip the probe; the path is open and no trial is due yet.
    ShortCircuited,
}

struct PathBreaker {
    state: PathCircuitState,
    consecutive_failures: u32,
    opened_at: Option<u64>,
    trial_in_flight: bool,
}

impl PathBreaker {
    fn new() -> Self {
        Self {
            state: PathCircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }
}

struct ServerCircuit {
    mcp: PathBreaker,
    rest: PathBreaker,
    last_change_at: u64,
}

impl ServerCircuit {
    fn new() -> Self {
        Self {
            mcp: PathBreaker::new(),
            rest: PathBreaker::new(),
            last_change_at: now_millis(),
        }
    }

    fn path_mut(&mut self, path: ProbePath) -> &mut PathBreaker {
        match path {
            ProbePath::Mcp => &mut self.mcp,
            ProbePath::Rest => &mut self.rest,
        }
    }

    fn overall(&self) -> CircuitOverallState {
        derive_overall(self.mcp.state, self.rest.state)
    }
}

/// Derive the overall per-server circuit state from its two path states.
///
/// Per the Open Question decision recorded in DESIGN.md, a single fully-open
/// path with the other available (closed or trialing) is reported as
/// `McpOnly`/`RestOnly` rather than folded into `Degraded`; `Degraded` is
/// reserved for the case where neither path is fully open but at least one
/// is half-open (both flaky, neither conclusively down).
fn derive_overall(mcp: PathCircuitState, rest: PathCircuitState) -> CircuitOverallState {
    use PathCircuitState::*;
    match (mcp, rest) {
        (Closed, Closed) => CircuitOverallState::Closed,
        (Open, Open) => CircuitOverallState::Open,
        (Open, _) => CircuitOverallState::RestOnly,
        (_, Open) => CircuitOverallState::McpOnly,
        _ => CircuitOverallState::Degraded,
    }
}

/// Tracks independent circuit breaker state for the MCP and REST probe
/// paths of every server, keyed by server name.
pub struct DualCircuitBreaker {
    servers: RwLock<HashMap<String, ServerCircuit>>,
    failure_threshold: u32,
    open_duration: Duration,
}

impl DualCircuitBreaker {
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            failure_threshold: failure_threshold.max(1),
            open_duration,
        }
    }

    /// Decide whether `server`'s `path` probe should run this cycle.
    ///
    /// A waiter that lands on an in-flight half-open trial is not rejected;
    /// it polls at a short fixed interval until the trial resolves (to
    /// `Closed` or back to `Open`) and then reports that outcome. The poll
    /// is a deliberate, race-free substitute for a `Notify`-based wakeup,
    /// which would need to be registered before the trial could complete —
    /// and the lock has to be released before an await point.
    pub async fn check(&self, server: &str, path: ProbePath) -> CircuitDecision {
        const POLL_INTERVAL: Duration = Duration::from_millis(5);
        loop {
            let mut should_poll = false;
            let mut opened_to_half_open = false;
            let outcome = {
                let mut servers = self.servers.write().await;
                let circuit = servers
                    .entry(server.to_string())
                    .or_insert_with(ServerCircuit::new);
                let now = now_millis();
                let breaker = circuit.path_mut(path);

                match breaker.state {
                    PathCircuitState::Closed => Some(CircuitDecision::Proceed),
                    PathCircuitState::Open => {
                        let elapsed_ok = breaker
                            .opened_at
                            .map(|opened| now.saturating_sub(opened) >= self.open_duration.as_millis() as u64)
                            .unwrap_or(true);
                        if elapsed_ok {
                            breaker.state = PathCircuitState::HalfOpen;
                            breaker.trial_in_flight = true;
                            opened_to_half_open = true;
                            Some(CircuitDecision::Proceed)
                        } else {
                            Some(CircuitDecision::ShortCircuited)
                        }
                    }
                    PathCircuitState::HalfOpen => {
                        if !breaker.trial_in_flight {
                            breaker.trial_in_flight = true;
                            Some(CircuitDecision::Proceed)
                        } else {
                            should_poll = true;
                            None
                        }
                    }
                }
            };

            if opened_to_half_open {
                ErrorLogger::log_circuit_transition(server, path.label(), "OPEN", "HALF_OPEN");
                crate::core::metrics::global_metrics()
                    .record_circuit_transition(server, path.label(), "HALF_OPEN")
                    .await;
            }
            if let Some(decision) = outcome {
                return decision;
            }
            if should_poll {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }

    /// Record the outcome of a probe run under a prior `Proceed` decision.
    pub async fn record(&self, server: &str, path: ProbePath, success: bool) {
        let transition = {
            let mut servers = self.servers.write().await;
            let circuit = servers
                .entry(server.to_string())
                .or_insert_with(ServerCircuit::new);
            let now = now_millis();
            let breaker = circuit.path_mut(path);
            let from = breaker.state;

            if success {
                breaker.consecutive_failures = 0;
                breaker.trial_in_flight = false;
                breaker.state = PathCircuitState::Closed;
                breaker.opened_at = None;
            } else {
                breaker.consecutive_failures += 1;
                match breaker.state {
                    PathCircuitState::HalfOpen => {
                        breaker.state = PathCircuitState::Open;
                        breaker.opened_at = Some(now);
                        breaker.trial_in_flight = false;
                    }
                    PathCircuitState::Closed if breaker.consecutive_failures >= self.failure_threshold => {
                        breaker.state = PathCircuitState::Open;
                        breaker.opened_at = Some(now);
                    }
                    _ => {}
                }
            }

            if from != breaker.state {
                circuit.last_change_at = now;
                Some((from, breaker.state))
            } else {
                None
            }
        };

        if let Some((from, to)) = transition {
            ErrorLogger::log_circuit_transition(server, path.label(), state_label(from), state_label(to));
            crate::core::metrics::global_metrics()
                .record_circuit_transition(server, path.label(), state_label(to))
                .await;
        }
    }

    /// Current circuit snapshot for `server`, as exposed by the registry.
    pub async fn snapshot(&self, server: &str) -> CircuitState {
        let mut servers = self.servers.write().await;
        let circuit = servers
            .entry(server.to_string())
            .or_insert_with(ServerCircuit::new);
        CircuitState {
            mcp_state: circuit.mcp.state,
            rest_state: circuit.rest.state,
            overall_state: circuit.overall(),
            last_change_at: circuit.last_change_at,
        }
    }
}

fn state_label(state: PathCircuitState) -> &'static str {
    match state {
        PathCircuitState::Closed => "CLOSED",
        PathCircuitState::Open => "OPEN",
        PathCircuitState::HalfOpen => "HALF_OPEN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn closed_allows_probes_and_tolerates_occasional_failure() {
        let breaker = DualCircuitBreaker::new(3, Duration::from_millis(50));
        assert_eq!(breaker.check("svc", ProbePath::Mcp).await, CircuitDecision::Proceed);
        breaker.record("svc", ProbePath::Mcp, false).await;
        assert_eq!(breaker.check("svc", ProbePath::Mcp).await, CircuitDecision::Proceed);
        let snapshot = breaker.snapshot("svc").await;
        assert_eq!(snapshot.mcp_state, PathCircuitState::Closed);
    }

    #[tokio::test]
    async fn threshold_failures_open_the_breaker() {
        let breaker = DualCircuitBreaker::new(2, Duration::from_secs(30));
        breaker.record("svc", ProbePath::Mcp, false).await;
        breaker.record("svc", ProbePath::Mcp, false).await;
        assert_eq!(breaker.check("svc", ProbePath::Mcp).await, CircuitDecision::ShortCircuited);
        let snapshot = breaker.snapshot("svc").await;
        assert_eq!(snapshot.mcp_state, PathCircuitState::Open);
    }

    #[tokio::test]
    async fn half_open_trial_succeeds_and_closes() {
        let breaker = DualCircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record("svc", ProbePath::Mcp, false).await;
        assert_eq!(breaker.snapshot("svc").await.mcp_state, PathCircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(breaker.check("svc", ProbePath::Mcp).await, CircuitDecision::Proceed);
        assert_eq!(breaker.snapshot("svc").await.mcp_state, PathCircuitState::HalfOpen);

        breaker.record("svc", ProbePath::Mcp, true).await;
        assert_eq!(breaker.snapshot("svc").await.mcp_state, PathCircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_trial_failure_reopens() {
        let breaker = DualCircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record("svc", ProbePath::Rest, false).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(breaker.check("svc", ProbePath::Rest).await, CircuitDecision::Proceed);
        breaker.record("svc", ProbePath::Rest, false).await;
        assert_eq!(breaker.snapshot("svc").await.rest_state, PathCircuitState::Open);
    }

    #[tokio::test]
    async fn concurrent_waiters_coalesce_on_the_trial() {
        let breaker = Arc::new(DualCircuitBreaker::new(1, Duration::from_millis(10)));
        breaker.record("svc", ProbePath::Mcp, false).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let trial = breaker.clone();
        let trial_handle = tokio::spawn(async move {
            let decision = trial.check("svc", ProbePath::Mcp).await;
            assert_eq!(decision, CircuitDecision::Proceed);
            tokio::time::sleep(Duration::from_millis(30)).await;
            trial.record("svc", ProbePath::Mcp, true).await;
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        let waiter = breaker.clone();
        let waiter_handle = tokio::spawn(async move { waiter.check("svc", ProbePath::Mcp).await });

        trial_handle.await.unwrap();
        let waiter_decision = waiter_handle.await.unwrap();
        assert_eq!(waiter_decision, CircuitDecision::Proceed);
        assert_eq!(breaker.snapshot("svc").await.mcp_state, PathCircuitState::Closed);
    }

    #[tokio::test]
    async fn overall_state_reports_partial_availability() {
        let breaker = DualCircuitBreaker::new(1, Duration::from_secs(30));
        breaker.record("svc", ProbePath::Mcp, false).await;
        let snapshot = breaker.snapshot("svc").await;
        assert_eq!(snapshot.overall_state, CircuitOverallState::RestOnly);
    }
}
