// Copyright (c) 2025 MCP Rust Contributors
// SPDX-License-Identifier: MIT

//! # dualpath-health
//!
//! A dual-path health check coordinator for fleets of backend agents that
//! speak both the Model Context Protocol (MCP) and a conventional REST
//! health endpoint.
//!
//! Each monitored server is probed on two independent paths every cycle:
//!
//! - **MCP**: a JSON-RPC 2.0 `tools/list` request, validated against the
//!   server's expected tool set.
//! - **REST**: a `GET /health` request, validated against its status body.
//!
//! The two outcomes are combined by a weighted aggregation rule into a
//! single [`model::OverallStatus`], and each path drives its own circuit
//! breaker so a REST outage never masks — or gets masked by — an MCP
//! outage on the same server.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use dualpath_health::prelude::*;
//!
//! # async fn run() -> HealthResult<()> {
//! let orchestrator = Orchestrator::new(
//!     AggregationConfig::default(),
//!     CircuitBreakerConfig::default(),
//!     SchedulerConfig::default(),
//!     RetentionConfig::default(),
//! );
//!
//! let server = ServerConfig {
//!     name: "search-agent".to_string(),
//!     mcp_endpoint_url: "https://search.internal/mcp".to_string(),
//!     rest_health_endpoint_url: "https://search.internal/health".to_string(),
//!     mcp_enabled: true,
//!     rest_enabled: true,
//!     mcp_expected_tools: vec!["search".to_string()],
//!     mcp_timeout_ms: 10_000,
//!     rest_timeout_ms: 8_000,
//!     mcp_retry_attempts: 3,
//!     rest_retry_attempts: 3,
//!     mcp_priority_weight: 0.6,
//!     rest_priority_weight: 0.4,
//!     require_both_success_for_healthy: false,
//!     auth_config: AuthConfig::None,
//!     static_auth_headers: Default::default(),
//! };
//! server.validate()?;
//!
//! let result = orchestrator.run_cycle(&server).await;
//! # let _ = result;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module organization
//!
//! - [`model`]: server configuration, probe results, and the derived dual
//!   health verdict (spec §3).
//! - [`config`]: the YAML configuration document and its validation rules.
//! - [`core`]: cross-cutting error taxonomy, structured logging, backoff,
//!   and ambient metrics.
//! - [`credential`]: per-server credential acquisition and single-flight
//!   refresh for JWT/OAuth2-secured servers.
//! - [`probe`]: the MCP and REST probe clients.
//! - [`circuit`]: the dual, independent per-path circuit breaker.
//! - [`orchestrator`]: runs one probe cycle per server under bounded
//!   concurrency, cancellation, and the aggregation rule.
//! - [`registry`]: holds the latest result and rolling metrics windows per
//!   server, answering the read queries an external HTTP surface would use.

pub mod circuit;
pub mod config;
pub mod core;
pub mod credential;
pub mod model;
pub mod orchestrator;
pub mod probe;
pub mod registry;

pub use core::error::{HealthError, HealthResult};
pub use orchestrator::Orchestrator;

/// Convenient imports for the common case of wiring up an [`Orchestrator`]
/// against a [`config::GlobalConfig`]. Use `use dualpath_health::prelude::*;`.
pub mod prelude {
    pub use crate::circuit::{CircuitDecision, DualCircuitBreaker, ProbePath};
    pub use crate::config::{
        AggregationConfig, AggregationMode, CircuitBreakerConfig, GlobalConfig, RetentionConfig,
        SchedulerConfig,
    };
    pub use crate::core::error::{HealthError, HealthResult};
    pub use crate::credential::CredentialProvider;
    pub use crate::model::{
        AuthConfig, CircuitOverallState, CircuitState, DualHealthResult, MCPProbeResult,
        OverallStatus, PathCircuitState, RESTProbeResult, ServerConfig, TokenInfo,
    };
    pub use crate::orchestrator::Orchestrator;
    pub use crate::registry::{HealthRegistry, ServerMetrics, SystemSummary};
}
