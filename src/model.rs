//! Core data model: server configuration, probe results, and the derived
//! dual health verdict (spec §3).

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::core::error::{HealthError, HealthResult};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Authentication material to attach to probes of one server.
///
/// A tagged variant over the auth mechanisms a server may require. `NONE`
/// attaches no headers; the dynamic variants (`Jwt`, `OAuth2`) are managed by
/// [`crate::credential::CredentialProvider`], which refreshes the underlying
/// [`TokenInfo`] on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthConfig {
    None,
    Jwt {
        /// A static token, used as-is when present.
        static_token: Option<String>,
        client_id: Option<String>,
        client_secret: Option<String>,
        discovery_url: Option<String>,
        #[serde(default = "default_refresh_buffer")]
        refresh_buffer_seconds: u64,
        #[serde(default = "default_max_refresh_attempts")]
        max_refresh_attempts: u32,
    },
    Bearer {
        token: String,
    },
    ApiKey {
        key: String,
        header_name: String,
    },
    Basic {
        username: String,
        password: String,
    },
    OAuth2 {
        token_url: String,
        client_id: String,
        client_secret: String,
        #[serde(default)]
        scopes: Vec<String>,
        #[serde(default = "default_refresh_buffer")]
        refresh_buffer_seconds: u64,
        #[serde(default = "default_max_refresh_attempts")]
        max_refresh_attempts: u32,
    },
    CustomHeaders {
        headers: HashMap<String, String>,
    },
}

fn default_refresh_buffer() -> u64 {
    30
}

fn default_max_refresh_attempts() -> u32 {
    3
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig::None
    }
}

impl AuthConfig {
    /// Validate the cross-field invariants from spec §3.
    pub fn validate(&self) -> HealthResult<()> {
        match self {
            AuthConfig::None
            | AuthConfig::Bearer { .. }
            | AuthConfig::Basic { .. }
            | AuthConfig::CustomHeaders { .. } => Ok(()),
            AuthConfig::Jwt {
                static_token,
                client_id,
                client_secret,
                discovery_url,
                max_refresh_attempts,
                ..
            } => {
                let has_static = static_token.is_some();
                let has_client_creds =
                    client_id.is_some() && client_secret.is_some() && discovery_url.is_some();
                if !has_static && !has_client_creds {
                    return Err(HealthError::config(
                        "JWT auth requires a static_token or (client_id, client_secret, discovery_url)",
                    ));
                }
                if *max_refresh_attempts < 1 {
                    return Err(HealthError::config("max_refresh_attempts must be >= 1"));
                }
                Ok(())
            }
            AuthConfig::ApiKey { key, header_name } => {
                if key.is_empty() || header_name.is_empty() {
                    return Err(HealthError::config(
                        "API_KEY auth requires non-empty key and header_name",
                    ));
                }
                Ok(())
            }
            AuthConfig::OAuth2 {
                token_url,
                client_id,
                client_secret,
                max_refresh_attempts,
                ..
            } => {
                if token_url.is_empty() || client_id.is_empty() || client_secret.is_empty() {
                    return Err(HealthError::config(
                        "OAUTH2 auth requires token_url, client_id, client_secret",
                    ));
                }
                if *max_refresh_attempts < 1 {
                    return Err(HealthError::config("max_refresh_attempts must be >= 1"));
                }
                Ok(())
            }
        }
    }

    /// Whether this variant is dynamically refreshed (vs. static/none).
    pub fn is_dynamic(&self) -> bool {
        matches!(self, AuthConfig::Jwt { .. } | AuthConfig::OAuth2 { .. })
    }
}

/// A cached credential, refreshed by the [`crate::credential::CredentialProvider`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub value: String,
    pub expires_at: Option<u64>,
    pub issued_at: u64,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl TokenInfo {
    pub fn new(value: impl Into<String>, expires_at: Option<u64>) -> Self {
        Self {
            value: value.into(),
            expires_at,
            issued_at: now_millis(),
            scopes: Vec::new(),
        }
    }

    /// `now + buffer >= expires_at` (spec §3); tokens with no expiry never expire.
    pub fn is_expired(&self, buffer_seconds: u64, now_ms: u64) -> bool {
        match self.expires_at {
            Some(expires_at) => now_ms + buffer_seconds * 1000 >= expires_at,
            None => false,
        }
    }
}

/// One monitored server (spec §3 "ServerConfig").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub mcp_endpoint_url: String,
    pub rest_health_endpoint_url: String,
    #[serde(default = "default_true")]
    pub mcp_enabled: bool,
    #[serde(default = "default_true")]
    pub rest_enabled: bool,
    #[serde(default)]
    pub mcp_expected_tools: Vec<String>,
    #[serde(default = "default_mcp_timeout_ms")]
    pub mcp_timeout_ms: u64,
    #[serde(default = "default_rest_timeout_ms")]
    pub rest_timeout_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub mcp_retry_attempts: u32,
    #[serde(default = "default_retry_attempts")]
    pub rest_retry_attempts: u32,
    #[serde(default = "default_mcp_weight")]
    pub mcp_priority_weight: f64,
    #[serde(default = "default_rest_weight")]
    pub rest_priority_weight: f64,
    #[serde(default)]
    pub require_both_success_for_healthy: bool,
    #[serde(default)]
    pub auth_config: AuthConfig,
    /// Supplementary static headers merged in after computed auth headers
    /// (SPEC_FULL.md §"SUPPLEMENTED FEATURES" item 2).
    #[serde(default)]
    pub static_auth_headers: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_mcp_timeout_ms() -> u64 {
    10_000
}

fn default_rest_timeout_ms() -> u64 {
    8_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_mcp_weight() -> f64 {
    0.6
}

fn default_rest_weight() -> f64 {
    0.4
}

fn is_valid_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

impl ServerConfig {
    /// Validate the per-field and cross-field invariants from spec §3.
    pub fn validate(&self) -> HealthResult<()> {
        let len = self.name.chars().count();
        if !(3..=64).contains(&len) {
            return Err(HealthError::config(format!(
                "server name '{}' must be 3-64 chars",
                self.name
            )));
        }
        if !self.name.chars().all(is_valid_name_char) {
            return Err(HealthError::config(format!(
                "server name '{}' contains invalid characters",
                self.name
            )));
        }
        if self.name.starts_with('-') || self.name.ends_with('-') {
            return Err(HealthError::config(format!(
                "server name '{}' must not start/end with '-'",
                self.name
            )));
        }
        if !self.mcp_enabled && !self.rest_enabled {
            return Err(HealthError::config(format!(
                "server '{}' must enable at least one of mcp/rest",
                self.name
            )));
        }
        for (label, url) in [
            ("mcp_endpoint_url", &self.mcp_endpoint_url),
            ("rest_health_endpoint_url", &self.rest_health_endpoint_url),
        ] {
            let parsed = url::Url::parse(url)
                .map_err(|e| HealthError::config(format!("{label} invalid: {e}")))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(HealthError::config(format!(
                    "{label} must be http(s), got '{}'",
                    parsed.scheme()
                )));
            }
        }
        if self.mcp_timeout_ms == 0 || self.rest_timeout_ms == 0 {
            return Err(HealthError::config("timeouts must be positive"));
        }
        if !(0.0..=1.0).contains(&self.mcp_priority_weight)
            || !(0.0..=1.0).contains(&self.rest_priority_weight)
        {
            return Err(HealthError::config("priority weights must be in [0,1]"));
        }
        if self.mcp_priority_weight + self.rest_priority_weight > 1.0 + f64::EPSILON {
            return Err(HealthError::config("priority weights must sum to <= 1"));
        }
        self.auth_config.validate()?;
        Ok(())
    }

    /// Expected tools as a set (spec treats membership as order-insensitive).
    pub fn expected_tools_set(&self) -> HashSet<&str> {
        self.mcp_expected_tools.iter().map(String::as_str).collect()
    }
}

/// A validation error attached to a probe result body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validation outcome embedded in an [`MCPProbeResult`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpValidation {
    pub is_valid: bool,
    pub schemas_ok: bool,
    #[serde(default)]
    pub errors: Vec<ValidationIssue>,
}

/// A JSON-RPC `error` object surfaced by an MCP probe (spec §4.2.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Result of a single MCP `tools/list` probe (spec §3/§4.2.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPProbeResult {
    pub server_name: String,
    pub timestamp: u64,
    pub success: bool,
    pub latency_ms: u64,
    pub request_id: String,
    pub jsonrpc_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools_count: Option<usize>,
    #[serde(default)]
    pub expected_tools_found: Vec<String>,
    #[serde(default)]
    pub missing_tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_error: Option<McpErrorObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<McpValidation>,
}

/// Validation outcome embedded in a [`RESTProbeResult`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RestValidation {
    pub has_status_field: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_value: Option<String>,
    #[serde(default)]
    pub errors: Vec<ValidationIssue>,
}

/// Result of a single REST `GET /health` probe (spec §3/§4.2.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RESTProbeResult {
    pub server_name: String,
    pub timestamp: u64,
    pub success: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub body_truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<RestValidation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_error: Option<String>,
}

/// Overall health verdict for a server, derived by the aggregation rule
/// in spec §4.3 (only ever one of these four values).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// The canonical per-server, per-cycle record (spec §3 "DualHealthResult").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DualHealthResult {
    pub server_name: String,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_result: Option<MCPProbeResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rest_result: Option<RESTProbeResult>,
    pub mcp_success: bool,
    pub rest_success: bool,
    pub overall_status: OverallStatus,
    pub overall_success: bool,
    pub combined_latency_ms: u64,
    pub health_score: f64,
    pub available_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
}

impl DualHealthResult {
    /// Check invariant 1/3 from spec §8 — useful in tests and assertions
    /// elsewhere in the crate, not load-bearing at runtime.
    ///
    /// Invariant 1 (`overall_success` implies `overall_status` is HEALTHY or
    /// DEGRADED) does not hold in general: with `require_both = false`,
    /// `overall_success` is defined as `mcp_success || rest_success`
    /// independently of `health_score`, so a server with one path failed and
    /// the other succeeding can legitimately score below the failure
    /// threshold (UNHEALTHY) while still reporting `overall_success = true`
    /// — REST succeeding with MCP failing on a missing tool is exactly this
    /// case. `DualHealthResult`s built from that scenario will fail this
    /// check by design; this method is not invoked anywhere in the
    /// production probe/aggregate path, only by callers who want the
    /// stricter reading of invariant 1.
    pub fn check_invariants(&self, require_both: bool) -> HealthResult<()> {
        let success_implies_status = !self.overall_success
            || matches!(self.overall_status, OverallStatus::Healthy | OverallStatus::Degraded);
        if !success_implies_status {
            return Err(HealthError::internal(
                "overall_success true but overall_status neither HEALTHY nor DEGRADED",
            ));
        }
        if require_both
            && self.overall_status == OverallStatus::Healthy
            && !(self.mcp_success && self.rest_success)
        {
            return Err(HealthError::internal(
                "require_both_success_for_healthy violated: HEALTHY without both paths succeeding",
            ));
        }
        Ok(())
    }
}

/// Per-path circuit breaker state (spec §3/§4.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PathCircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Derived overall circuit state across both paths.
///
/// Partial availability (`McpOnly`/`RestOnly`) is surfaced here as its own
/// variant rather than folded into `Degraded`, per the Open Question
/// decision recorded in SPEC_FULL.md / DESIGN.md: operators can distinguish
/// "one path fully down" from "both paths flaky".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitOverallState {
    Closed,
    Open,
    McpOnly,
    RestOnly,
    Degraded,
}

/// Full per-server circuit state snapshot (read-only view; the live
/// breaker lives in [`crate::circuit::DualCircuitBreaker`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitState {
    pub mcp_state: PathCircuitState,
    pub rest_state: PathCircuitState,
    pub overall_state: CircuitOverallState,
    pub last_change_at: u64,
}

/// One sample recorded in a [`crate::registry::MetricsWindow`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: u64,
    pub success: bool,
    pub latency_ms: u64,
    pub error_kind: Option<String>,
}

pub(crate) fn current_timestamp_ms() -> u64 {
    now_millis()
}
