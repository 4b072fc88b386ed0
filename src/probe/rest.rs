//! REST probe: a single `GET /health` request (spec §4.2.2).

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use reqwest::Client;

use crate::core::error::HealthError;
use crate::model::{RESTProbeResult, RestValidation, ServerConfig, ValidationIssue};

const MAX_BODY_BYTES: usize = 16 * 1024;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Execute one REST `GET /health` probe. Never propagates an error out —
/// every failure is folded into the returned [`RESTProbeResult`].
pub async fn probe_rest(
    client: &Client,
    server: &ServerConfig,
    auth_headers: &HashMap<String, String>,
) -> RESTProbeResult {
    let started = Instant::now();
    let timestamp = now_millis();

    let mut request = client
        .get(&server.rest_health_endpoint_url)
        .timeout(Duration::from_millis(server.rest_timeout_ms))
        .header("Accept", "application/json");
    for (key, value) in auth_headers {
        request = request.header(key, value);
    }

    let response = match request.send().await {
        Ok(resp) => resp,
        Err(err) => {
            let message = if err.is_redirect() {
                "too many redirects".to_string()
            } else {
                err.to_string()
            };
            return RESTProbeResult {
                server_name: server.name.clone(),
                timestamp,
                success: false,
                latency_ms: started.elapsed().as_millis() as u64,
                http_status: None,
                body: None,
                body_truncated: false,
                validation: None,
                connection_error: Some(message),
            };
        }
    };

    let status = response.status();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body_text = match response.text().await {
        Ok(text) => text,
        Err(err) => {
            return RESTProbeResult {
                server_name: server.name.clone(),
                timestamp,
                success: false,
                latency_ms: started.elapsed().as_millis() as u64,
                http_status: Some(status.as_u16()),
                body: None,
                body_truncated: false,
                validation: None,
                connection_error: Some(err.to_string()),
            };
        }
    };

    let latency_ms = started.elapsed().as_millis() as u64;
    let status_ok = (200..300).contains(&status.as_u16());
    let body_truncated = body_text.len() > MAX_BODY_BYTES;
    let body = Some(body_text.chars().take(MAX_BODY_BYTES).collect::<String>());

    let is_json = content_type
        .as_deref()
        .map(|ct| ct.contains("application/json"))
        .unwrap_or(false);

    if !is_json {
        // Missing/non-JSON Content-Type with a 2xx status is success with a
        // warning (spec §4.2.2 edge case); anything else is a plain HTTP
        // failure with no body to validate.
        let mut errors = Vec::new();
        if status_ok && content_type.is_none() {
            errors.push(ValidationIssue::new(
                "content_type",
                "missing Content-Type header, assuming healthy",
            ));
        }
        return RESTProbeResult {
            server_name: server.name.clone(),
            timestamp,
            success: status_ok,
            latency_ms,
            http_status: Some(status.as_u16()),
            body,
            body_truncated,
            validation: Some(RestValidation {
                has_status_field: false,
                status_value: None,
                errors,
            }),
            connection_error: None,
        };
    }

    let parsed: Result<serde_json::Value, _> = serde_json::from_str(&body_text);
    let value = match parsed {
        Ok(v) => v,
        Err(e) => {
            return RESTProbeResult {
                server_name: server.name.clone(),
                timestamp,
                success: false,
                latency_ms,
                http_status: Some(status.as_u16()),
                body,
                body_truncated,
                validation: Some(RestValidation {
                    has_status_field: false,
                    status_value: None,
                    errors: vec![ValidationIssue::new("body", format!("invalid JSON: {e}"))],
                }),
                connection_error: None,
            };
        }
    };

    let status_field = value.get("status").and_then(serde_json::Value::as_str);
    let mut errors = Vec::new();
    let mut success = status_ok;

    match status_field {
        Some(s) if s.eq_ignore_ascii_case("healthy") => {}
        Some(s) if s.eq_ignore_ascii_case("degraded") => {
            errors.push(ValidationIssue::new("status", "reported degraded"));
        }
        Some(other) => {
            errors.push(ValidationIssue::new(
                "status",
                format!("unexpected status value \"{other}\""),
            ));
            success = false;
        }
        None => {
            errors.push(ValidationIssue::new("status", "required key missing"));
            success = false;
        }
    }

    RESTProbeResult {
        server_name: server.name.clone(),
        timestamp,
        success,
        latency_ms,
        http_status: Some(status.as_u16()),
        body,
        body_truncated,
        validation: Some(RestValidation {
            has_status_field: status_field.is_some(),
            status_value: status_field.map(str::to_string),
            errors,
        }),
        connection_error: None,
    }
}

/// Classify a probe result into the retry-decision taxonomy for the
/// orchestrator's retry loop (spec §4.3 step 4 / §7).
pub fn classify_failure(result: &RESTProbeResult) -> Option<HealthError> {
    if result.success {
        return None;
    }
    if let Some(conn_err) = &result.connection_error {
        return Some(HealthError::transport(conn_err.clone()));
    }
    match result.http_status {
        Some(status) => Some(HealthError::from_status(status, "rest probe failed")),
        None => Some(HealthError::validation("rest probe validation failed")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: String) -> ServerConfig {
        ServerConfig {
            name: "svc-a".to_string(),
            mcp_endpoint_url: "https://unused.test/mcp".to_string(),
            rest_health_endpoint_url: url,
            mcp_enabled: true,
            rest_enabled: true,
            mcp_expected_tools: vec![],
            mcp_timeout_ms: 2_000,
            rest_timeout_ms: 2_000,
            mcp_retry_attempts: 3,
            rest_retry_attempts: 3,
            mcp_priority_weight: 0.6,
            rest_priority_weight: 0.4,
            require_both_success_for_healthy: false,
            auth_config: crate::model::AuthConfig::None,
            static_auth_headers: Map::new(),
        }
    }

    #[tokio::test]
    async fn healthy_status_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "healthy",
            })))
            .mount(&server)
            .await;

        let client = Client::new();
        let cfg = config(format!("{}/health", server.uri()));
        let result = probe_rest(&client, &cfg, &Map::new()).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn degraded_status_is_success_with_warning() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "degraded",
            })))
            .mount(&server)
            .await;

        let client = Client::new();
        let cfg = config(format!("{}/health", server.uri()));
        let result = probe_rest(&client, &cfg, &Map::new()).await;
        assert!(result.success);
        assert!(!result.validation.unwrap().errors.is_empty());
    }

    #[tokio::test]
    async fn unhealthy_status_value_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "on_fire",
            })))
            .mount(&server)
            .await;

        let client = Client::new();
        let cfg = config(format!("{}/health", server.uri()));
        let result = probe_rest(&client, &cfg, &Map::new()).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn server_error_status_fails_and_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = Client::new();
        let cfg = config(format!("{}/health", server.uri()));
        let result = probe_rest(&client, &cfg, &Map::new()).await;
        assert!(!result.success);
        assert_eq!(result.http_status, Some(500));
        let kind = classify_failure(&result).unwrap();
        assert!(kind.is_recoverable());
    }

    #[tokio::test]
    async fn missing_content_type_with_2xx_is_success_with_warning() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK").insert_header(
                "content-type",
                "text/plain",
            ))
            .mount(&server)
            .await;

        let client = Client::new();
        let cfg = config(format!("{}/health", server.uri()));
        let result = probe_rest(&client, &cfg, &Map::new()).await;
        assert!(result.success);
    }
}
