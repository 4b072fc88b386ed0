//! Credential Provider (C1): acquires, caches, and refreshes per-server
//! authentication material, with single-flight refresh coalescing across
//! concurrent probes (spec §4.1).

pub mod discovery;
pub mod errors;
pub mod token;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use reqwest::Client;
use tokio::sync::{Mutex, RwLock};

use crate::core::error::{HealthError, HealthResult};
use crate::core::logging::ErrorContext;
use crate::model::{AuthConfig, ServerConfig, TokenInfo};

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Keyed store of cached tokens with single-flight refresh per server.
///
/// Multiple concurrent probes for the same server may call `ensure_fresh`
/// at once; only the first acquires the per-server refresh lock and talks
/// to the IdP, the rest observe the refreshed cache once it releases
/// (spec §4.1 testable property: the IdP is called exactly once per K
/// concurrent callers).
pub struct CredentialProvider {
    http_client: Client,
    tokens: RwLock<HashMap<String, TokenInfo>>,
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Default for CredentialProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialProvider {
    pub fn new() -> Self {
        Self {
            http_client: Client::new(),
            tokens: RwLock::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Headers to attach to a probe of `config`, synchronous over any
    /// already-cached token (spec §4.1 `AuthHeaders`).
    pub async fn auth_headers(&self, config: &ServerConfig) -> HashMap<String, String> {
        let mut headers = match &config.auth_config {
            AuthConfig::None => HashMap::new(),
            AuthConfig::Bearer { token } => {
                let mut h = HashMap::new();
                h.insert("Authorization".to_string(), format!("Bearer {token}"));
                h
            }
            AuthConfig::ApiKey { key, header_name } => {
                let mut h = HashMap::new();
                h.insert(header_name.clone(), key.clone());
                h
            }
            AuthConfig::Basic { username, password } => {
                let mut h = HashMap::new();
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                h.insert("Authorization".to_string(), format!("Basic {encoded}"));
                h
            }
            AuthConfig::CustomHeaders { headers } => headers.clone(),
            AuthConfig::Jwt { .. } | AuthConfig::OAuth2 { .. } => {
                let tokens = self.tokens.read().await;
                match tokens.get(&config.name) {
                    Some(token) => {
                        let mut h = HashMap::new();
                        h.insert("Authorization".to_string(), format!("Bearer {}", token.value));
                        h
                    }
                    None => HashMap::new(),
                }
            }
        };
        for (k, v) in &config.static_auth_headers {
            headers.insert(k.clone(), v.clone());
        }
        headers
    }

    /// Refresh the cached token for `config` if it is missing or expired
    /// (spec §4.1 `EnsureFresh`). No-op for static/none auth.
    pub async fn ensure_fresh(&self, config: &ServerConfig) -> HealthResult<()> {
        if !config.auth_config.is_dynamic() {
            return Ok(());
        }

        let (buffer_seconds, max_attempts) = match &config.auth_config {
            AuthConfig::Jwt {
                refresh_buffer_seconds,
                max_refresh_attempts,
                ..
            }
            | AuthConfig::OAuth2 {
                refresh_buffer_seconds,
                max_refresh_attempts,
                ..
            } => (*refresh_buffer_seconds, *max_refresh_attempts),
            _ => unreachable!("is_dynamic guards to Jwt/OAuth2 only"),
        };

        if self.has_fresh_token(&config.name, buffer_seconds).await {
            return Ok(());
        }

        let lock = self.refresh_lock_for(&config.name).await;
        let _guard = lock.lock().await;

        // Re-check after acquiring the lock: a concurrent caller may have
        // already completed the refresh while we waited (single-flight).
        if self.has_fresh_token(&config.name, buffer_seconds).await {
            return Ok(());
        }

        let mut last_err = None;
        for attempt in 1..=max_attempts {
            match self.refresh(config).await {
                Ok(token) => {
                    self.tokens.write().await.insert(config.name.clone(), token);
                    return Ok(());
                }
                Err(err) => {
                    let will_retry = attempt < max_attempts;
                    crate::core::logging::ErrorLogger::log_retry_attempt(
                        &err,
                        attempt,
                        max_attempts,
                        will_retry,
                        ErrorContext::new("credential_refresh").with_server(config.name.clone()),
                    )
                    .await;
                    last_err = Some(err);
                    if will_retry {
                        let delay = crate::core::backoff::delay_for_attempt(attempt);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        // Hard expiry: drop any stale cached token so future readers don't
        // attach an unusable Authorization header (spec §4.1).
        self.tokens.write().await.remove(&config.name);
        Err(last_err.unwrap_or_else(|| HealthError::auth("credential refresh failed")))
    }

    async fn has_fresh_token(&self, server: &str, buffer_seconds: u64) -> bool {
        let tokens = self.tokens.read().await;
        match tokens.get(server) {
            Some(token) => !token.is_expired(buffer_seconds, now_millis()),
            None => false,
        }
    }

    async fn refresh_lock_for(&self, server: &str) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .entry(server.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn refresh(&self, config: &ServerConfig) -> HealthResult<TokenInfo> {
        match &config.auth_config {
            AuthConfig::Jwt {
                static_token: Some(token),
                ..
            } => Ok(TokenInfo::new(token.clone(), None)),
            AuthConfig::Jwt {
                client_id: Some(client_id),
                client_secret: Some(client_secret),
                discovery_url: Some(discovery_url),
                ..
            } => {
                let metadata = discovery::discover(&self.http_client, discovery_url)
                    .await
                    .map_err(HealthError::from)?;
                token::client_credentials_grant(
                    &self.http_client,
                    &metadata.token_endpoint,
                    client_id,
                    client_secret,
                    &[],
                )
                .await
                .map_err(HealthError::from)
            }
            AuthConfig::Jwt { .. } => Err(HealthError::config(
                "JWT auth config has neither a static token nor client-credentials fields",
            )),
            AuthConfig::OAuth2 {
                token_url,
                client_id,
                client_secret,
                scopes,
                ..
            } => token::client_credentials_grant(
                &self.http_client,
                token_url,
                client_id,
                client_secret,
                scopes,
            )
            .await
            .map_err(HealthError::from),
            _ => Err(HealthError::internal(
                "refresh() called for a non-dynamic auth config",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn oauth2_config(token_url: String) -> ServerConfig {
        ServerConfig {
            name: "svc-a".to_string(),
            mcp_endpoint_url: "https://example.test/mcp".to_string(),
            rest_health_endpoint_url: "https://example.test/health".to_string(),
            mcp_enabled: true,
            rest_enabled: true,
            mcp_expected_tools: vec![],
            mcp_timeout_ms: 10_000,
            rest_timeout_ms: 8_000,
            mcp_retry_attempts: 3,
            rest_retry_attempts: 3,
            mcp_priority_weight: 0.6,
            rest_priority_weight: 0.4,
            require_both_success_for_healthy: false,
            auth_config: AuthConfig::OAuth2 {
                token_url,
                client_id: "cid".to_string(),
                client_secret: "secret".to_string(),
                scopes: vec![],
                refresh_buffer_seconds: 30,
                max_refresh_attempts: 3,
            },
            static_auth_headers: Map::new(),
        }
    }

    #[tokio::test]
    async fn none_auth_yields_no_headers() {
        let provider = CredentialProvider::new();
        let mut cfg = oauth2_config("http://unused".to_string());
        cfg.auth_config = AuthConfig::None;
        let headers = provider.auth_headers(&cfg).await;
        assert!(headers.is_empty());
    }

    #[tokio::test]
    async fn static_headers_merge_after_computed() {
        let provider = CredentialProvider::new();
        let mut cfg = oauth2_config("http://unused".to_string());
        cfg.auth_config = AuthConfig::Bearer {
            token: "tok".to_string(),
        };
        cfg.static_auth_headers.insert("X-Extra".to_string(), "v".to_string());
        let headers = provider.auth_headers(&cfg).await;
        assert_eq!(headers.get("Authorization"), Some(&"Bearer tok".to_string()));
        assert_eq!(headers.get("X-Extra"), Some(&"v".to_string()));
    }

    #[tokio::test]
    async fn single_flight_refresh_calls_idp_exactly_once() {
        let server = MockServer::start().await;
        let hit_count = Arc::new(AtomicUsize::new(0));
        let counter = hit_count.clone();

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(move |_: &wiremock::Request| {
                counter.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "access_token": "shared-token",
                    "token_type": "Bearer",
                    "expires_in": 3600,
                }))
            })
            .mount(&server)
            .await;

        let provider = Arc::new(CredentialProvider::new());
        let cfg = Arc::new(oauth2_config(format!("{}/token", server.uri())));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let provider = provider.clone();
            let cfg = cfg.clone();
            handles.push(tokio::spawn(async move {
                provider.ensure_fresh(&cfg).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(hit_count.load(Ordering::SeqCst), 1);
        let headers = provider.auth_headers(&cfg).await;
        assert_eq!(
            headers.get("Authorization"),
            Some(&"Bearer shared-token".to_string())
        );
    }

    #[tokio::test]
    async fn refresh_failure_surfaces_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_client",
            })))
            .mount(&server)
            .await;

        let provider = CredentialProvider::new();
        let mut cfg = oauth2_config(format!("{}/token", server.uri()));
        if let AuthConfig::OAuth2 {
            max_refresh_attempts,
            ..
        } = &mut cfg.auth_config
        {
            *max_refresh_attempts = 1;
        }
        let result = provider.ensure_fresh(&cfg).await;
        assert!(result.is_err());
    }
}
