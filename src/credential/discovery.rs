//! Minimal OIDC discovery: spec §6 gives the discovery URL directly (no
//! issuer-guessing or WWW-Authenticate parsing required), so this is a
//! single fetch-and-parse rather than the multi-candidate search a generic
//! OAuth client needs.

use reqwest::Client;

use crate::credential::errors::AuthError;
use crate::credential::types::OpenIDProviderMetadata;

/// Fetch and parse the OpenID Provider metadata document at `discovery_url`.
pub async fn discover(client: &Client, discovery_url: &str) -> Result<OpenIDProviderMetadata, AuthError> {
    let response = client
        .get(discovery_url)
        .send()
        .await
        .map_err(|e| AuthError::DiscoveryFailed(e.to_string()))?;

    if !response.status().is_success() {
        return Err(AuthError::DiscoveryFailed(format!(
            "HTTP {}",
            response.status()
        )));
    }

    response
        .json::<OpenIDProviderMetadata>()
        .await
        .map_err(|e| AuthError::DiscoveryFailed(format!("invalid metadata: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn discover_parses_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": "https://idp.example.test",
                "token_endpoint": "https://idp.example.test/token",
            })))
            .mount(&server)
            .await;

        let client = Client::new();
        let url = format!("{}/.well-known/openid-configuration", server.uri());
        let metadata = discover(&client, &url).await.unwrap();
        assert_eq!(metadata.token_endpoint, "https://idp.example.test/token");
    }

    #[tokio::test]
    async fn discover_surfaces_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = Client::new();
        let url = format!("{}/.well-known/openid-configuration", server.uri());
        assert!(discover(&client, &url).await.is_err());
    }
}
