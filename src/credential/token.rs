//! Client-credentials token acquisition (spec §3 AuthConfig::OAUTH2/JWT,
//! §6 "Token endpoint: client-credentials grant").

use reqwest::Client;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::credential::errors::AuthError;
use crate::credential::types::{OAuth2Error, TokenResponse};
use crate::model::TokenInfo;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// POST a `grant_type=client_credentials` request to `token_url` and
/// translate the response into a [`TokenInfo`].
pub async fn client_credentials_grant(
    client: &Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    scopes: &[String],
) -> Result<TokenInfo, AuthError> {
    let mut params = vec![
        ("grant_type".to_string(), "client_credentials".to_string()),
        ("client_id".to_string(), client_id.to_string()),
        ("client_secret".to_string(), client_secret.to_string()),
    ];
    if !scopes.is_empty() {
        params.push(("scope".to_string(), scopes.join(" ")));
    }

    let response = client
        .post(token_url)
        .form(&params)
        .send()
        .await
        .map_err(|e| AuthError::HttpError(e.to_string()))?;

    if !response.status().is_success() {
        let body = response.text().await.unwrap_or_default();
        if let Ok(oauth_error) = serde_json::from_str::<OAuth2Error>(&body) {
            return Err(AuthError::OAuthError {
                error: oauth_error.error,
                description: oauth_error.error_description,
                uri: oauth_error.error_uri,
            });
        }
        return Err(AuthError::HttpError(body));
    }

    let token_response: TokenResponse = response
        .json()
        .await
        .map_err(|e| AuthError::HttpError(format!("invalid token response: {e}")))?;

    let now = now_millis();
    let expires_at = token_response.expires_in.map(|secs| now + secs * 1000);
    let mut token = TokenInfo::new(token_response.access_token, expires_at);
    if let Some(scope) = token_response.scope {
        token.scopes = scope.split_whitespace().map(str::to_string).collect();
    }
    Ok(token)
}
