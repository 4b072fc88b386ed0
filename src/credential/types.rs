//! OAuth2/OIDC wire types used by discovery and the token endpoint.
//!
//! Trimmed from the full OAuth 2.1 authorization-code-flow type set down to
//! what a client-credentials grant needs: provider metadata (to locate the
//! token endpoint) and the token/error response shapes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// OpenID Connect Provider Metadata (subset relevant to client-credentials).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenIDProviderMetadata {
    pub issuer: String,
    pub token_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

/// OAuth 2.0 Token Response (RFC 6749 §5.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

/// OAuth 2.0 Error Response (RFC 6749 §5.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2Error {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}
