//! Credential-provider-specific error types, folded into [`HealthError`]
//! at the boundary rather than crossing component lines on their own.

use std::fmt;

use crate::core::error::HealthError;

/// Errors specific to acquiring or refreshing credentials.
#[derive(Debug, Clone)]
pub enum AuthError {
    /// The cached token expired and no refresh path is configured.
    TokenExpired,
    /// Discovery document fetch or parse failed.
    DiscoveryFailed(String),
    /// The token endpoint returned an OAuth2 error response.
    OAuthError {
        error: String,
        description: Option<String>,
        uri: Option<String>,
    },
    /// Transport-level failure talking to the token endpoint.
    HttpError(String),
    /// Static configuration is missing required fields.
    ConfigError(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenExpired => write!(f, "access token has expired"),
            Self::DiscoveryFailed(msg) => write!(f, "discovery failed: {msg}"),
            Self::OAuthError {
                error,
                description,
                uri,
            } => {
                write!(f, "oauth error: {error}")?;
                if let Some(desc) = description {
                    write!(f, " - {desc}")?;
                }
                if let Some(uri) = uri {
                    write!(f, " (see: {uri})")?;
                }
                Ok(())
            }
            Self::HttpError(msg) => write!(f, "http error: {msg}"),
            Self::ConfigError(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<AuthError> for HealthError {
    fn from(err: AuthError) -> Self {
        HealthError::Auth(err.to_string())
    }
}
