//! OAuth flow errors.

use thiserror::Error;

use crate::state_cache::StateCacheError;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("authorization state '{state}' is unknown or expired")]
    StateNotFound { state: String },

    #[error("authorization '{authorization_id}' not found")]
    AuthorizationNotFound { authorization_id: String },

    #[error("token exchange failed ({error}): {description}")]
    TokenExchange { error: String, description: String },

    #[error("token refresh failed ({error}): {description}")]
    TokenRefresh { error: String, description: String },

    #[error("app with client id '{client_id}' has no access token")]
    NoAccessToken { client_id: String },

    #[error("no accepted api version (last status {status}, tried {tried:?})")]
    ApiVersionExhausted {
        status: u16,
        tried: Vec<String>,
        body: String,
    },

    #[error("transient failure calling {target}: {message}")]
    Transient { target: String, message: String },

    #[error("invalid endpoint '{value}': {source}")]
    InvalidEndpoint {
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("cannot build callback url: {0}")]
    Callback(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    StateCache(#[from] StateCacheError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl OAuthError {
    pub fn is_transient(&self) -> bool {
        matches!(self, OAuthError::Transient { .. })
    }

    pub(crate) fn invalid_endpoint(value: &str, source: url::ParseError) -> Self {
        OAuthError::InvalidEndpoint {
            value: value.to_string(),
            source,
        }
    }

    pub(crate) fn transient(target: impl Into<String>, err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "request timed out".to_string()
        } else {
            err.to_string()
        };
        OAuthError::Transient {
            target: target.into(),
            message,
        }
    }
}

/// Mask a secret-ish value for logs, keeping only the last three characters
pub fn mask_tail(value: &str) -> String {
    let count = value.chars().count();
    if count <= 3 {
        return "***".to_string();
    }
    let tail: String = value.chars().skip(count - 3).collect();
    format!("***{}", tail)
}
