//! # Authenticated Request Engine
//!
//! Sends bearer-authenticated requests to an app's API. An expired access
//! token is refreshed first (serialized through [`RefreshCoordinator`]), and a
//! rejected request is retried with the next API version the provider
//! mentions in its error body, until the candidates run out.

use std::sync::Arc;

use metrics::counter;
use regex::Regex;
use reqwest::Method;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::ApiVersionConfig;
use crate::models::app;
use crate::oauth::{OAuthClient, OAuthError};
use crate::token_refresh::RefreshCoordinator;

const PREVIEW_SUFFIX: &str = "-preview";

/// Which API versions may be tried and in what order
#[derive(Debug, Clone)]
pub struct ApiVersionPolicy {
    default_version: String,
    allowed: Vec<String>,
    exclude_preview: bool,
    version_pattern: Regex,
}

impl ApiVersionPolicy {
    pub fn new(
        default_version: impl Into<String>,
        allowed: Vec<String>,
        exclude_preview: bool,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            default_version: default_version.into(),
            allowed,
            exclude_preview,
            version_pattern: Regex::new(r"\d{4}-\d{2}-\d{2}(?:-preview)?")?,
        })
    }

    pub fn from_config(config: &ApiVersionConfig) -> Result<Self, regex::Error> {
        Self::new(
            config.default_version.clone(),
            config.allowed_versions.clone(),
            config.exclude_preview,
        )
    }

    pub fn default_version(&self) -> &str {
        &self.default_version
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// Upper bound of requests for one call
    pub fn max_attempts(&self) -> usize {
        self.allowed.len() + 1
    }

    /// Allowed versions mentioned in `body`, in allowed-list order
    pub fn candidates(&self, body: &str) -> Vec<&str> {
        let mentioned: Vec<&str> = self
            .version_pattern
            .find_iter(body)
            .map(|m| m.as_str())
            .collect();

        self.allowed
            .iter()
            .map(String::as_str)
            .filter(|v| !(self.exclude_preview && v.ends_with(PREVIEW_SUFFIX)))
            .filter(|v| mentioned.contains(v))
            .collect()
    }

    /// The version to try after `current` was rejected with `body`.
    ///
    /// Takes the first untried candidate following `current`, wrapping to
    /// the start of the list; if `current` is not a candidate the search
    /// starts at the beginning.
    pub fn next_version(&self, current: &str, body: &str, tried: &[String]) -> Option<String> {
        let candidates = self.candidates(body);
        let start = candidates
            .iter()
            .position(|v| *v == current)
            .map(|i| i + 1)
            .unwrap_or(0);

        candidates
            .iter()
            .cycle()
            .skip(start)
            .take(candidates.len())
            .find(|v| **v != current && !tried.iter().any(|t| t == *v))
            .map(|v| v.to_string())
    }
}

/// One call against an app's API
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Path relative to the app's API base URI
    pub path: String,
    pub api_version: Option<String>,
    pub method: Method,
    pub body: Map<String, Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            api_version: None,
            method: Method::GET,
            body: Map::new(),
        }
    }
}

pub struct AuthenticatedRequestEngine {
    policy: ApiVersionPolicy,
    coordinator: Arc<RefreshCoordinator>,
}

impl AuthenticatedRequestEngine {
    pub fn new(policy: ApiVersionPolicy, coordinator: Arc<RefreshCoordinator>) -> Self {
        Self {
            policy,
            coordinator,
        }
    }

    pub fn policy(&self) -> &ApiVersionPolicy {
        &self.policy
    }

    /// Send `request` on behalf of `app`, returning the parsed response.
    ///
    /// A response carrying a `value` field yields that field; an empty body
    /// yields `Null`.
    pub async fn send(
        &self,
        client: &OAuthClient,
        app: &app::Model,
        request: ApiRequest,
    ) -> Result<Value, OAuthError> {
        if !app.is_authorized() {
            return Err(OAuthError::NoAccessToken {
                client_id: app.client_id.clone(),
            });
        }

        let mut authorization = client
            .get_authorization(&app.authorization_id)
            .await?
            .ok_or_else(|| OAuthError::AuthorizationNotFound {
                authorization_id: app.authorization_id.clone(),
            })?;

        if authorization.has_expired() {
            debug!(app = %app.name, "Access token expired, refreshing before request");
            authorization = self
                .coordinator
                .refresh_if_expired(client, &app.authorization_id)
                .await?
                .authorization;
        }

        let mut version = request
            .api_version
            .clone()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.policy.default_version.clone());
        let mut tried: Vec<String> = Vec::new();

        loop {
            let mut outbound = client.build_authenticated_request(
                &authorization,
                &request.path,
                request.method.clone(),
                &request.body,
            )?;
            outbound
                .url_mut()
                .query_pairs_mut()
                .append_pair("api-version", &version);

            let target = outbound.url().to_string();
            let response = client
                .http()
                .execute(outbound)
                .await
                .map_err(|e| OAuthError::transient(target.as_str(), &e))?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| OAuthError::transient(target.as_str(), &e))?;
            tried.push(version.clone());

            if status.is_success() {
                return unwrap_collection(&body);
            }

            let next = if tried.len() < self.policy.max_attempts() {
                self.policy.next_version(&version, &body, &tried)
            } else {
                None
            };

            match next {
                Some(next) => {
                    info!(
                        app = %app.name,
                        status = status.as_u16(),
                        rejected = %version,
                        retry_with = %next,
                        "Retrying request with another api version"
                    );
                    counter!("api_version_retries_total", "kind" => client.kind().as_str())
                        .increment(1);
                    version = next;
                }
                None => {
                    warn!(
                        app = %app.name,
                        status = status.as_u16(),
                        tried = ?tried,
                        "No accepted api version"
                    );
                    counter!("api_version_exhausted_total", "kind" => client.kind().as_str())
                        .increment(1);
                    return Err(OAuthError::ApiVersionExhausted {
                        status: status.as_u16(),
                        tried,
                        body,
                    });
                }
            }
        }
    }
}

fn unwrap_collection(body: &str) -> Result<Value, OAuthError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    let parsed: Value = serde_json::from_str(body)
        .map_err(|e| OAuthError::InvalidResponse(format!("api response: {}", e)))?;
    match parsed {
        Value::Object(mut fields) if fields.contains_key("value") => {
            Ok(fields.remove("value").unwrap_or(Value::Null))
        }
        other => Ok(other),
    }
}
