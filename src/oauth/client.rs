//! OAuth2 authorization-code client.
//!
//! One [`OAuthClient`] is bound to an app (the "service") and its provider.
//! It starts authorizations, finishes them from the provider callback,
//! refreshes tokens and builds bearer-authenticated API requests. Per-kind
//! differences come from [`ClientKind`]; everything else is shared.

use std::sync::Arc;

use chrono::{Duration, Utc};
use metrics::counter;
use oauth2::basic::BasicErrorResponse;
use oauth2::{AccessToken, ClientSecret, RefreshToken};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use url::Url;

use super::authorization::{Authorization, TokenGrant, authorization_id_for};
use super::callback::{CallbackAction, CallbackUrlBuilder};
use super::error::{OAuthError, mask_tail};
use super::kind::{AUTHORIZE_PATH, ClientKind, RESOURCE_OWNER_PATH, TOKEN_PATH, derive_endpoint};
use crate::config::OAuthConfig;
use crate::models::{app, provider};
use crate::repositories::AuthorizationRepository;
use crate::state_cache::{PendingAuthorization, StateCache, generate_state_token};

/// Query parameter carrying the authorization id on the return-to URI
pub const AUTHORIZATION_ID_QUERY_PARAMETER: &str = "oauth2_authorization_id";

/// Extract the authorization id appended by [`OAuthClient::finish_authorization`]
pub fn authorization_id_from_return_uri(uri: &Url) -> Option<String> {
    uri.query_pairs()
        .find(|(key, _)| key == AUTHORIZATION_ID_QUERY_PARAMETER)
        .map(|(_, value)| value.into_owned())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: AccessToken,
    #[serde(default)]
    refresh_token: Option<RefreshToken>,
    #[serde(default, deserialize_with = "deserialize_expires_in")]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

/// Azure v1 endpoints send `expires_in` as a string
fn deserialize_expires_in<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(seconds)) => Ok(Some(seconds)),
        Some(Raw::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenStage {
    Exchange,
    Refresh,
}

impl TokenStage {
    fn error(self, error: String, description: String) -> OAuthError {
        match self {
            TokenStage::Exchange => OAuthError::TokenExchange { error, description },
            TokenStage::Refresh => OAuthError::TokenRefresh { error, description },
        }
    }

    fn label(self) -> &'static str {
        match self {
            TokenStage::Exchange => "exchange",
            TokenStage::Refresh => "refresh",
        }
    }
}

/// Split a token endpoint error body into (error code, description)
fn parse_error_body(status: StatusCode, body: &str) -> (String, String) {
    match serde_json::from_str::<BasicErrorResponse>(body) {
        Ok(parsed) => (
            parsed.error().as_ref().to_string(),
            parsed
                .error_description()
                .cloned()
                .unwrap_or_else(|| parsed.error().as_ref().to_string()),
        ),
        Err(_) => {
            let snippet: String = body.chars().take(200).collect();
            (
                status.as_u16().to_string(),
                if snippet.is_empty() {
                    status.to_string()
                } else {
                    snippet
                },
            )
        }
    }
}

/// Builds [`OAuthClient`]s for app/provider pairs
#[derive(Clone)]
pub struct OAuthClientFactory {
    http: reqwest::Client,
    authorizations: AuthorizationRepository,
    state_cache: Arc<dyn StateCache>,
    callbacks: Arc<dyn CallbackUrlBuilder>,
    state_ttl: Duration,
}

impl OAuthClientFactory {
    pub fn new(
        config: &OAuthConfig,
        authorizations: AuthorizationRepository,
        state_cache: Arc<dyn StateCache>,
        callbacks: Arc<dyn CallbackUrlBuilder>,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.http_timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            authorizations,
            state_cache,
            callbacks,
            state_ttl: Duration::seconds(config.state_ttl_seconds as i64),
        })
    }

    pub fn for_app(&self, app: &app::Model, provider: &provider::Model) -> OAuthClient {
        OAuthClient {
            kind: provider.client_kind,
            service_name: app.name.clone(),
            authentication_endpoint: provider.authentication_endpoint.clone(),
            api_base_uri: app.api_uri.clone(),
            http: self.http.clone(),
            authorizations: self.authorizations.clone(),
            state_cache: Arc::clone(&self.state_cache),
            callbacks: Arc::clone(&self.callbacks),
            state_ttl: self.state_ttl,
        }
    }

    pub fn authorizations(&self) -> &AuthorizationRepository {
        &self.authorizations
    }

    pub fn state_cache(&self) -> &Arc<dyn StateCache> {
        &self.state_cache
    }

    pub fn callbacks(&self) -> &Arc<dyn CallbackUrlBuilder> {
        &self.callbacks
    }
}

pub struct OAuthClient {
    kind: ClientKind,
    service_name: String,
    authentication_endpoint: String,
    api_base_uri: String,
    http: reqwest::Client,
    authorizations: AuthorizationRepository,
    state_cache: Arc<dyn StateCache>,
    callbacks: Arc<dyn CallbackUrlBuilder>,
    state_ttl: Duration,
}

impl OAuthClient {
    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn endpoint(&self, path: &str) -> Result<Url, OAuthError> {
        derive_endpoint(&self.authentication_endpoint, path)
            .map_err(|e| OAuthError::invalid_endpoint(&self.authentication_endpoint, e))
    }

    pub fn authorize_endpoint(&self) -> Result<Url, OAuthError> {
        self.endpoint(AUTHORIZE_PATH)
    }

    pub fn token_endpoint(&self) -> Result<Url, OAuthError> {
        self.endpoint(TOKEN_PATH)
    }

    pub fn resource_owner_details_endpoint(&self) -> Result<Url, OAuthError> {
        self.endpoint(RESOURCE_OWNER_PATH)
    }

    /// Absolute URL the provider redirects to after consent
    pub fn redirect_uri(&self) -> Result<Url, OAuthError> {
        let url = self.callbacks.build_absolute_callback_url(
            CallbackAction::FinishAuthorization,
            &[("kind", self.kind.as_str()), ("service", &self.service_name)],
        )?;
        Ok(self.kind.apply_callback_policy(url))
    }

    pub async fn get_authorization(
        &self,
        authorization_id: &str,
    ) -> Result<Option<Authorization>, OAuthError> {
        Ok(self
            .authorizations
            .find_by_identifier(authorization_id)
            .await?)
    }

    /// Start an authorization-code flow and return the provider consent URL.
    ///
    /// The authorization record is persisted (or reused) before the URL is
    /// handed out, and the pending state is cached for the state TTL.
    pub async fn start_authorization(
        &self,
        client_id: &str,
        client_secret: &ClientSecret,
        return_to_uri: &Url,
        scope: &str,
        resource: Option<&str>,
    ) -> Result<Url, OAuthError> {
        if client_id == client_secret.secret() {
            warn!(
                kind = %self.kind,
                service = %self.service_name,
                "Client secret equals client id; check the app configuration"
            );
        }

        let authorization_id = authorization_id_for(self.kind, &self.service_name, client_id);
        let mut authorization = match self
            .authorizations
            .find_by_identifier(&authorization_id)
            .await?
        {
            Some(existing) => {
                debug!(authorization_id = %authorization_id, "Reusing existing authorization");
                existing
            }
            None => Authorization::new(self.kind, &self.service_name, client_id, scope),
        };
        authorization.client_secret = Some(client_secret.clone());
        if authorization.access_token.is_none() {
            authorization.scope = scope.to_string();
        }
        self.authorizations.save(&authorization).await?;

        let state = generate_state_token();
        let redirect_uri = self.redirect_uri()?;
        let scope_param = self.kind.encode_scope(scope);

        let mut url = self.authorize_endpoint()?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", client_id)
                .append_pair("redirect_uri", redirect_uri.as_str())
                .append_pair("state", &state);
            if !scope_param.is_empty() {
                query.append_pair("scope", &scope_param.to_query_value());
            }
            for (key, value) in self.kind.extra_authorize_params() {
                query.append_pair(key, value);
            }
            if self.kind.sends_resource() {
                if let Some(resource) = resource.filter(|r| !r.trim().is_empty()) {
                    query.append_pair("resource", resource);
                }
            }
        }

        self.state_cache
            .set(
                &state,
                PendingAuthorization {
                    authorization_id: authorization_id.clone(),
                    client_id: client_id.to_string(),
                    client_secret: client_secret.clone(),
                    return_to_uri: return_to_uri.to_string(),
                },
                self.state_ttl,
            )
            .await?;

        counter!("oauth_authorizations_started_total", "kind" => self.kind.as_str()).increment(1);
        info!(
            kind = %self.kind,
            service = %self.service_name,
            authorization_id = %authorization_id,
            secret_len = client_secret.secret().len(),
            "Started authorization"
        );

        Ok(url)
    }

    /// Finish an authorization from the provider callback.
    ///
    /// Consumes the cached state, exchanges the code, stores the tokens and
    /// returns the original return-to URI with the authorization id appended.
    pub async fn finish_authorization(
        &self,
        state: &str,
        code: &str,
        fallback_scope: &str,
    ) -> Result<Url, OAuthError> {
        let pending =
            self.state_cache
                .take(state)
                .await?
                .ok_or_else(|| OAuthError::StateNotFound {
                    state: mask_tail(state),
                })?;

        let mut authorization = self
            .authorizations
            .find_by_identifier(&pending.authorization_id)
            .await?
            .ok_or_else(|| OAuthError::AuthorizationNotFound {
                authorization_id: pending.authorization_id.clone(),
            })?;

        info!(
            kind = %self.kind,
            service = %self.service_name,
            authorization_id = %authorization.authorization_id,
            code = %mask_tail(code),
            "Exchanging authorization code"
        );

        let redirect_uri = self.redirect_uri()?;
        let grant = self
            .request_token(
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", redirect_uri.as_str()),
                    ("client_id", &pending.client_id),
                    ("client_secret", pending.client_secret.secret()),
                ],
                TokenStage::Exchange,
            )
            .await?;

        if !fallback_scope.trim().is_empty() {
            authorization.scope = fallback_scope.to_string();
        }
        authorization.client_secret = Some(pending.client_secret.clone());
        authorization.apply_grant(grant, Utc::now());
        self.authorizations.save(&authorization).await?;

        let mut return_to = Url::parse(&pending.return_to_uri)
            .map_err(|e| OAuthError::invalid_endpoint(&pending.return_to_uri, e))?;
        return_to
            .query_pairs_mut()
            .append_pair(AUTHORIZATION_ID_QUERY_PARAMETER, &authorization.authorization_id);

        counter!("oauth_authorizations_finished_total", "kind" => self.kind.as_str()).increment(1);
        Ok(return_to)
    }

    /// Refresh the tokens of an authorization and return `return_to_uri`.
    pub async fn refresh_authorization(
        &self,
        authorization_id: &str,
        client_id: &str,
        return_to_uri: &str,
    ) -> Result<String, OAuthError> {
        let authorization = self.refresh(authorization_id).await?;
        if authorization.client_id != client_id {
            debug!(
                authorization_id = %authorization_id,
                "Refreshed authorization belongs to a different client id"
            );
        }
        Ok(return_to_uri.to_string())
    }

    /// Refresh unconditionally and return the updated authorization
    pub async fn refresh(&self, authorization_id: &str) -> Result<Authorization, OAuthError> {
        let mut authorization = self
            .authorizations
            .find_by_identifier(authorization_id)
            .await?
            .ok_or_else(|| OAuthError::AuthorizationNotFound {
                authorization_id: authorization_id.to_string(),
            })?;

        let refresh_token = authorization.refresh_token.clone().ok_or_else(|| {
            OAuthError::TokenRefresh {
                error: "invalid_grant".to_string(),
                description: "authorization holds no refresh token".to_string(),
            }
        })?;
        let client_secret = authorization.client_secret.clone().ok_or_else(|| {
            OAuthError::TokenRefresh {
                error: "invalid_client".to_string(),
                description: "authorization holds no client secret".to_string(),
            }
        })?;

        let grant = self
            .request_token(
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token.secret()),
                    ("client_id", &authorization.client_id),
                    ("client_secret", client_secret.secret()),
                ],
                TokenStage::Refresh,
            )
            .await?;

        authorization.apply_grant(grant, Utc::now());
        self.authorizations.save(&authorization).await?;

        counter!("oauth_token_refresh_total", "kind" => self.kind.as_str()).increment(1);
        info!(
            kind = %self.kind,
            authorization_id = %authorization_id,
            expires_at = ?authorization.expires_at,
            "Refreshed authorization"
        );
        Ok(authorization)
    }

    /// Build a bearer-authenticated request against the app's API base URI.
    ///
    /// `relative_path` is appended to the base URI verbatim. Non-empty
    /// `body` fields are sent as a JSON object.
    pub fn build_authenticated_request(
        &self,
        authorization: &Authorization,
        relative_path: &str,
        method: Method,
        body: &Map<String, Value>,
    ) -> Result<reqwest::Request, OAuthError> {
        let access_token =
            authorization
                .access_token
                .as_ref()
                .ok_or_else(|| OAuthError::NoAccessToken {
                    client_id: authorization.client_id.clone(),
                })?;

        let raw = format!("{}{}", self.api_base_uri, relative_path);
        let url = Url::parse(&raw).map_err(|e| OAuthError::invalid_endpoint(&raw, e))?;

        let mut builder = self
            .http
            .request(method, url)
            .bearer_auth(access_token.secret())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");
        if !body.is_empty() {
            builder = builder.json(body);
        }

        builder
            .build()
            .map_err(|e| OAuthError::InvalidResponse(format!("cannot build request: {}", e)))
    }

    async fn request_token(
        &self,
        form: &[(&str, &str)],
        stage: TokenStage,
    ) -> Result<TokenGrant, OAuthError> {
        let endpoint = self.token_endpoint()?;
        let response = self
            .http
            .post(endpoint.clone())
            .header(ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| OAuthError::transient(endpoint.as_str(), &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OAuthError::transient(endpoint.as_str(), &e))?;

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            counter!("oauth_token_request_failures_total", "stage" => stage.label(), "class" => "transient")
                .increment(1);
            return Err(OAuthError::Transient {
                target: endpoint.to_string(),
                message: format!("token endpoint returned {}", status),
            });
        }

        if !status.is_success() {
            counter!("oauth_token_request_failures_total", "stage" => stage.label(), "class" => "rejected")
                .increment(1);
            let (error, description) = parse_error_body(status, &body);
            warn!(
                kind = %self.kind,
                stage = stage.label(),
                status = status.as_u16(),
                error = %error,
                "Token endpoint rejected request"
            );
            return Err(stage.error(error, description));
        }

        match serde_json::from_str::<TokenResponse>(&body) {
            Ok(parsed) => Ok(TokenGrant {
                access_token: parsed.access_token,
                refresh_token: parsed.refresh_token,
                expires_in: parsed.expires_in.map(Duration::seconds),
                scope: parsed.scope,
            }),
            // Some providers answer 200 with an error document
            Err(parse_error) => match serde_json::from_str::<BasicErrorResponse>(&body) {
                Ok(_) => {
                    let (error, description) = parse_error_body(status, &body);
                    Err(stage.error(error, description))
                }
                Err(_) => Err(OAuthError::InvalidResponse(format!(
                    "token response: {}",
                    parse_error
                ))),
            },
        }
    }
}
