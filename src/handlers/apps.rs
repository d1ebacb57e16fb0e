//! # App Handlers
//!
//! CRUD for apps plus the operator side of the authorization flow:
//! starting consent, de-authorizing, forcing a refresh and sending
//! authenticated requests to the app's API.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, validation_error};
use crate::models::app;
use crate::request_engine::ApiRequest;
use crate::server::AppState;
use crate::services::{AppChanges, NewApp};

/// App as returned by the API. The client secret is never echoed.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct AppResponse {
    pub id: Uuid,
    pub name: String,
    pub client_id: String,
    pub scope: String,
    pub resource: Option<String>,
    pub api_uri: String,
    pub provider_name: String,
    /// Whether the app holds an active authorization
    pub authorized: bool,
    pub authorization_id: Option<String>,
    /// URL to register with the provider as redirect URI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    pub notes: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<app::Model> for AppResponse {
    fn from(model: app::Model) -> Self {
        let authorized = model.is_authorized();
        Self {
            id: model.id,
            name: model.name,
            client_id: model.client_id,
            scope: model.scope,
            resource: model.resource,
            api_uri: model.api_uri,
            provider_name: model.provider_name,
            authorized,
            authorization_id: Some(model.authorization_id).filter(|id| !id.is_empty()),
            redirect_uri: None,
            notes: model.notes,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AppsResponse {
    pub apps: Vec<AppResponse>,
}

/// Consent URL for starting an authorization
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthorizeResponse {
    /// Provider authorize URL to send the user's browser to
    pub authorize_url: String,
    /// The app already held an authorization; finishing replaces its tokens
    pub already_authorized: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefreshResponse {
    /// App page the operator UI returns to
    pub return_to: String,
}

/// Authenticated request to the app's API
#[derive(Debug, Deserialize, ToSchema)]
pub struct SendRequestBody {
    /// Path relative to the app's API URI
    pub path: String,
    /// Explicit API version; the configured default is used when absent
    #[serde(default)]
    pub api_version: Option<String>,
    /// HTTP method, defaults to GET
    #[serde(default)]
    pub method: Option<String>,
    /// JSON body for write requests
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub body: Option<Map<String, Value>>,
}

fn parse_method(value: Option<&str>) -> Result<Method, ApiError> {
    let Some(value) = value else {
        return Ok(Method::GET);
    };
    match value.trim().to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        other => Err(validation_error(
            "unsupported request method",
            json!({ "method": other }),
        )),
    }
}

impl SendRequestBody {
    fn into_request(self) -> Result<ApiRequest, ApiError> {
        if self.path.trim().is_empty() {
            return Err(validation_error(
                "path is required",
                json!({ "path": "must not be empty" }),
            ));
        }
        Ok(ApiRequest {
            method: parse_method(self.method.as_deref())?,
            path: self.path,
            api_version: self.api_version.filter(|v| !v.trim().is_empty()),
            body: self.body.unwrap_or_default(),
        })
    }
}

/// List all apps
#[utoipa::path(
    get,
    path = "/apps",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Registered apps", body = AppsResponse),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError)
    ),
    tag = "apps"
)]
pub async fn list_apps(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<AppsResponse>, ApiError> {
    let apps = state
        .apps
        .list()
        .await?
        .into_iter()
        .map(AppResponse::from)
        .collect();
    Ok(Json(AppsResponse { apps }))
}

/// Register an app bound to an existing provider
#[utoipa::path(
    post,
    path = "/apps",
    security(("bearer_auth" = [])),
    request_body = NewApp,
    responses(
        (status = 201, description = "App created", body = AppResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 409, description = "App name already taken", body = ApiError)
    ),
    tag = "apps"
)]
pub async fn create_app(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<NewApp>, JsonRejection>,
) -> Result<(StatusCode, Json<AppResponse>), ApiError> {
    let Json(input) = payload?;
    let created = state.apps.create(input).await?;
    let redirect_uri = state.apps.redirect_uri(&created).await?;

    let mut response = AppResponse::from(created);
    response.redirect_uri = Some(redirect_uri.to_string());
    Ok((StatusCode::CREATED, Json(response)))
}

/// Show one app, including the redirect URI to register with its provider
#[utoipa::path(
    get,
    path = "/apps/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "App id")),
    responses(
        (status = 200, description = "App", body = AppResponse),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 404, description = "App not found", body = ApiError)
    ),
    tag = "apps"
)]
pub async fn show_app(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<AppResponse>, ApiError> {
    let app = state.apps.find_by_identifier(&id).await?;
    let redirect_uri = state.apps.redirect_uri(&app).await?;

    let mut response = AppResponse::from(app);
    response.redirect_uri = Some(redirect_uri.to_string());
    Ok(Json(response))
}

/// Update app fields; an existing authorization is kept
#[utoipa::path(
    put,
    path = "/apps/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "App id")),
    request_body = AppChanges,
    responses(
        (status = 200, description = "App updated", body = AppResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 404, description = "App not found", body = ApiError)
    ),
    tag = "apps"
)]
pub async fn update_app(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
    payload: Result<Json<AppChanges>, JsonRejection>,
) -> Result<Json<AppResponse>, ApiError> {
    let Json(changes) = payload?;
    let updated = state.apps.update(&id, changes).await?;
    Ok(Json(updated.into()))
}

/// Remove an app and its authorization
#[utoipa::path(
    delete,
    path = "/apps/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "App id")),
    responses(
        (status = 204, description = "App removed"),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 404, description = "App not found", body = ApiError)
    ),
    tag = "apps"
)]
pub async fn remove_app(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.apps.remove(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Start an authorization
///
/// Returns the provider consent URL. Starting again while a flow is pending
/// is allowed; whichever callback arrives first wins.
#[utoipa::path(
    post,
    path = "/apps/{id}/authorize",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "App id")),
    responses(
        (status = 200, description = "Consent URL generated", body = AuthorizeResponse),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 404, description = "App not found", body = ApiError),
        (status = 500, description = "Provider endpoint misconfigured", body = ApiError)
    ),
    tag = "apps"
)]
pub async fn authorize_app(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<AuthorizeResponse>, ApiError> {
    let outcome = state.apps.authorize(&id).await?;
    Ok(Json(AuthorizeResponse {
        authorize_url: outcome.authorize_url.to_string(),
        already_authorized: outcome.already_authorized,
    }))
}

/// Delete the app's authorization
#[utoipa::path(
    delete,
    path = "/apps/{id}/authorization",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "App id")),
    responses(
        (status = 200, description = "App de-authorized", body = AppResponse),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 404, description = "App not found", body = ApiError)
    ),
    tag = "apps"
)]
pub async fn de_authorize_app(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<AppResponse>, ApiError> {
    let updated = state.apps.de_authorize(&id).await?;
    Ok(Json(updated.into()))
}

/// Refresh the app's tokens now
#[utoipa::path(
    post,
    path = "/apps/{id}/authorization/refresh",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "App id")),
    responses(
        (status = 200, description = "Tokens refreshed", body = RefreshResponse),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 404, description = "App or authorization not found", body = ApiError),
        (status = 409, description = "App is not authorized", body = ApiError),
        (status = 502, description = "Provider rejected the refresh", body = ApiError),
        (status = 503, description = "Provider temporarily unavailable", body = ApiError)
    ),
    tag = "apps"
)]
pub async fn refresh_app_authorization(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let return_to = state.apps.refresh_authorization(&id).await?;
    Ok(Json(RefreshResponse {
        return_to: return_to.to_string(),
    }))
}

/// Send an authenticated request to the app's API
///
/// Tokens are refreshed first when expired. A non-2xx answer is retried with
/// the other allowed API versions before the provider error is returned.
#[utoipa::path(
    post,
    path = "/apps/{id}/requests",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "App id")),
    request_body = SendRequestBody,
    responses(
        (status = 200, description = "Provider response; a top-level `value` collection is unwrapped"),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 404, description = "App not found", body = ApiError),
        (status = 409, description = "App is not authorized", body = ApiError),
        (status = 502, description = "Every API version was rejected", body = ApiError)
    ),
    tag = "apps"
)]
pub async fn send_app_request(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
    payload: Result<Json<SendRequestBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let request = body.into_request()?;
    let value = state.apps.send_authenticated_request(&id, request).await?;
    Ok(Json(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_defaults_to_get_and_rejects_unknown() {
        assert_eq!(parse_method(None).unwrap(), Method::GET);
        assert_eq!(parse_method(Some("patch")).unwrap(), Method::PATCH);
        assert!(parse_method(Some("TRACE")).is_err());
    }

    #[test]
    fn request_body_requires_a_path() {
        let body = SendRequestBody {
            path: "  ".to_string(),
            api_version: None,
            method: None,
            body: None,
        };
        assert!(body.into_request().is_err());

        let body = SendRequestBody {
            path: "subscriptions".to_string(),
            api_version: Some(String::new()),
            method: Some("post".to_string()),
            body: None,
        };
        let request = body.into_request().unwrap();
        assert_eq!(request.method, Method::POST);
        assert!(request.api_version.is_none());
        assert!(request.body.is_empty());
    }
}
