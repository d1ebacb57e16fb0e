//! # Providers API Handlers
//!
//! This module contains handlers for the providers endpoints.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::models::provider;
use crate::oauth::ClientKind;
use crate::server::AppState;
use crate::services::{NewProvider, ProviderChanges};

/// Provider as returned by the API
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ProviderResponse {
    /// Unique provider name (e.g., "google", "azure-gov")
    pub name: String,
    /// Client implementation used for this provider
    pub client_kind: ClientKind,
    /// Base URL the authorize and token endpoints are derived from
    pub authentication_endpoint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<provider::Model> for ProviderResponse {
    fn from(model: provider::Model) -> Self {
        Self {
            name: model.name,
            client_kind: model.client_kind,
            authentication_endpoint: model.authentication_endpoint,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

/// Response containing the list of providers
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProvidersResponse {
    /// Providers sorted by name
    pub providers: Vec<ProviderResponse>,
}

/// List all providers
#[utoipa::path(
    get,
    path = "/providers",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Registered providers", body = ProvidersResponse, example = json!({
            "providers": [
                {
                    "name": "azure",
                    "client_kind": "azure",
                    "authentication_endpoint": "https://login.microsoftonline.com/common/oauth2",
                    "created_at": "2026-01-12T09:00:00Z",
                    "updated_at": "2026-01-12T09:00:00Z"
                }
            ]
        })),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "providers"
)]
pub async fn list_providers(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<ProvidersResponse>, ApiError> {
    let providers = state
        .providers
        .list()
        .await?
        .into_iter()
        .map(ProviderResponse::from)
        .collect();

    Ok(Json(ProvidersResponse { providers }))
}

/// Register a provider
///
/// `client_kind` and `authentication_endpoint` default to the built-in
/// registry entry when the name is a known provider.
#[utoipa::path(
    post,
    path = "/providers",
    security(("bearer_auth" = [])),
    request_body = NewProvider,
    responses(
        (status = 201, description = "Provider created", body = ProviderResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 409, description = "Provider already exists", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "providers"
)]
pub async fn create_provider(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<NewProvider>, JsonRejection>,
) -> Result<(StatusCode, Json<ProviderResponse>), ApiError> {
    let Json(input) = payload?;
    let created = state.providers.create(input).await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

/// Show one provider
#[utoipa::path(
    get,
    path = "/providers/{name}",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Provider name")),
    responses(
        (status = 200, description = "Provider", body = ProviderResponse),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 404, description = "Provider not found", body = ApiError)
    ),
    tag = "providers"
)]
pub async fn show_provider(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(name): Path<String>,
) -> Result<Json<ProviderResponse>, ApiError> {
    let provider = state.providers.find_by_name(&name).await?;
    Ok(Json(provider.into()))
}

/// Update a provider's kind or authentication endpoint
#[utoipa::path(
    put,
    path = "/providers/{name}",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Provider name")),
    request_body = ProviderChanges,
    responses(
        (status = 200, description = "Provider updated", body = ProviderResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 404, description = "Provider not found", body = ApiError)
    ),
    tag = "providers"
)]
pub async fn update_provider(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(name): Path<String>,
    payload: Result<Json<ProviderChanges>, JsonRejection>,
) -> Result<Json<ProviderResponse>, ApiError> {
    let Json(changes) = payload?;
    let updated = state.providers.update(&name, changes).await?;
    Ok(Json(updated.into()))
}

/// Remove a provider no app is bound to
#[utoipa::path(
    delete,
    path = "/providers/{name}",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Provider name")),
    responses(
        (status = 204, description = "Provider removed"),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 404, description = "Provider not found", body = ApiError),
        (status = 409, description = "Provider is used by apps", body = ApiError)
    ),
    tag = "providers"
)]
pub async fn remove_provider(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.providers.remove(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
