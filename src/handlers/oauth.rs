//! # OAuth Callback Handler
//!
//! Providers redirect the user's browser here after consent. The handler
//! finishes the authorization and sends the browser on to the app page.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Redirect,
};
use serde::Deserialize;
use serde_json::json;
use utoipa::IntoParams;

use crate::error::{ApiError, validation_error};
use crate::server::AppState;

/// Path parameters of the callback route
#[derive(Debug, Deserialize)]
pub struct CallbackPath {
    pub kind: String,
    pub app_name: String,
}

/// Query parameters the provider appends to the redirect
#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackQuery {
    /// State token issued when the authorization was started
    pub state: Option<String>,
    /// Authorization code to exchange
    pub code: Option<String>,
    /// Scope actually granted, when the provider reports it
    pub scope: Option<String>,
    /// Error code when consent was denied
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Finish an authorization started by `POST /apps/{id}/authorize`
#[utoipa::path(
    get,
    path = "/oauth/{kind}/{app_name}/callback",
    params(
        ("kind" = String, Path, description = "Client kind of the app's provider"),
        ("app_name" = String, Path, description = "App name"),
        CallbackQuery
    ),
    responses(
        (status = 303, description = "Authorization stored; redirect to the app page"),
        (status = 400, description = "Unknown or expired state, denied consent or mismatched app", body = ApiError),
        (status = 404, description = "App not found", body = ApiError),
        (status = 502, description = "Provider rejected the code exchange", body = ApiError)
    ),
    tag = "oauth"
)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(path): Path<CallbackPath>,
    Query(query): Query<CallbackQuery>,
) -> Result<Redirect, ApiError> {
    if let Some(error) = query.error {
        tracing::warn!(
            kind = %path.kind,
            app = %path.app_name,
            error = %error,
            "Provider returned an authorization error"
        );
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "AUTHORIZATION_DENIED",
            "provider did not grant the authorization",
        )
        .with_details(json!({
            "error": error,
            "error_description": query.error_description,
        })));
    }

    let state_token = query
        .state
        .filter(|s| !s.is_empty())
        .ok_or_else(|| validation_error("missing state", json!({ "state": "required" })))?;
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| validation_error("missing code", json!({ "code": "required" })))?;

    let return_to = state
        .apps
        .finish_authorization(
            &path.kind,
            &path.app_name,
            &state_token,
            &code,
            query.scope.as_deref(),
        )
        .await?;

    Ok(Redirect::to(return_to.as_str()))
}
