//! # Error Handling
//!
//! Unified problem+json error responses for the cloud apps API, with trace
//! ID propagation and mappings from the OAuth and service error types.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::oauth::OAuthError;
use crate::services::ServiceError;
use crate::telemetry;

/// Seconds a client should wait after a transient provider failure
const TRANSIENT_RETRY_AFTER_SECONDS: u64 = 30;

/// Characters of an upstream body kept in error details
const BODY_SNIPPET_CHARS: usize = 200;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Extract current trace ID from the request context (falls back to generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error.code().is_some_and(|code| {
        let code: &str = code.as_ref();
        code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code)
    })
}

/// Upstream provider error information
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderError {
    /// Client kind or endpoint the failure came from
    pub provider: String,
    /// HTTP status code from upstream
    pub status: u16,
    /// Response body snippet from upstream (truncated)
    pub body_snippet: Option<String>,
    /// API versions tried before giving up
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tried_versions: Vec<String>,
}

fn snippet(body: &str) -> String {
    if body.chars().count() > BODY_SNIPPET_CHARS {
        let truncated: String = body.chars().take(BODY_SNIPPET_CHARS).collect();
        format!("{}...", truncated)
    } else {
        body.to_string()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

// Error mappers for common sources

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        if let Some(db_error) = error.downcast_ref::<sea_orm::DbErr>()
            && is_unique_violation(db_error)
        {
            tracing::debug!(?error, "Unique constraint violation detected");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            _ => {
                tracing::error!("Database error: {:?}", error);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

impl From<OAuthError> for ApiError {
    fn from(error: OAuthError) -> Self {
        match error {
            OAuthError::StateNotFound { .. } => Self::new(
                StatusCode::BAD_REQUEST,
                "INVALID_STATE",
                &error.to_string(),
            ),
            OAuthError::AuthorizationNotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", &error.to_string())
            }
            OAuthError::NoAccessToken { .. } => Self::new(
                StatusCode::CONFLICT,
                "NOT_AUTHORIZED",
                &error.to_string(),
            ),
            OAuthError::TokenExchange {
                ref error,
                ref description,
            }
            | OAuthError::TokenRefresh {
                ref error,
                ref description,
            } => {
                let message = format!("Provider rejected the grant: {}", description);
                Self::new(StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", &message)
                    .with_details(json!({ "error": error, "error_description": description }))
            }
            OAuthError::ApiVersionExhausted {
                status,
                tried,
                body,
            } => provider_error("api".to_string(), status, Some(body), tried),
            OAuthError::Transient { ref target, .. } => {
                tracing::warn!(endpoint = %target, error = %error, "Transient provider failure");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    &error.to_string(),
                )
                .with_retry_after(TRANSIENT_RETRY_AFTER_SECONDS)
            }
            OAuthError::InvalidResponse(_) => Self::new(
                StatusCode::BAD_GATEWAY,
                "PROVIDER_ERROR",
                &error.to_string(),
            ),
            OAuthError::InvalidEndpoint { .. } | OAuthError::Callback(_) => {
                tracing::error!(error = %error, "OAuth configuration error");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    &error.to_string(),
                )
            }
            OAuthError::StateCache(inner) => anyhow::Error::new(inner).into(),
            OAuthError::Storage(inner) => inner.into(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::NotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", &error.to_string())
            }
            ServiceError::Conflict(message) => {
                Self::new(StatusCode::CONFLICT, "CONFLICT", &message)
            }
            ServiceError::Validation(message) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
            }
            ServiceError::OAuth(inner) => inner.into(),
            ServiceError::Storage(inner) => inner.into(),
        }
    }
}

/// Create a provider upstream error (always 502 PROVIDER_ERROR)
pub fn provider_error(
    provider: String,
    status: u16,
    body: Option<String>,
    tried_versions: Vec<String>,
) -> ApiError {
    let provider_error = ProviderError {
        provider: provider.clone(),
        status,
        body_snippet: body.as_deref().map(snippet),
        tried_versions,
    };

    ApiError::new(
        StatusCode::BAD_GATEWAY,
        "PROVIDER_ERROR",
        &format!("Provider {} returned error status {}", provider, status),
    )
    .with_details(json!(provider_error))
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create an unauthorized error (401) with explicit trace_id
pub fn unauthorized_with_trace_id(message: Option<&str>, trace_id: String) -> ApiError {
    let mut error = unauthorized(message);
    error.trace_id = Some(trace_id.into_boxed_str());
    error
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_api_error_with_details() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", "Test error message")
            .with_details(json!({"field": "value"}));

        assert_eq!(error.details, Some(Box::new(json!({"field": "value"}))));
        assert_eq!(error.retry_after, None);
    }

    #[test]
    fn test_from_anyhow() {
        let api_error: ApiError = anyhow::anyhow!("Something went wrong").into();

        assert_eq!(api_error.code, Box::from("INTERNAL_SERVER_ERROR"));
        assert_eq!(api_error.message, Box::from("An internal error occurred"));
    }

    #[test]
    fn test_content_type_and_retry_after_headers() {
        let error = ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "Try later",
        )
        .with_retry_after(30);

        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get("retry-after").unwrap(), "30");
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn test_trace_id_generation() {
        let error = ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Test error",
        );

        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[test]
    fn test_oauth_error_mapping() {
        let cases: Vec<(OAuthError, StatusCode, &str)> = vec![
            (
                OAuthError::StateNotFound {
                    state: "***abc".to_string(),
                },
                StatusCode::BAD_REQUEST,
                "INVALID_STATE",
            ),
            (
                OAuthError::AuthorizationNotFound {
                    authorization_id: "abc".to_string(),
                },
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                OAuthError::NoAccessToken {
                    client_id: "client".to_string(),
                },
                StatusCode::CONFLICT,
                "NOT_AUTHORIZED",
            ),
            (
                OAuthError::TokenRefresh {
                    error: "invalid_grant".to_string(),
                    description: "Token has been revoked".to_string(),
                },
                StatusCode::BAD_GATEWAY,
                "PROVIDER_ERROR",
            ),
            (
                OAuthError::Transient {
                    target: "https://login.example.test/token".to_string(),
                    message: "request timed out".to_string(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
            ),
        ];

        for (error, status, code) in cases {
            let api_error: ApiError = error.into();
            assert_eq!(api_error.status, status);
            assert_eq!(api_error.code.as_ref(), code);
        }
    }

    #[test]
    fn test_token_error_carries_description() {
        let api_error: ApiError = OAuthError::TokenExchange {
            error: "invalid_grant".to_string(),
            description: "Code was already redeemed.".to_string(),
        }
        .into();

        assert!(api_error.message.contains("Code was already redeemed."));
        let details = api_error.details.unwrap();
        assert_eq!(details["error"], "invalid_grant");
    }

    #[test]
    fn test_api_version_exhausted_details() {
        let body = "x".repeat(500);
        let api_error: ApiError = OAuthError::ApiVersionExhausted {
            status: 400,
            tried: vec!["2019-06-01".to_string(), "2020-08-01".to_string()],
            body,
        }
        .into();

        assert_eq!(api_error.status, StatusCode::BAD_GATEWAY);
        let details = api_error.details.unwrap();
        assert_eq!(details["status"], 400);
        assert_eq!(details["tried_versions"], json!(["2019-06-01", "2020-08-01"]));
        let snippet = details["body_snippet"].as_str().unwrap();
        assert_eq!(snippet.chars().count(), 203);
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn test_service_error_mapping() {
        let conflict: ApiError = ServiceError::Conflict("provider 'azure' is used".to_string()).into();
        assert_eq!(conflict.status, StatusCode::CONFLICT);

        let validation: ApiError = ServiceError::Validation("bad".to_string()).into();
        assert_eq!(validation.code.as_ref(), "VALIDATION_FAILED");

        let missing: ApiError = ServiceError::NotFound {
            entity: "app",
            id: "x".to_string(),
        }
        .into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_utf8_safe_truncation() {
        let body = "测试中文字符🚀 body ".repeat(40);
        let error = provider_error("api".to_string(), 500, Some(body), Vec::new());

        let details = error.details.unwrap();
        let body_snippet = details["body_snippet"].as_str().unwrap();
        assert!(body_snippet.chars().count() <= 203);
        assert!(body_snippet.starts_with("测试中文字符🚀"));
        assert!(details.get("tried_versions").is_none());
    }
}
