//! App orchestration
//!
//! Thin facade over the app store and the OAuth client: CRUD with a commit
//! per call, starting and finishing authorizations, de-authorizing, and
//! authenticated requests through the request engine.

use std::sync::Arc;

use chrono::Utc;
use oauth2::ClientSecret;
use sea_orm::Set;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{ServiceError, ServiceResult};
use crate::models::{app, provider};
use crate::oauth::{
    CallbackAction, ClientKind, OAuthClient, OAuthClientFactory, OAuthError, authorization_id_for,
    authorization_id_from_return_uri,
};
use crate::repositories::{AppRepository, ProviderRepository};
use crate::request_engine::{ApiRequest, AuthenticatedRequestEngine};
use crate::token_refresh::RefreshCoordinator;

/// App names end up as a path segment of the callback URL
fn is_valid_app_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphanumeric())
        && name.len() <= 128
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// App creation input
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewApp {
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    /// Space separated scopes
    #[serde(default)]
    pub scope: String,
    /// Resource parameter for azure-kind providers
    #[serde(default)]
    pub resource: Option<String>,
    /// Base URI authenticated requests are sent to
    pub api_uri: String,
    pub provider_name: String,
    #[serde(default)]
    pub notes: Option<Value>,
}

/// App update input; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct AppChanges {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub api_uri: Option<String>,
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub notes: Option<Value>,
}

/// Result of starting an authorization
#[derive(Debug, Clone)]
pub struct AuthorizeOutcome {
    pub authorize_url: Url,
    /// The app already held an authorization when the flow was started
    pub already_authorized: bool,
}

fn validate_api_uri(value: &str) -> ServiceResult<String> {
    let trimmed = value.trim();
    let url = Url::parse(trimmed)
        .map_err(|e| ServiceError::Validation(format!("invalid api uri '{}': {}", trimmed, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ServiceError::Validation(format!(
            "api uri '{}' must be http(s)",
            trimmed
        )));
    }
    Ok(trimmed.to_string())
}

fn required(field: &str, value: &str) -> ServiceResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

#[derive(Clone)]
pub struct AppService {
    apps: AppRepository,
    providers: ProviderRepository,
    clients: OAuthClientFactory,
    engine: Arc<AuthenticatedRequestEngine>,
    coordinator: Arc<RefreshCoordinator>,
}

impl AppService {
    pub fn new(
        apps: AppRepository,
        providers: ProviderRepository,
        clients: OAuthClientFactory,
        engine: Arc<AuthenticatedRequestEngine>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            apps,
            providers,
            clients,
            engine,
            coordinator,
        }
    }

    pub async fn list(&self) -> ServiceResult<Vec<app::Model>> {
        Ok(self.apps.find_all().await?)
    }

    pub async fn find_by_identifier(&self, id: &Uuid) -> ServiceResult<app::Model> {
        self.apps
            .find_by_identifier(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("app", id))
    }

    pub async fn find_by_name(&self, name: &str) -> ServiceResult<app::Model> {
        self.apps
            .find_one_by_name(name)
            .await?
            .ok_or_else(|| ServiceError::not_found("app", name))
    }

    async fn require_provider(&self, name: &str) -> ServiceResult<provider::Model> {
        self.providers.find_one_by_name(name).await?.ok_or_else(|| {
            ServiceError::Validation(format!("provider '{}' does not exist", name))
        })
    }

    pub async fn create(&self, input: NewApp) -> ServiceResult<app::Model> {
        let name = input.name.trim().to_string();
        if !is_valid_app_name(&name) {
            return Err(ServiceError::Validation(format!(
                "app name '{}' must be 1-128 letters, digits, '.', '_' or '-'",
                name
            )));
        }
        let client_id = required("client_id", &input.client_id)?;
        let client_secret = required("client_secret", &input.client_secret)?;
        let api_uri = validate_api_uri(&input.api_uri)?;
        let provider = self.require_provider(input.provider_name.trim()).await?;

        if self.apps.find_one_by_name(&name).await?.is_some() {
            return Err(ServiceError::Conflict(format!("app '{}' already exists", name)));
        }

        let id = Uuid::new_v4();
        let secret_ciphertext = self
            .apps
            .seal_secret(&id, &ClientSecret::new(client_secret))?;
        let now = Utc::now();

        let created = self
            .apps
            .add(app::ActiveModel {
                id: Set(id),
                name: Set(name),
                client_id: Set(client_id),
                secret_ciphertext: Set(secret_ciphertext),
                scope: Set(input.scope.trim().to_string()),
                resource: Set(input.resource.filter(|r| !r.trim().is_empty())),
                api_uri: Set(api_uri),
                provider_name: Set(provider.name),
                authorization_id: Set(String::new()),
                notes: Set(input.notes),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            })
            .await?;

        info!(app = %created.name, provider = %created.provider_name, "Created app");
        Ok(created)
    }

    /// Update an app. Changing credentials does not touch an existing
    /// authorization; de-authorize and authorize again to re-consent.
    pub async fn update(&self, id: &Uuid, changes: AppChanges) -> ServiceResult<app::Model> {
        let existing = self.find_by_identifier(id).await?;
        let mut active_model: app::ActiveModel = existing.clone().into();

        if let Some(client_id) = changes.client_id {
            active_model.client_id = Set(required("client_id", &client_id)?);
        }
        if let Some(secret) = changes.client_secret {
            let secret = ClientSecret::new(required("client_secret", &secret)?);
            active_model.secret_ciphertext = Set(self.apps.seal_secret(&existing.id, &secret)?);
        }
        if let Some(scope) = changes.scope {
            active_model.scope = Set(scope.trim().to_string());
        }
        if let Some(resource) = changes.resource {
            active_model.resource = Set(Some(resource).filter(|r| !r.trim().is_empty()));
        }
        if let Some(api_uri) = changes.api_uri {
            active_model.api_uri = Set(validate_api_uri(&api_uri)?);
        }
        if let Some(provider_name) = changes.provider_name {
            let provider = self.require_provider(provider_name.trim()).await?;
            active_model.provider_name = Set(provider.name);
        }
        if let Some(notes) = changes.notes {
            active_model.notes = Set(Some(notes));
        }

        let updated = self.apps.update(active_model).await?;
        info!(app = %updated.name, "Updated app");
        Ok(updated)
    }

    /// Load an app with the authorization id its provider kind derives,
    /// which may hold a record even while the app is not yet bound to it
    async fn find_with_derived_id(&self, id: &Uuid) -> ServiceResult<(app::Model, Option<String>)> {
        let (app, provider) = self
            .apps
            .find_with_provider(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("app", id))?;
        let derived =
            provider.map(|p| authorization_id_for(p.client_kind, &app.name, &app.client_id));
        Ok((app, derived))
    }

    /// Remove an app together with its authorization
    pub async fn remove(&self, id: &Uuid) -> ServiceResult<()> {
        let (existing, derived) = self.find_with_derived_id(id).await?;
        if !self.apps.remove(&existing, derived.as_deref()).await? {
            return Err(ServiceError::not_found("app", id));
        }
        info!(app = %existing.name, "Removed app");
        Ok(())
    }

    async fn client_for(&self, app: &app::Model) -> ServiceResult<OAuthClient> {
        let provider = self
            .providers
            .find_one_by_name(&app.provider_name)
            .await?
            .ok_or_else(|| ServiceError::not_found("provider", &app.provider_name))?;
        Ok(self.clients.for_app(app, &provider))
    }

    fn app_page_url(&self, app: &app::Model) -> ServiceResult<Url> {
        let id = app.id.to_string();
        Ok(self
            .clients
            .callbacks()
            .build_absolute_callback_url(CallbackAction::ShowApp, &[("app", id.as_str())])?)
    }

    /// Finish-authorization URL the operator registers with the provider
    pub async fn redirect_uri(&self, app: &app::Model) -> ServiceResult<Url> {
        Ok(self.client_for(app).await?.redirect_uri()?)
    }

    /// Start an authorization and return the provider consent URL
    pub async fn authorize(&self, id: &Uuid) -> ServiceResult<AuthorizeOutcome> {
        let app = self.find_by_identifier(id).await?;
        let client = self.client_for(&app).await?;
        let secret = self.apps.decrypt_secret(&app)?;
        let return_to = self.app_page_url(&app)?;

        let authorize_url = client
            .start_authorization(
                &app.client_id,
                &secret,
                &return_to,
                &app.scope,
                app.resource.as_deref(),
            )
            .await?;

        Ok(AuthorizeOutcome {
            authorize_url,
            already_authorized: app.is_authorized(),
        })
    }

    /// Complete the provider callback for `app_name` and bind the resulting
    /// authorization to the app. Returns the URI to redirect the browser to.
    pub async fn finish_authorization(
        &self,
        kind: &str,
        app_name: &str,
        state: &str,
        code: &str,
        scope: Option<&str>,
    ) -> ServiceResult<Url> {
        let kind: ClientKind = kind
            .parse()
            .map_err(|e: crate::oauth::kind::UnknownClientKind| {
                ServiceError::Validation(e.to_string())
            })?;
        let app = self.find_by_name(app_name).await?;
        let client = self.client_for(&app).await?;
        if client.kind() != kind {
            return Err(ServiceError::Validation(format!(
                "callback kind '{}' does not match provider kind '{}' of app '{}'",
                kind,
                client.kind(),
                app.name
            )));
        }

        let return_to = client
            .finish_authorization(state, code, scope.unwrap_or(&app.scope))
            .await?;

        let authorization_id = authorization_id_from_return_uri(&return_to).ok_or_else(|| {
            OAuthError::Callback("return uri carries no authorization id".to_string())
        })?;
        if authorization_id != authorization_id_for(kind, &app.name, &app.client_id) {
            warn!(
                app = %app.name,
                "Callback state was issued for another app or client id"
            );
            return Err(ServiceError::Validation(format!(
                "authorization state does not belong to app '{}'",
                app.name
            )));
        }

        self.apps.set_authorization_id(&app, &authorization_id).await?;
        info!(app = %app.name, kind = %kind, "App authorized");
        Ok(return_to)
    }

    /// Delete the app's authorization and clear its authorization id
    pub async fn de_authorize(&self, id: &Uuid) -> ServiceResult<app::Model> {
        let (app, derived) = self.find_with_derived_id(id).await?;
        let updated = self
            .apps
            .detach_authorization(&app, derived.as_deref())
            .await?;
        info!(app = %updated.name, "App de-authorized");
        Ok(updated)
    }

    /// Refresh the app's tokens now and return the app page URL
    pub async fn refresh_authorization(&self, id: &Uuid) -> ServiceResult<Url> {
        let app = self.find_by_identifier(id).await?;
        if !app.is_authorized() {
            return Err(OAuthError::NoAccessToken {
                client_id: app.client_id.clone(),
            }
            .into());
        }
        let client = self.client_for(&app).await?;
        self.coordinator
            .refresh_now(&client, &app.authorization_id)
            .await?;
        self.app_page_url(&app)
    }

    pub async fn send_authenticated_request(
        &self,
        id: &Uuid,
        request: ApiRequest,
    ) -> ServiceResult<Value> {
        let app = self.find_by_identifier(id).await?;
        let client = self.client_for(&app).await?;
        Ok(self.engine.send(&client, &app, request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_names_are_path_safe() {
        assert!(is_valid_app_name("billing-prod"));
        assert!(is_valid_app_name("a.b_c"));
        assert!(!is_valid_app_name(""));
        assert!(!is_valid_app_name("-leading"));
        assert!(!is_valid_app_name("with space"));
        assert!(!is_valid_app_name("slash/name"));
        assert!(!is_valid_app_name(&"x".repeat(129)));
    }
}
