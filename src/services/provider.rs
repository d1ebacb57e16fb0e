//! Provider orchestration

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveValue::NotSet, Set};
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;

use super::{ServiceError, ServiceResult};
use crate::models::provider;
use crate::oauth::{ClientKind, ProviderRegistry};
use crate::repositories::{AppRepository, ProviderRepository};

/// Provider creation input
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewProvider {
    pub name: String,
    /// `google`, `azure` or `amazon`; defaults to the registered family of `name`
    #[serde(default)]
    pub client_kind: Option<String>,
    /// Defaults to the registry endpoint of the client kind
    #[serde(default)]
    pub authentication_endpoint: Option<String>,
}

/// Provider update input; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ProviderChanges {
    #[serde(default)]
    pub client_kind: Option<String>,
    #[serde(default)]
    pub authentication_endpoint: Option<String>,
}

fn parse_kind(value: &str) -> ServiceResult<ClientKind> {
    value
        .parse()
        .map_err(|e: crate::oauth::kind::UnknownClientKind| ServiceError::Validation(e.to_string()))
}

fn validate_endpoint(value: &str) -> ServiceResult<String> {
    let trimmed = value.trim();
    let url = url::Url::parse(trimmed).map_err(|e| {
        ServiceError::Validation(format!("invalid authentication endpoint '{}': {}", trimmed, e))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ServiceError::Validation(format!(
            "authentication endpoint '{}' must be http(s)",
            trimmed
        )));
    }
    Ok(trimmed.to_string())
}

#[derive(Clone)]
pub struct ProviderService {
    providers: ProviderRepository,
    apps: AppRepository,
    registry: Arc<ProviderRegistry>,
}

impl ProviderService {
    pub fn new(
        providers: ProviderRepository,
        apps: AppRepository,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            providers,
            apps,
            registry,
        }
    }

    pub async fn list(&self) -> ServiceResult<Vec<provider::Model>> {
        Ok(self.providers.find_all().await?)
    }

    pub async fn find_by_name(&self, name: &str) -> ServiceResult<provider::Model> {
        self.providers
            .find_one_by_name(name)
            .await?
            .ok_or_else(|| ServiceError::not_found("provider", name))
    }

    pub async fn create(&self, input: NewProvider) -> ServiceResult<provider::Model> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(ServiceError::Validation("provider name is required".to_string()));
        }

        let kind = match input.client_kind.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            Some(kind) => parse_kind(kind)?,
            None => {
                self.registry
                    .get(&name)
                    .map_err(|e| {
                        ServiceError::Validation(format!("{}; client_kind is required", e))
                    })?
                    .client_kind
            }
        };

        let endpoint = match input
            .authentication_endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
        {
            Some(endpoint) => validate_endpoint(endpoint)?,
            None => self
                .registry
                .default_endpoint_for(kind)
                .map(str::to_string)
                .ok_or_else(|| {
                    ServiceError::Validation(format!(
                        "no default authentication endpoint for kind '{}'",
                        kind
                    ))
                })?,
        };

        if self.providers.find_one_by_name(&name).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "provider '{}' already exists",
                name
            )));
        }

        let now = Utc::now();
        let created = self
            .providers
            .add(provider::ActiveModel {
                name: Set(name),
                authentication_endpoint: Set(endpoint),
                client_kind: Set(kind),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            })
            .await?;

        info!(provider = %created.name, kind = %created.client_kind, "Created provider");
        Ok(created)
    }

    pub async fn update(
        &self,
        name: &str,
        changes: ProviderChanges,
    ) -> ServiceResult<provider::Model> {
        let client_kind = match changes.client_kind.as_deref() {
            Some(kind) => Set(parse_kind(kind)?),
            None => NotSet,
        };
        let authentication_endpoint = match changes.authentication_endpoint.as_deref() {
            Some(endpoint) => Set(validate_endpoint(endpoint)?),
            None => NotSet,
        };

        let updated = self
            .providers
            .update(
                name,
                provider::ActiveModel {
                    client_kind,
                    authentication_endpoint,
                    ..Default::default()
                },
            )
            .await?
            .ok_or_else(|| ServiceError::not_found("provider", name))?;

        info!(provider = %updated.name, "Updated provider");
        Ok(updated)
    }

    /// Remove a provider no app is bound to
    pub async fn remove(&self, name: &str) -> ServiceResult<()> {
        let bound = self.apps.count_by_provider(name).await?;
        if bound > 0 {
            return Err(ServiceError::Conflict(format!(
                "provider '{}' is used by {} app(s)",
                name, bound
            )));
        }

        if !self.providers.remove(name).await? {
            return Err(ServiceError::not_found("provider", name));
        }
        info!(provider = %name, "Removed provider");
        Ok(())
    }
}
