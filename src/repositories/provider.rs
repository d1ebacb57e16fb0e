//! Provider repository for database operations
//!
//! This module provides the ProviderRepository struct which encapsulates
//! SeaORM operations for the providers table.

use anyhow::Result;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, Set};
use std::sync::Arc;

use crate::models::provider::{self, Entity as Provider};
use crate::oauth::RegistryEntry;

/// Repository for provider database operations
#[derive(Debug, Clone)]
pub struct ProviderRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl ProviderRepository {
    /// Creates a new ProviderRepository instance
    ///
    /// # Arguments
    ///
    /// * `db` - Database connection pool
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Finds a provider by its name
    ///
    /// # Arguments
    ///
    /// * `name` - The unique name of the provider
    ///
    /// # Returns
    ///
    /// Returns a Result containing the provider model if found
    pub async fn find_one_by_name(&self, name: &str) -> Result<Option<provider::Model>> {
        let provider = Provider::find_by_id(name.to_string())
            .one(&*self.db)
            .await?;
        Ok(provider)
    }

    /// Finds all providers ordered by name
    pub async fn find_all(&self) -> Result<Vec<provider::Model>> {
        let providers = Provider::find()
            .order_by_asc(provider::Column::Name)
            .all(&*self.db)
            .await?;
        Ok(providers)
    }

    /// Adds a new provider
    ///
    /// # Arguments
    ///
    /// * `provider` - The active model representing the provider to create
    ///
    /// # Returns
    ///
    /// Returns a Result containing the persisted provider model
    pub async fn add(&self, provider: provider::ActiveModel) -> Result<provider::Model> {
        let name = provider
            .name
            .clone()
            .take()
            .ok_or_else(|| anyhow::anyhow!("provider name must be set"))?;

        Provider::insert(provider)
            .exec_without_returning(&*self.db)
            .await?;

        let fetched = Provider::find_by_id(name.clone()).one(&*self.db).await?;
        fetched.ok_or_else(|| anyhow::anyhow!("provider '{}' not persisted", name))
    }

    /// Updates a provider by its name
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the provider to update
    /// * `changes` - Active model carrying the fields to change
    ///
    /// # Returns
    ///
    /// Returns the updated provider, or `None` if no provider has that name
    pub async fn update(
        &self,
        name: &str,
        changes: provider::ActiveModel,
    ) -> Result<Option<provider::Model>> {
        let Some(existing) = self.find_one_by_name(name).await? else {
            return Ok(None);
        };

        let mut active_model: provider::ActiveModel = existing.into();
        if let Some(endpoint) = changes.authentication_endpoint.clone().take() {
            active_model.authentication_endpoint = Set(endpoint);
        }
        if let Some(kind) = changes.client_kind.clone().take() {
            active_model.client_kind = Set(kind);
        }
        active_model.updated_at = Set(Utc::now().into());

        Ok(Some(active_model.update(&*self.db).await?))
    }

    /// Removes a provider by its name, returning whether a row was deleted
    pub async fn remove(&self, name: &str) -> Result<bool> {
        let delete_result = Provider::delete_by_id(name.to_string())
            .exec(&*self.db)
            .await?;
        Ok(delete_result.rows_affected > 0)
    }

    /// Insert a registry entry unless a provider with that name exists.
    ///
    /// Existing rows are left alone so operator edits survive restarts.
    pub async fn insert_if_absent(&self, entry: &RegistryEntry) -> Result<bool> {
        if self.find_one_by_name(&entry.name).await?.is_some() {
            return Ok(false);
        }

        let now = Utc::now();
        self.add(provider::ActiveModel {
            name: Set(entry.name.clone()),
            authentication_endpoint: Set(entry.authentication_endpoint.clone()),
            client_kind: Set(entry.client_kind),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        })
        .await?;
        Ok(true)
    }
}
