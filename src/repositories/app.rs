//! App repository
//!
//! CRUD for operator-registered apps. The client secret is sealed with the
//! app id as AAD. Writes spanning the apps and authorizations tables run in
//! one transaction; the commit is the persist point.

use anyhow::{Context, Result};
use chrono::Utc;
use oauth2::ClientSecret;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    DatabaseTransaction, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::crypto::{CryptoKey, app_secret_aad, open_str, seal_str};
use crate::models::app::{self, Entity as App};
use crate::models::authorization::{self, Entity as AuthorizationEntity};
use crate::models::provider;

#[derive(Debug, Clone)]
pub struct AppRepository {
    pub db: Arc<DatabaseConnection>,
    pub crypto_key: CryptoKey,
}

impl AppRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    /// Seal a client secret for the app with the given id
    pub fn seal_secret(&self, app_id: &Uuid, secret: &ClientSecret) -> Result<Vec<u8>> {
        seal_str(&self.crypto_key, &app_secret_aad(app_id), secret.secret())
            .context("failed to encrypt app client secret")
    }

    /// Decrypt the client secret of an app
    ///
    /// # Arguments
    ///
    /// * `app` - The app model carrying the sealed secret
    ///
    /// # Returns
    ///
    /// Returns the plaintext secret wrapped so it never shows up in debug output
    pub fn decrypt_secret(&self, app: &app::Model) -> Result<ClientSecret> {
        let secret = open_str(&self.crypto_key, &app_secret_aad(&app.id), &app.secret_ciphertext)
            .with_context(|| format!("failed to decrypt client secret of app {}", app.id))?;
        Ok(ClientSecret::new(secret))
    }

    pub async fn find_by_identifier(&self, id: &Uuid) -> Result<Option<app::Model>> {
        Ok(App::find_by_id(*id).one(&*self.db).await?)
    }

    pub async fn find_one_by_name(&self, name: &str) -> Result<Option<app::Model>> {
        Ok(App::find()
            .filter(app::Column::Name.eq(name))
            .one(&*self.db)
            .await?)
    }

    pub async fn find_all(&self) -> Result<Vec<app::Model>> {
        Ok(App::find()
            .order_by_asc(app::Column::Name)
            .all(&*self.db)
            .await?)
    }

    pub async fn count_by_provider(&self, provider_name: &str) -> Result<u64> {
        Ok(App::find()
            .filter(app::Column::ProviderName.eq(provider_name))
            .count(&*self.db)
            .await?)
    }

    /// Load an app together with the provider it is bound to
    pub async fn find_with_provider(
        &self,
        id: &Uuid,
    ) -> Result<Option<(app::Model, Option<provider::Model>)>> {
        Ok(App::find_by_id(*id)
            .find_also_related(provider::Entity)
            .one(&*self.db)
            .await?)
    }

    pub async fn add(&self, app: app::ActiveModel) -> Result<app::Model> {
        let id = app
            .id
            .clone()
            .take()
            .ok_or_else(|| anyhow::anyhow!("app id must be set"))?;

        App::insert(app).exec_without_returning(&*self.db).await?;

        self.find_by_identifier(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("app '{}' not persisted", id))
    }

    pub async fn update(&self, mut app: app::ActiveModel) -> Result<app::Model> {
        app.updated_at = Set(Utc::now().into());
        Ok(app.update(&*self.db).await?)
    }

    /// Point the app at an authorization id
    pub async fn set_authorization_id(
        &self,
        app: &app::Model,
        authorization_id: &str,
    ) -> Result<app::Model> {
        let mut active_model: app::ActiveModel = app.clone().into();
        active_model.authorization_id = Set(authorization_id.to_string());
        self.update(active_model).await
    }

    /// Delete the app and its authorization records.
    ///
    /// `derived_authorization_id` is the id a started but unfinished flow
    /// persisted under; it is removed along with the bound one.
    pub async fn remove(
        &self,
        app: &app::Model,
        derived_authorization_id: Option<&str>,
    ) -> Result<bool> {
        let txn = self.db.begin().await?;

        delete_authorizations(&txn, app, derived_authorization_id).await?;
        let deleted = App::delete_by_id(app.id).exec(&txn).await?;

        txn.commit().await?;
        Ok(deleted.rows_affected > 0)
    }

    /// Delete the app's authorization records and clear the reference on the app
    pub async fn detach_authorization(
        &self,
        app: &app::Model,
        derived_authorization_id: Option<&str>,
    ) -> Result<app::Model> {
        let txn = self.db.begin().await?;

        delete_authorizations(&txn, app, derived_authorization_id).await?;

        let mut active_model: app::ActiveModel = app.clone().into();
        active_model.authorization_id = Set(String::new());
        active_model.updated_at = Set(Utc::now().into());
        let updated = active_model.update(&txn).await?;

        txn.commit().await?;
        Ok(updated)
    }
}

async fn delete_authorizations(
    txn: &DatabaseTransaction,
    app: &app::Model,
    derived_authorization_id: Option<&str>,
) -> Result<u64> {
    let ids: Vec<String> = app
        .is_authorized()
        .then(|| app.authorization_id.clone())
        .into_iter()
        .chain(derived_authorization_id.map(str::to_string))
        .collect();
    if ids.is_empty() {
        return Ok(0);
    }

    let deleted = AuthorizationEntity::delete_many()
        .filter(authorization::Column::AuthorizationId.is_in(ids))
        .exec(txn)
        .await?;
    Ok(deleted.rows_affected)
}
