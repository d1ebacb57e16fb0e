//! Authorization repository
//!
//! Persists [`Authorization`] records. Token material and the client secret
//! are sealed with the authorization id as AAD before they reach the table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use oauth2::{AccessToken, ClientSecret, RefreshToken};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    prelude::DateTimeWithTimeZone,
};
use std::sync::Arc;

use crate::crypto::{CryptoKey, authorization_aad, open_optional, seal_optional};
use crate::models::authorization::{self, ActiveModel, Entity as AuthorizationEntity};
use crate::oauth::Authorization;

#[derive(Debug, Clone)]
pub struct AuthorizationRepository {
    pub db: Arc<DatabaseConnection>,
    pub crypto_key: CryptoKey,
}

impl AuthorizationRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    /// Decrypt a stored row into the domain record
    pub fn decrypt(&self, model: authorization::Model) -> Result<Authorization> {
        let aad = authorization_aad(&model.authorization_id);
        let open = |field: &str, value: Option<&[u8]>| {
            open_optional(&self.crypto_key, &aad, value).with_context(|| {
                format!(
                    "failed to decrypt {} of authorization {}",
                    field, model.authorization_id
                )
            })
        };

        let client_secret = open("client secret", model.client_secret_ciphertext.as_deref())?;
        let access_token = open("access token", model.access_token_ciphertext.as_deref())?;
        let refresh_token = open("refresh token", model.refresh_token_ciphertext.as_deref())?;

        Ok(Authorization {
            authorization_id: model.authorization_id,
            client_kind: model.client_kind,
            service_name: model.service_name,
            client_id: model.client_id,
            client_secret: client_secret.map(ClientSecret::new),
            grant_type: model.grant_type,
            scope: model.scope,
            access_token: access_token.map(AccessToken::new),
            refresh_token: refresh_token.map(RefreshToken::new),
            expires_at: model.expires_at.map(|at| at.with_timezone(&Utc)),
        })
    }

    fn seal(&self, authorization: &Authorization) -> Result<ActiveModel> {
        let aad = authorization_aad(&authorization.authorization_id);
        let seal = |value: Option<&str>| {
            seal_optional(&self.crypto_key, &aad, value)
                .context("failed to encrypt authorization secret")
        };

        Ok(ActiveModel {
            authorization_id: Set(authorization.authorization_id.clone()),
            client_kind: Set(authorization.client_kind),
            service_name: Set(authorization.service_name.clone()),
            client_id: Set(authorization.client_id.clone()),
            client_secret_ciphertext: Set(seal(
                authorization.client_secret.as_ref().map(|s| s.secret().as_str()),
            )?),
            grant_type: Set(authorization.grant_type.clone()),
            scope: Set(authorization.scope.clone()),
            access_token_ciphertext: Set(seal(
                authorization.access_token.as_ref().map(|t| t.secret().as_str()),
            )?),
            refresh_token_ciphertext: Set(seal(
                authorization.refresh_token.as_ref().map(|t| t.secret().as_str()),
            )?),
            expires_at: Set(authorization.expires_at.map(DateTimeWithTimeZone::from)),
            ..Default::default()
        })
    }

    pub async fn find_by_identifier(&self, authorization_id: &str) -> Result<Option<Authorization>> {
        AuthorizationEntity::find_by_id(authorization_id.to_string())
            .one(&*self.db)
            .await?
            .map(|model| self.decrypt(model))
            .transpose()
    }

    pub async fn add(&self, authorization: &Authorization) -> Result<()> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let mut active_model = self.seal(authorization)?;
        active_model.created_at = Set(now);
        active_model.updated_at = Set(now);

        AuthorizationEntity::insert(active_model)
            .exec_without_returning(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn update(&self, authorization: &Authorization) -> Result<()> {
        let mut active_model = self.seal(authorization)?;
        active_model.updated_at = Set(Utc::now().into());
        active_model.update(&*self.db).await?;
        Ok(())
    }

    /// Insert or update depending on whether the id is already stored
    pub async fn save(&self, authorization: &Authorization) -> Result<()> {
        let exists = AuthorizationEntity::find_by_id(authorization.authorization_id.clone())
            .one(&*self.db)
            .await?
            .is_some();
        if exists {
            self.update(authorization).await
        } else {
            self.add(authorization).await
        }
    }

    pub async fn remove(&self, authorization_id: &str) -> Result<bool> {
        let result = AuthorizationEntity::delete_by_id(authorization_id.to_string())
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Authorizations holding a refresh token that expire at or before `cutoff`
    pub async fn find_expiring_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Authorization>> {
        let cutoff: DateTimeWithTimeZone = cutoff.into();
        let rows = AuthorizationEntity::find()
            .filter(authorization::Column::RefreshTokenCiphertext.is_not_null())
            .filter(authorization::Column::ExpiresAt.is_not_null())
            .filter(authorization::Column::ExpiresAt.lte(cutoff))
            .order_by_asc(authorization::Column::ExpiresAt)
            .all(&*self.db)
            .await?;

        rows.into_iter().map(|model| self.decrypt(model)).collect()
    }
}
