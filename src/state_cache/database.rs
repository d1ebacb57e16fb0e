//! State cache persisted in the `oauth_states` table.
//!
//! Payloads are JSON, sealed with the state token as AAD. Works across
//! several service instances sharing one database.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use super::{PendingAuthorization, StateCache, StateCacheError};
use crate::crypto::{CryptoKey, decrypt_bytes, encrypt_bytes, oauth_state_aad};
use crate::models::oauth_state::{self, ActiveModel, Entity as OAuthState};

pub struct DatabaseStateCache {
    db: Arc<DatabaseConnection>,
    crypto_key: CryptoKey,
}

impl DatabaseStateCache {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    fn seal(&self, key: &str, value: &PendingAuthorization) -> Result<Vec<u8>, StateCacheError> {
        let payload = serde_json::to_vec(value)?;
        Ok(encrypt_bytes(
            &self.crypto_key,
            oauth_state_aad(key).as_bytes(),
            &payload,
        )?)
    }

    fn open(&self, row: &oauth_state::Model) -> Result<PendingAuthorization, StateCacheError> {
        let payload = decrypt_bytes(
            &self.crypto_key,
            oauth_state_aad(&row.state).as_bytes(),
            &row.payload_ciphertext,
        )?;
        Ok(serde_json::from_slice(&payload)?)
    }

    async fn find_live(&self, key: &str) -> Result<Option<oauth_state::Model>, StateCacheError> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        Ok(OAuthState::find_by_id(key.to_string())
            .filter(oauth_state::Column::ExpiresAt.gt(now))
            .one(&*self.db)
            .await?)
    }
}

#[async_trait]
impl StateCache for DatabaseStateCache {
    async fn set(
        &self,
        key: &str,
        value: PendingAuthorization,
        ttl: Duration,
    ) -> Result<(), StateCacheError> {
        let payload_ciphertext = self.seal(key, &value)?;
        let now = Utc::now();

        OAuthState::delete_by_id(key.to_string())
            .exec(&*self.db)
            .await?;

        let row = ActiveModel {
            state: Set(key.to_string()),
            payload_ciphertext: Set(payload_ciphertext),
            expires_at: Set((now + ttl).into()),
            created_at: Set(now.into()),
        };
        OAuthState::insert(row).exec_without_returning(&*self.db).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<PendingAuthorization>, StateCacheError> {
        self.find_live(key)
            .await?
            .map(|row| self.open(&row))
            .transpose()
    }

    async fn delete(&self, key: &str) -> Result<bool, StateCacheError> {
        let result = OAuthState::delete_by_id(key.to_string())
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn take(&self, key: &str) -> Result<Option<PendingAuthorization>, StateCacheError> {
        let Some(row) = self.find_live(key).await? else {
            return Ok(None);
        };

        // Only the caller whose delete removed the row owns the payload
        let now: DateTimeWithTimeZone = Utc::now().into();
        let deleted = OAuthState::delete_many()
            .filter(oauth_state::Column::State.eq(key))
            .filter(oauth_state::Column::ExpiresAt.gt(now))
            .exec(&*self.db)
            .await?;
        if deleted.rows_affected != 1 {
            return Ok(None);
        }

        self.open(&row).map(Some)
    }

    async fn purge_expired(&self) -> Result<u64, StateCacheError> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let result = OAuthState::delete_many()
            .filter(oauth_state::Column::ExpiresAt.lte(now))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
