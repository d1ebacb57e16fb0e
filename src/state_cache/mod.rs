//! # State Cache
//!
//! Short-lived storage for pending authorizations, keyed by the random
//! `state` token handed to the provider. An entry lives until it is
//! consumed by the callback or its TTL runs out; consumption is atomic so a
//! replayed callback never finds it twice.

use async_trait::async_trait;
use chrono::Duration;
use oauth2::ClientSecret;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::CryptoError;

pub mod database;
pub mod memory;

pub use database::DatabaseStateCache;
pub use memory::MemoryStateCache;

/// What the callback needs to finish an authorization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub authorization_id: String,
    pub client_id: String,
    pub client_secret: ClientSecret,
    pub return_to_uri: String,
}

#[derive(Debug, Error)]
pub enum StateCacheError {
    #[error("state cache storage error: {0}")]
    Storage(#[from] sea_orm::DbErr),
    #[error("state payload could not be sealed or opened: {0}")]
    Crypto(#[from] CryptoError),
    #[error("state payload is malformed: {0}")]
    Payload(#[from] serde_json::Error),
}

#[async_trait]
pub trait StateCache: Send + Sync {
    /// Store `value` under `key` for `ttl`, replacing any previous entry
    async fn set(
        &self,
        key: &str,
        value: PendingAuthorization,
        ttl: Duration,
    ) -> Result<(), StateCacheError>;

    /// Read an unexpired entry without consuming it
    async fn get(&self, key: &str) -> Result<Option<PendingAuthorization>, StateCacheError>;

    /// Remove an entry, returning whether one existed
    async fn delete(&self, key: &str) -> Result<bool, StateCacheError>;

    /// Read and remove an unexpired entry in one step.
    ///
    /// Of two concurrent callers with the same key at most one gets `Some`.
    async fn take(&self, key: &str) -> Result<Option<PendingAuthorization>, StateCacheError>;

    /// Drop expired entries, returning how many were removed
    async fn purge_expired(&self) -> Result<u64, StateCacheError>;
}

/// Generate a cryptographically random, URL-safe state token
pub fn generate_state_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    base64_url::encode(&bytes)
}
