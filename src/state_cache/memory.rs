//! In-process state cache backed by a bounded LRU.
//!
//! Suitable for single-instance deployments and tests. When the capacity is
//! reached the least recently used pending authorization is evicted.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use tokio::sync::Mutex;

use super::{PendingAuthorization, StateCache, StateCacheError};

const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

struct Entry {
    value: PendingAuthorization,
    expires_at: DateTime<Utc>,
}

pub struct MemoryStateCache {
    entries: Mutex<LruCache<String, Entry>>,
}

impl MemoryStateCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(DEFAULT_CAPACITY);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl Default for MemoryStateCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY.get())
    }
}

#[async_trait]
impl StateCache for MemoryStateCache {
    async fn set(
        &self,
        key: &str,
        value: PendingAuthorization,
        ttl: Duration,
    ) -> Result<(), StateCacheError> {
        let entry = Entry {
            value,
            expires_at: Utc::now() + ttl,
        };
        self.entries.lock().await.put(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<PendingAuthorization>, StateCacheError> {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StateCacheError> {
        Ok(self.entries.lock().await.pop(key).is_some())
    }

    async fn take(&self, key: &str) -> Result<Option<PendingAuthorization>, StateCacheError> {
        let entry = self.entries.lock().await.pop(key);
        Ok(entry
            .filter(|entry| entry.expires_at > Utc::now())
            .map(|entry| entry.value))
    }

    async fn purge_expired(&self) -> Result<u64, StateCacheError> {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        Ok(expired.len() as u64)
    }
}
