use async_trait::async_trait;
use moka::future::Cache;
use std::time::Duration;

use super::{ResponseStorage, RetainedResponse};
use crate::error::RetentionError;

/// A capacity-bounded [`ResponseStorage`] backed by [`moka`].
///
/// Once `max_capacity` entries are held, moka evicts the least valuable
/// entries. Evicted keys answer [`RetentionError::NotRetained`] and are
/// refilled on the next miss.
#[derive(Clone)]
pub struct BoundedMemoryStorage {
    cache: Cache<String, RetainedResponse>,
}

impl BoundedMemoryStorage {
    /// Creates a store holding at most `max_capacity` responses.
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder().max_capacity(max_capacity).build();
        Self { cache }
    }

    /// Like [`BoundedMemoryStorage::new`], but entries also expire `ttl`
    /// after they were stored.
    pub fn with_time_to_live(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl ResponseStorage for BoundedMemoryStorage {
    async fn store(&self, key: String, response: RetainedResponse) -> Result<(), RetentionError> {
        self.cache.insert(key, response).await;
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<RetainedResponse, RetentionError> {
        self.cache.get(key).await.ok_or(RetentionError::NotRetained)
    }
}
