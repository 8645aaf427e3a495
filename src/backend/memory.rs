use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use super::{ResponseStorage, RetainedResponse};
use crate::error::RetentionError;

/// Reference [`ResponseStorage`] backed by a sharded concurrent map.
///
/// Entries are never evicted, so memory grows with the number of distinct
/// fingerprints. The backend is cheap to clone and clones share one map;
/// build a fresh instance per test or per layer for isolation.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    entries: Arc<DashMap<String, RetainedResponse>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of retained responses.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every retained response.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl ResponseStorage for InMemoryStorage {
    async fn store(&self, key: String, response: RetainedResponse) -> Result<(), RetentionError> {
        self.entries.insert(key, response);
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<RetainedResponse, RetentionError> {
        self.entries
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or(RetentionError::NotRetained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::header::{CONTENT_TYPE, VARY};
    use http::{HeaderMap, HeaderValue, StatusCode, Version};

    fn response_with_body(body: &'static [u8]) -> RetainedResponse {
        RetainedResponse::new(
            StatusCode::OK,
            Version::HTTP_11,
            HeaderMap::new(),
            Bytes::from_static(body),
        )
    }

    #[tokio::test]
    async fn store_and_retrieve_returns_retained_response() {
        let storage = InMemoryStorage::new();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.append(VARY, HeaderValue::from_static("accept"));
        headers.append(VARY, HeaderValue::from_static("accept-encoding"));
        let response = RetainedResponse::new(
            StatusCode::CREATED,
            Version::HTTP_11,
            headers,
            Bytes::from_static(b"alpha"),
        );

        storage
            .store("key".into(), response.clone())
            .await
            .expect("store succeeds");

        let retrieved = storage.retrieve("key").await.expect("entry present");
        assert_eq!(retrieved, response);
        assert_eq!(retrieved.headers.get_all(VARY).iter().count(), 2);
    }

    #[tokio::test]
    async fn retrieve_unknown_key_is_not_retained() {
        let storage = InMemoryStorage::new();
        let err = storage.retrieve("missing").await.unwrap_err();
        assert!(err.is_not_retained());
    }

    #[tokio::test]
    async fn last_store_wins() {
        let storage = InMemoryStorage::new();
        storage
            .store("key".into(), response_with_body(b"first"))
            .await
            .unwrap();
        storage
            .store("key".into(), response_with_body(b"second"))
            .await
            .unwrap();

        let retrieved = storage.retrieve("key").await.unwrap();
        assert_eq!(retrieved.body, Bytes::from_static(b"second"));
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let storage = InMemoryStorage::new();
        let clone = storage.clone();
        clone
            .store("key".into(), response_with_body(b"shared"))
            .await
            .unwrap();

        assert!(storage.retrieve("key").await.is_ok());
        storage.clear();
        assert!(clone.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stores_to_same_key_never_mix() {
        let storage = InMemoryStorage::new();
        let bodies: Vec<Bytes> = (0..32)
            .map(|i| Bytes::from(format!("body-{i}-").repeat(64)))
            .collect();

        let mut handles = Vec::new();
        for body in bodies.clone() {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                let response =
                    RetainedResponse::new(StatusCode::OK, Version::HTTP_11, HeaderMap::new(), body);
                storage.store("shared".into(), response).await
            }));
        }
        for handle in handles {
            handle.await.expect("task joins").expect("store succeeds");
        }

        let retrieved = storage.retrieve("shared").await.unwrap();
        assert!(bodies.contains(&retrieved.body));
    }
}
