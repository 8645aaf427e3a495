//! Storage backends for the retention layer.
//!
//! The layer requires a [`ResponseStorage`] implementation to persist
//! retained responses. This module ships with:
//! - [`memory::InMemoryStorage`]: the reference store, an unbounded
//!   concurrent map backed by [`dashmap`].
//! - [`bounded::BoundedMemoryStorage`]: a capacity-bounded store backed by
//!   [`moka`] for deployments that need a memory ceiling.
//!
//! Backends only answer two questions: "store this response under that key"
//! and "what was last stored under that key". Anything else (eviction,
//! persistence, distribution) is up to the implementation.

pub mod bounded;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode, Version};

use crate::error::RetentionError;

/// Snapshot of a response produced by a downstream handler.
///
/// Entries are immutable once stored; the layer clones them out of storage
/// on every hit.
#[derive(Debug, Clone, PartialEq)]
pub struct RetainedResponse {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RetainedResponse {
    pub fn new(status: StatusCode, version: Version, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            version,
            headers,
            body,
        }
    }

    /// Captures the head of `response` together with an already collected body.
    pub fn from_parts(parts: &http::response::Parts, body: Bytes) -> Self {
        Self::new(parts.status, parts.version, parts.headers.clone(), body)
    }

    /// Builds a full `http::Response` carrying the retained head and body.
    pub fn into_response(self) -> Result<Response<http_body_util::Full<Bytes>>, RetentionError> {
        self.into_response_with(http_body_util::Full::from)
    }

    /// Builds a response whose body is produced from the retained bytes by
    /// `make_body`.
    ///
    /// The status is always set explicitly, so non-default statuses survive
    /// both with and without a body.
    pub fn into_response_with<T, F>(self, make_body: F) -> Result<Response<T>, RetentionError>
    where
        F: FnOnce(Bytes) -> T,
    {
        let mut response = Response::builder()
            .status(self.status)
            .version(self.version)
            .body(make_body(self.body))
            .map_err(|err| RetentionError::WriteFailure(err.to_string()))?;
        apply_headers(response.headers_mut(), &self.headers);
        Ok(response)
    }
}

/// Writes `retained` into `target`.
///
/// Every header name present in `retained` is cleared from `target` before
/// its retained values are appended, so stale or duplicate values never
/// survive a replay. Names absent from `retained` are left alone.
pub fn apply_headers(target: &mut HeaderMap, retained: &HeaderMap) {
    for name in retained.keys() {
        target.remove(name);
        for value in retained.get_all(name) {
            target.append(name.clone(), value.clone());
        }
    }
}

#[async_trait]
pub trait ResponseStorage: Send + Sync + Clone + 'static {
    /// Upserts `response` under `key`. The last writer for a key wins.
    async fn store(&self, key: String, response: RetainedResponse) -> Result<(), RetentionError>;

    /// Fetches the most recently stored response for `key`.
    ///
    /// Returns [`RetentionError::NotRetained`] when nothing was ever stored
    /// under the key (or the backend has since dropped it).
    async fn retrieve(&self, key: &str) -> Result<RetainedResponse, RetentionError>;
}
