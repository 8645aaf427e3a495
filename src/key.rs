//! Request fingerprinting.
//!
//! A fingerprint is the lowercase hex SHA-256 of a canonical JSON document
//! describing the request's URL, method, and headers:
//!
//! ```text
//! {"url":"/api/animals/fish?weird=true","method":"GET","headers":{"accept":["*/*"]}}
//! ```
//!
//! Header names are ordered lexicographically and values keep the order in
//! which they appear on the request, so the same request always hashes to the
//! same key on both the lookup and the store path.

use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::error::RetentionError;

/// Derives fingerprints from request heads.
///
/// By default every header participates, which scopes retained responses to
/// the exact caller (an `authorization` header changes the key). Headers that
/// vary per request without affecting content, such as a tracing identifier,
/// should be excluded with [`KeyDeriver::ignore_header`] or every request will
/// miss.
#[derive(Clone, Debug, Default)]
pub struct KeyDeriver {
    ignored: Arc<HashSet<HeaderName>>,
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
    url: String,
    method: &'a str,
    headers: BTreeMap<&'a str, Vec<ValueMaterial<'a>>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ValueMaterial<'a> {
    Text(&'a str),
    Opaque(&'a [u8]),
}

impl<'a> From<&'a HeaderValue> for ValueMaterial<'a> {
    fn from(value: &'a HeaderValue) -> Self {
        match value.to_str() {
            Ok(text) => ValueMaterial::Text(text),
            Err(_) => ValueMaterial::Opaque(value.as_bytes()),
        }
    }
}

impl KeyDeriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Excludes `name` from the key material.
    pub fn ignore_header(mut self, name: HeaderName) -> Self {
        Arc::make_mut(&mut self.ignored).insert(name);
        self
    }

    /// Excludes every header in `names` from the key material.
    pub fn ignore_headers<I>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = HeaderName>,
    {
        Arc::make_mut(&mut self.ignored).extend(names);
        self
    }

    pub fn is_ignored(&self, name: &HeaderName) -> bool {
        self.ignored.contains(name)
    }

    /// Computes the fingerprint for a request head.
    pub fn derive(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
    ) -> Result<String, RetentionError> {
        let mut material = KeyMaterial {
            url: uri.to_string(),
            method: method.as_str(),
            headers: BTreeMap::new(),
        };
        for name in headers.keys() {
            if self.is_ignored(name) {
                continue;
            }
            let values = headers.get_all(name).iter().map(ValueMaterial::from).collect();
            material.headers.insert(name.as_str(), values);
        }

        let encoded = serde_json::to_vec(&material)?;
        Ok(hex::encode(Sha256::digest(&encoded)))
    }

    /// Convenience wrapper around [`KeyDeriver::derive`] for a whole request.
    pub fn derive_for<B>(&self, request: &http::Request<B>) -> Result<String, RetentionError> {
        self.derive(request.method(), request.uri(), request.headers())
    }
}

/// Derives a fingerprint with the default [`KeyDeriver`].
pub fn derive_key(method: &Method, uri: &Uri, headers: &HeaderMap) -> Result<String, RetentionError> {
    KeyDeriver::default().derive(method, uri, headers)
}
