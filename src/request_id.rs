//! Request ID extraction for log correlation.
//!
//! The layer does not mint request IDs; an outer middleware usually does.
//! When an `X-Request-ID` header is present on the request or on a retained
//! response, it is attached to log events so a replay can be traced back to
//! the request that originally produced the response.

use http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Identifier copied from an `X-Request-ID` header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Attempts to read a request ID from a header value.
    ///
    /// Returns `None` if the header value is not valid UTF-8.
    pub fn from_header(header: &HeaderValue) -> Option<Self> {
        header.to_str().ok().map(|s| Self(s.to_owned()))
    }

    /// Looks up `X-Request-ID` in a header map.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers.get(X_REQUEST_ID).and_then(Self::from_header)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
